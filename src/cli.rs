//! Command-line REPL

use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use cc_remap::{Controller, EngineState, MappingTable};

/// Commands accepted at the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    Status,
    Ports,
    Map,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let cmd = match line.trim().to_lowercase().as_str() {
            "" => return Ok(None),
            "start" => Command::Start,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "ports" => Command::Ports,
            "map" => Command::Map,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("Unknown command: {}", other)),
        };
        Ok(Some(cmd))
    }
}

/// Read commands on a blocking thread and forward them to the main loop
pub fn spawn_repl(tx: mpsc::UnboundedSender<Command>) -> anyhow::Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("cc-remap-repl".to_string())
        .spawn(move || {
            let mut rl = match DefaultEditor::new() {
                Ok(rl) => rl,
                Err(e) => {
                    warn!("Failed to start REPL: {}", e);
                    let _ = tx.send(Command::Quit);
                    return;
                }
            };
            repl_loop(&mut rl, &tx);
        })?;

    debug!("REPL started");
    Ok(handle)
}

fn repl_loop(rl: &mut DefaultEditor, tx: &mpsc::UnboundedSender<Command>) {
    loop {
        match rl.readline("cc-remap> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match Command::parse(&line) {
                    Ok(Some(cmd)) => {
                        if tx.send(cmd).is_err() || cmd == Command::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(msg) => println!("{} (type 'help')", msg.red()),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                let _ = tx.send(Command::Quit);
                break;
            }
            Err(e) => {
                warn!("REPL error: {}", e);
                let _ = tx.send(Command::Quit);
                break;
            }
        }
    }
}

pub fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (name, desc) in [
        ("start", "open the ports and start remapping"),
        ("pause", "stop forwarding and release the ports"),
        ("resume", "restart the last session"),
        ("stop", "stop forwarding and release the ports"),
        ("status", "show engine state and session"),
        ("ports", "list MIDI ports"),
        ("map", "show the active mapping table"),
        ("quit", "exit"),
    ] {
        println!("  {:8} {}", name.yellow(), desc);
    }
    println!();
}

pub fn print_status(controller: &Controller) {
    let state = match controller.state() {
        EngineState::Running => "running".green(),
        EngineState::Paused => "paused".yellow(),
        EngineState::Stopped => "stopped".red(),
    };
    println!("  State:   {}", state);
    if let Some(config) = controller.config() {
        println!("  Input:   {}", config.input_port.bright_white());
        println!("  Output:  {}", config.output_port.bright_white());
        println!("  Channel: {}", config.channel.to_string().cyan());
        println!("  Mapped:  {} controllers", config.table.len());
    }
}

pub fn print_mapping(table: &MappingTable) {
    if table.is_empty() {
        println!("  {}", "No controller mappings".dimmed());
        return;
    }
    for (original, replacement) in table.iter() {
        println!("  CC {:>3} -> CC {:>3}", original, replacement.to_string().green());
    }
}
