//! CC Remap - command-line front end
//!
//! Rewrites the channel and CC numbers of everything arriving on one MIDI
//! port and forwards it to another.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use crate::cli::Command;
use cc_remap::config::{AppConfig, MappingWatcher, Overrides};
use cc_remap::{discovery, Controller, EngineEvent, EngineState, MappingTable, MidirBackend};

/// CC Remap - renumber MIDI control changes between two ports
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (optional)
    #[arg(short, long, default_value = "cc-remap.yaml")]
    config: PathBuf,

    /// Input port name (exact, or a case-insensitive substring)
    #[arg(short, long)]
    input: Option<String>,

    /// Output port name; defaults to the input port name
    #[arg(short, long)]
    output: Option<String>,

    /// Output channel (1-16)
    #[arg(long)]
    channel: Option<i64>,

    /// Mapping CSV: one `original,replacement` pair per line
    #[arg(short, long)]
    mapping: Option<PathBuf>,

    /// Restart the session when the mapping file changes
    #[arg(long)]
    watch: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write daily log files into this directory
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Start immediately and run until Ctrl+C, without the prompt
    #[arg(long)]
    no_repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref())?;

    if args.list_ports {
        discovery::print_ports();
        return Ok(());
    }

    info!("Starting CC Remap v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load_or_default(&args.config).await?;
    config.merge(Overrides {
        input_port: args.input.clone(),
        output_port: args.output.clone(),
        channel: args.channel,
        mapping: args.mapping.clone(),
        watch: args.watch,
    });
    config.validate()?;

    let backend = Arc::new(MidirBackend::new(config.midi.client_name.clone()));
    let mut controller = Controller::new(backend);

    let watcher = match (&config.mapping.path, config.mapping.watch) {
        (Some(path), true) => Some(MappingWatcher::new(path)?),
        _ => None,
    };

    let commands = if args.no_repl {
        let session = config.session_config()?;
        controller.start(session)?;
        None
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        cli::spawn_repl(tx)?;
        cli::print_help();
        Some(rx)
    };

    let result = run_app(&mut controller, &config, watcher, commands).await;

    controller.stop()?;
    info!("CC Remap shutdown complete");
    result
}

async fn run_app(
    controller: &mut Controller,
    config: &AppConfig,
    mut watcher: Option<MappingWatcher>,
    mut commands: Option<mpsc::UnboundedReceiver<Command>>,
) -> Result<()> {
    let headless = commands.is_none();
    let mut events = controller
        .take_event_receiver()
        .context("Failed to get engine event receiver")?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(cmd) = next_command(&mut commands) => {
                if !handle_command(cmd, controller, config) {
                    break;
                }
            }

            Some(event) = events.recv() => {
                match event {
                    EngineEvent::Failed(reason) => {
                        warn!("Session ended: {}", reason);
                        if headless {
                            anyhow::bail!("Remapping stopped: {}", reason);
                        }
                    }
                    other => info!("Engine event: {:?}", other),
                }
            }

            Some(table) = next_table(&mut watcher) => {
                match controller.config() {
                    Some(current) if controller.state() == EngineState::Running => {
                        let replacement = current.with_table(table);
                        match controller.start(replacement) {
                            Ok(()) => info!("Session restarted with new mapping"),
                            Err(e) => warn!("Failed to restart with new mapping: {}", e),
                        }
                    }
                    Some(_) => {
                        if let Err(e) = controller.set_table(table) {
                            warn!("Failed to apply new mapping: {}", e);
                        }
                    }
                    None => info!("Mapping changed; it will be read on start"),
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping");
                break;
            }
        }
    }

    Ok(())
}

async fn next_command(commands: &mut Option<mpsc::UnboundedReceiver<Command>>) -> Option<Command> {
    match commands {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_table(watcher: &mut Option<MappingWatcher>) -> Option<Arc<MappingTable>> {
    match watcher {
        Some(w) => w.next_table().await,
        None => std::future::pending().await,
    }
}

/// Returns false when the user asked to quit
fn handle_command(cmd: Command, controller: &mut Controller, config: &AppConfig) -> bool {
    let outcome: Result<()> = match cmd {
        Command::Start => config
            .session_config()
            .and_then(|session| controller.start(session).map_err(Into::into)),
        Command::Pause => controller.pause().map_err(Into::into),
        Command::Resume => controller.resume().map_err(Into::into),
        Command::Stop => controller.stop().map_err(Into::into),
        Command::Status => {
            cli::print_status(controller);
            Ok(())
        }
        Command::Ports => {
            discovery::print_ports();
            Ok(())
        }
        Command::Map => {
            match controller.config() {
                Some(session) => cli::print_mapping(&session.table),
                None => println!("  No session started yet"),
            }
            Ok(())
        }
        Command::Help => {
            cli::print_help();
            Ok(())
        }
        Command::Quit => return false,
    };

    if let Err(e) = outcome {
        warn!("{:#}", e);
    }
    true
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "cc-remap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}
