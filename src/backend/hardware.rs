//! Hardware endpoints through `midir`

use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, info};

use super::{match_port_name, InboundSender, InputPort, MidiBackend, OutputPort};
use crate::error::{Error, Result};
use crate::midi::format_hex;

/// Backend over the platform MIDI API
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("cc-remap")
    }
}

/// Find a port by exact name, then by substring (Windows-friendly)
fn find_port<T: MidiIO>(io: &T, pattern: &str) -> Option<(T::Port, String)> {
    let ports = io.ports();
    let names: Vec<String> = ports
        .iter()
        .map(|p| io.port_name(p).unwrap_or_default())
        .collect();
    let index = match_port_name(names.iter().map(String::as_str), pattern)?;
    debug!("Found port '{}' matching '{}'", names[index], pattern);
    let name = names[index].clone();
    ports.into_iter().nth(index).map(|port| (port, name))
}

struct MidirInput {
    name: String,
    _conn: MidiInputConnection<()>,
}

impl InputPort for MidirInput {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MidirInput {
    fn drop(&mut self) {
        debug!("Closing MIDI input '{}'", self.name);
    }
}

struct MidirOutput {
    name: String,
    conn: MidiOutputConnection,
}

impl OutputPort for MidirOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.conn.send(bytes).map_err(|e| {
            Error::Device(format!(
                "send to '{}' failed ({}): {}",
                self.name,
                format_hex(bytes),
                e
            ))
        })
    }
}

impl Drop for MidirOutput {
    fn drop(&mut self) {
        debug!("Closing MIDI output '{}'", self.name);
    }
}

impl MidiBackend for MidirBackend {
    fn open_input(&self, name: &str, sink: InboundSender) -> Result<Box<dyn InputPort>> {
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))?;
        // Forward everything, SysEx and realtime included
        midi_in.ignore(Ignore::None);

        let (port, port_name) = find_port(&midi_in, name)
            .ok_or_else(|| Error::Device(format!("input port '{}' not found", name)))?;

        let conn = midi_in.connect(
            &port,
            &self.client_name,
            move |_timestamp, data, _| {
                // Receiver gone means the session is closing
                let _ = sink.send(data.to_vec());
            },
            (),
        )?;

        info!("Opened MIDI input: {}", port_name);
        Ok(Box::new(MidirInput {
            name: port_name,
            _conn: conn,
        }))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputPort>> {
        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))?;

        let (port, port_name) = find_port(&midi_out, name)
            .ok_or_else(|| Error::Device(format!("output port '{}' not found", name)))?;

        let conn = midi_out.connect(&port, &self.client_name)?;

        info!("Opened MIDI output: {}", port_name);
        Ok(Box::new(MidirOutput {
            name: port_name,
            conn,
        }))
    }
}
