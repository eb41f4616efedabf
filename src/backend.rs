//! MIDI I/O backends
//!
//! The remapper never talks to a MIDI API directly. A [`MidiBackend`] opens
//! named endpoints and hands back owned handles; dropping a handle closes
//! the endpoint.

pub mod hardware;
pub mod virtual_ports;

use crossbeam::channel::Sender;

use crate::error::Result;

pub use self::hardware::MidirBackend;
pub use self::virtual_ports::{VirtualBackend, VirtualInput, VirtualOutput};

/// Where an open input endpoint delivers raw messages
pub type InboundSender = Sender<Vec<u8>>;

/// Open input endpoint. Closed on drop, which also drops its [`InboundSender`].
pub trait InputPort: Send {
    /// Resolved endpoint name
    fn name(&self) -> &str;
}

/// Open output endpoint. Closed on drop.
pub trait OutputPort: Send {
    /// Resolved endpoint name
    fn name(&self) -> &str;

    /// Write one complete message
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Opens endpoints by name
pub trait MidiBackend: Send + Sync {
    fn open_input(&self, name: &str, sink: InboundSender) -> Result<Box<dyn InputPort>>;

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputPort>>;
}

/// Pick a port name: exact match first, then case-insensitive substring
pub(crate) fn match_port_name<'a, I>(names: I, pattern: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    if let Some(index) = names.iter().position(|n| *n == pattern) {
        return Some(index);
    }
    let pattern = pattern.to_lowercase();
    names
        .iter()
        .position(|n| n.to_lowercase().contains(&pattern))
}
