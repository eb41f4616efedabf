//! CC Remap - real-time MIDI control-change remapper
//!
//! Reads one input port, moves every channel message to a fixed channel,
//! renumbers Control Change controllers through a [`MappingTable`] and
//! forwards the result to one output port.

pub mod backend;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod mapping;
pub mod midi;
pub mod session;

pub use backend::{MidiBackend, MidirBackend, VirtualBackend};
pub use engine::transform;
pub use error::{Error, Result};
pub use lifecycle::{Controller, EngineEvent, EngineState, SessionConfig};
pub use mapping::MappingTable;
pub use midi::{Channel, MidiMessage};
pub use session::PortSession;
