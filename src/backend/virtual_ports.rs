//! In-process endpoints
//!
//! Named inputs and outputs that live entirely in memory. Useful for
//! embedding the engine behind another transport and for exercising the
//! lifecycle without hardware.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::{match_port_name, InboundSender, InputPort, MidiBackend, OutputPort};
use crate::error::{Error, Result};

#[derive(Default)]
struct InputState {
    /// Present while a session holds the port open
    sink: Option<InboundSender>,
    opened: usize,
}

#[derive(Default)]
struct OutputState {
    open: bool,
    unplugged: bool,
    opened: usize,
    sent: Vec<Vec<u8>>,
}

#[derive(Default)]
struct Registry {
    inputs: HashMap<String, InputState>,
    outputs: HashMap<String, OutputState>,
    input_order: Vec<String>,
    output_order: Vec<String>,
}

/// Backend whose ports are created on demand by the caller
#[derive(Clone, Default)]
pub struct VirtualBackend {
    registry: Arc<Mutex<Registry>>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an input port and return the handle used to feed it
    pub fn add_input(&self, name: &str) -> VirtualInput {
        let mut reg = self.registry.lock();
        if !reg.inputs.contains_key(name) {
            reg.inputs.insert(name.to_string(), InputState::default());
            reg.input_order.push(name.to_string());
        }
        VirtualInput {
            name: name.to_string(),
            registry: self.registry.clone(),
        }
    }

    /// Register an output port and return the handle used to inspect it
    pub fn add_output(&self, name: &str) -> VirtualOutput {
        let mut reg = self.registry.lock();
        if !reg.outputs.contains_key(name) {
            reg.outputs.insert(name.to_string(), OutputState::default());
            reg.output_order.push(name.to_string());
        }
        VirtualOutput {
            name: name.to_string(),
            registry: self.registry.clone(),
        }
    }

}

impl MidiBackend for VirtualBackend {
    fn open_input(&self, name: &str, sink: InboundSender) -> Result<Box<dyn InputPort>> {
        let mut reg = self.registry.lock();
        let index = match_port_name(reg.input_order.iter().map(String::as_str), name)
            .ok_or_else(|| Error::Device(format!("input port '{}' not found", name)))?;
        let resolved = reg.input_order[index].clone();

        let state = reg
            .inputs
            .get_mut(&resolved)
            .ok_or_else(|| Error::Device(format!("input port '{}' not found", name)))?;
        if state.sink.is_some() {
            return Err(Error::Device(format!("input port '{}' is busy", resolved)));
        }
        state.sink = Some(sink);
        state.opened += 1;

        debug!("Virtual input opened: {}", resolved);
        Ok(Box::new(VirtualInputPort {
            name: resolved,
            registry: self.registry.clone(),
        }))
    }

    fn open_output(&self, name: &str) -> Result<Box<dyn OutputPort>> {
        let mut reg = self.registry.lock();
        let index = match_port_name(reg.output_order.iter().map(String::as_str), name)
            .ok_or_else(|| Error::Device(format!("output port '{}' not found", name)))?;
        let resolved = reg.output_order[index].clone();

        let state = reg
            .outputs
            .get_mut(&resolved)
            .ok_or_else(|| Error::Device(format!("output port '{}' not found", name)))?;
        if state.open {
            return Err(Error::Device(format!("output port '{}' is busy", resolved)));
        }
        if state.unplugged {
            return Err(Error::Device(format!("output port '{}' is unplugged", resolved)));
        }
        state.open = true;
        state.opened += 1;

        debug!("Virtual output opened: {}", resolved);
        Ok(Box::new(VirtualOutputPort {
            name: resolved,
            registry: self.registry.clone(),
        }))
    }
}

struct VirtualInputPort {
    name: String,
    registry: Arc<Mutex<Registry>>,
}

impl InputPort for VirtualInputPort {
    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for VirtualInputPort {
    fn drop(&mut self) {
        if let Some(state) = self.registry.lock().inputs.get_mut(&self.name) {
            state.sink = None;
        }
        debug!("Virtual input closed: {}", self.name);
    }
}

struct VirtualOutputPort {
    name: String,
    registry: Arc<Mutex<Registry>>,
}

impl OutputPort for VirtualOutputPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut reg = self.registry.lock();
        match reg.outputs.get_mut(&self.name) {
            Some(state) if !state.unplugged => {
                state.sent.push(bytes.to_vec());
                Ok(())
            }
            _ => Err(Error::Device(format!(
                "output port '{}' disconnected",
                self.name
            ))),
        }
    }
}

impl Drop for VirtualOutputPort {
    fn drop(&mut self) {
        if let Some(state) = self.registry.lock().outputs.get_mut(&self.name) {
            state.open = false;
        }
        debug!("Virtual output closed: {}", self.name);
    }
}

/// Feeding side of a virtual input port
#[derive(Clone)]
pub struct VirtualInput {
    name: String,
    registry: Arc<Mutex<Registry>>,
}

impl VirtualInput {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver a message as if the device sent it. Returns false when no
    /// session has the port open (the message is dropped, as on a real bus).
    pub fn inject(&self, bytes: &[u8]) -> bool {
        let reg = self.registry.lock();
        match reg.inputs.get(&self.name).and_then(|s| s.sink.as_ref()) {
            Some(sink) => sink.send(bytes.to_vec()).is_ok(),
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.registry
            .lock()
            .inputs
            .get(&self.name)
            .is_some_and(|s| s.sink.is_some())
    }

    /// How many times a session has opened this port
    pub fn open_count(&self) -> usize {
        self.registry
            .lock()
            .inputs
            .get(&self.name)
            .map_or(0, |s| s.opened)
    }

    /// Simulate the device disappearing: the open session sees its input disconnect
    pub fn unplug(&self) {
        if let Some(state) = self.registry.lock().inputs.get_mut(&self.name) {
            state.sink = None;
        }
    }
}

/// Inspection side of a virtual output port
#[derive(Clone)]
pub struct VirtualOutput {
    name: String,
    registry: Arc<Mutex<Registry>>,
}

impl VirtualOutput {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Everything written to the port so far
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.registry
            .lock()
            .outputs
            .get(&self.name)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    pub fn is_open(&self) -> bool {
        self.registry
            .lock()
            .outputs
            .get(&self.name)
            .is_some_and(|s| s.open)
    }

    pub fn open_count(&self) -> usize {
        self.registry
            .lock()
            .outputs
            .get(&self.name)
            .map_or(0, |s| s.opened)
    }

    /// Simulate the device disappearing: further sends fail
    pub fn unplug(&self) {
        if let Some(state) = self.registry.lock().outputs.get_mut(&self.name) {
            state.unplugged = true;
        }
    }

    /// Poll until at least `count` messages were written or the timeout expires
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.sent().len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}
