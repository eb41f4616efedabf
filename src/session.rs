//! Port session: one open input, one open output, a fixed channel override

use crossbeam::channel::{self, select, Receiver, Sender, TryRecvError};
use tracing::{debug, info};

use crate::backend::{InputPort, MidiBackend, OutputPort};
use crate::error::{Error, Result};
use crate::midi::{Channel, MidiMessage};

/// Requests cancellation; dropping it cancels as well
#[derive(Debug)]
pub struct CancelHandle {
    _tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(self) {}
}

/// Observed by the processing thread. Becomes ready once the handle is gone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Paired cancellation handle and token
pub fn cancellation() -> (CancelHandle, CancelToken) {
    // Nothing is ever sent: disconnection is the signal, and it is sticky
    let (tx, rx) = channel::bounded(0);
    (CancelHandle { _tx: tx }, CancelToken { rx })
}

/// Outcome of a blocking receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(MidiMessage),
    Cancelled,
}

/// Exclusive ownership of one input and one output endpoint
pub struct PortSession {
    input: Option<Box<dyn InputPort>>,
    output: Option<Box<dyn OutputPort>>,
    inbound: Receiver<Vec<u8>>,
    channel: Channel,
    input_name: String,
    output_name: String,
}

impl PortSession {
    /// Open both endpoints. If the output fails the input is released again.
    pub fn open(
        backend: &dyn MidiBackend,
        input_name: &str,
        output_name: &str,
        channel: Channel,
    ) -> Result<Self> {
        let (tx, inbound) = channel::unbounded();
        let input = backend.open_input(input_name, tx)?;
        let output = backend.open_output(output_name)?;

        let input_name = input.name().to_string();
        let output_name = output.name().to_string();
        info!(
            "Session open: {} -> {} on channel {}",
            input_name, output_name, channel
        );

        Ok(Self {
            input: Some(input),
            output: Some(output),
            inbound,
            channel,
            input_name,
            output_name,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn is_open(&self) -> bool {
        self.input.is_some() && self.output.is_some()
    }

    /// Block until a message arrives or `cancel` fires.
    ///
    /// A pending cancellation wins over queued messages.
    pub fn receive(&self, cancel: &CancelToken) -> Result<Received> {
        if self.input.is_none() {
            return Err(Error::Device(format!(
                "input '{}' is closed",
                self.input_name
            )));
        }
        if cancel.is_cancelled() {
            return Ok(Received::Cancelled);
        }

        select! {
            recv(cancel.rx) -> _ => Ok(Received::Cancelled),
            recv(self.inbound) -> msg => match msg {
                Ok(bytes) => Ok(Received::Message(MidiMessage::from_bytes(&bytes))),
                Err(_) => Err(Error::Device(format!(
                    "input '{}' disconnected",
                    self.input_name
                ))),
            },
        }
    }

    /// Forward a message to the output endpoint
    pub fn send(&mut self, msg: &MidiMessage) -> Result<()> {
        match self.output.as_mut() {
            Some(output) => output.send(&msg.to_bytes()),
            None => Err(Error::Device(format!(
                "output '{}' is closed",
                self.output_name
            ))),
        }
    }

    /// Release both endpoints. Safe to call repeatedly.
    pub fn close(&mut self) {
        let had_input = self.input.take().is_some();
        let had_output = self.output.take().is_some();
        if had_input || had_output {
            info!("Session closed: {} -> {}", self.input_name, self.output_name);
        } else {
            debug!("Session already closed: {}", self.input_name);
        }
    }
}

impl Drop for PortSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("input", &self.input_name)
            .field("output", &self.output_name)
            .field("channel", &self.channel)
            .field("open", &self.is_open())
            .finish()
    }
}
