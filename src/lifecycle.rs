//! Lifecycle controller
//!
//! Owns at most one processing thread. `start` hands a freshly opened
//! [`PortSession`] to that thread; `pause`/`stop` cancel it, wait for the
//! thread to exit and only then close the session it hands back.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::backend::MidiBackend;
use crate::engine;
use crate::error::{Error, Result};
use crate::mapping::MappingTable;
use crate::midi::Channel;
use crate::session::{cancellation, CancelHandle, PortSession};

/// Engine run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Stopped => "stopped",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// State shared between the control thread and the processing thread
#[derive(Debug, Clone, Default)]
pub struct SharedState(Arc<RwLock<EngineState>>);

impl SharedState {
    pub fn new(state: EngineState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    pub fn get(&self) -> EngineState {
        *self.0.read()
    }

    pub fn set(&self, state: EngineState) {
        *self.0.write() = state;
    }
}

/// Everything needed to open and run one session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub input_port: String,
    pub output_port: String,
    pub channel: Channel,
    pub table: Arc<MappingTable>,
}

impl SessionConfig {
    pub fn new(
        input_port: impl Into<String>,
        output_port: impl Into<String>,
        channel: Channel,
        table: MappingTable,
    ) -> Self {
        Self {
            input_port: input_port.into(),
            output_port: output_port.into(),
            channel,
            table: Arc::new(table),
        }
    }

    /// Build from user input: channel 1-16 and a mapping file path.
    ///
    /// The channel is checked before the mapping file is read.
    pub fn from_user(
        input_port: &str,
        output_port: &str,
        channel: i64,
        mapping: impl AsRef<Path>,
    ) -> Result<Self> {
        let channel = Channel::from_user(channel)?;
        let table = MappingTable::load(mapping)?;
        Ok(Self::new(input_port, output_port, channel, table))
    }

    /// Same endpoints and channel with another table
    pub fn with_table(&self, table: Arc<MappingTable>) -> Self {
        Self {
            table,
            ..self.clone()
        }
    }
}

/// Notifications for the control side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Started {
        input: String,
        output: String,
        channel: Channel,
    },
    Paused,
    Stopped,
    /// The processing thread hit a device error and tore the session down
    Failed(String),
}

struct Worker {
    cancel: CancelHandle,
    handle: JoinHandle<Option<PortSession>>,
}

/// Drives the Stopped / Running / Paused state machine
pub struct Controller {
    backend: Arc<dyn MidiBackend>,
    state: SharedState,
    worker: Option<Worker>,
    last_config: Option<SessionConfig>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl Controller {
    pub fn new(backend: Arc<dyn MidiBackend>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            state: SharedState::default(),
            worker: None,
            last_config: None,
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state.get()
    }

    /// Config of the current or most recent session
    pub fn config(&self) -> Option<&SessionConfig> {
        self.last_config.as_ref()
    }

    /// Take the event receiver (only once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.event_rx.take()
    }

    /// Open a new session and spawn its processing thread.
    ///
    /// Any existing session is stopped and closed first. Open failures are
    /// returned here and leave the controller `Stopped`.
    pub fn start(&mut self, config: SessionConfig) -> Result<()> {
        if self.worker.is_some() {
            info!("Replacing running session");
            self.halt(EngineState::Stopped);
        }

        let session = match PortSession::open(
            self.backend.as_ref(),
            &config.input_port,
            &config.output_port,
            config.channel,
        ) {
            Ok(session) => session,
            Err(e) => {
                self.state.set(EngineState::Stopped);
                return Err(e);
            }
        };
        let input = session.input_name().to_string();
        let output = session.output_name().to_string();

        let (cancel, token) = cancellation();
        self.state.set(EngineState::Running);

        let state = self.state.clone();
        let table = config.table.clone();
        let events = self.event_tx.clone();
        let spawned = thread::Builder::new()
            .name("cc-remap-engine".to_string())
            .spawn(move || {
                let mut session = session;
                match engine::run(&mut session, &table, &state, &token) {
                    Ok(stats) => {
                        debug!(
                            "Processing thread exiting ({} forwarded, {} remapped)",
                            stats.forwarded, stats.remapped
                        );
                        Some(session)
                    }
                    Err(e) => {
                        error!("Engine stopped: {}", e);
                        session.close();
                        state.set(EngineState::Stopped);
                        let _ = events.send(EngineEvent::Failed(e.to_string()));
                        None
                    }
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.state.set(EngineState::Stopped);
                return Err(Error::Io(e));
            }
        };

        self.worker = Some(Worker { cancel, handle });
        info!(
            "Remapping {} -> {} on channel {} ({} mappings)",
            input,
            output,
            config.channel,
            config.table.len()
        );
        self.last_config = Some(config.clone());
        let _ = self.event_tx.send(EngineEvent::Started {
            input,
            output,
            channel: config.channel,
        });
        Ok(())
    }

    /// Stop forwarding and release the devices; `resume` reopens them
    pub fn pause(&mut self) -> Result<()> {
        match self.state() {
            EngineState::Running => {
                if self.halt(EngineState::Paused) == EngineState::Paused {
                    info!("Engine paused");
                    let _ = self.event_tx.send(EngineEvent::Paused);
                }
            }
            other => {
                // A failed worker may still need reaping
                self.halt(other);
                debug!("Pause ignored while {}", other);
            }
        }
        Ok(())
    }

    /// Stop forwarding and release the devices. Valid from any state.
    pub fn stop(&mut self) -> Result<()> {
        let previous = self.state();
        self.halt(EngineState::Stopped);
        if previous != EngineState::Stopped {
            info!("Engine stopped");
            let _ = self.event_tx.send(EngineEvent::Stopped);
        }
        Ok(())
    }

    /// Start again with the most recent config
    pub fn resume(&mut self) -> Result<()> {
        if self.state() == EngineState::Running {
            return Ok(());
        }
        let config = self
            .last_config
            .clone()
            .ok_or_else(|| Error::Config("no session to resume".to_string()))?;
        self.start(config)
    }

    /// Replace the table used by the next `start` or `resume`.
    ///
    /// A running session keeps its table; restart it to apply this one.
    pub fn set_table(&mut self, table: Arc<MappingTable>) -> Result<()> {
        let config = self
            .last_config
            .as_ref()
            .ok_or_else(|| Error::Config("no session to update".to_string()))?;
        info!("Mapping table replaced ({} mappings)", table.len());
        self.last_config = Some(config.with_table(table));
        Ok(())
    }

    /// Cancel and join the processing thread, then close what it hands back.
    ///
    /// Returns the state left behind: `Stopped` if the thread had already
    /// failed, `target` otherwise.
    fn halt(&mut self, target: EngineState) -> EngineState {
        self.state.set(target);

        let mut settled = target;
        if let Some(Worker { cancel, handle }) = self.worker.take() {
            cancel.cancel();
            match handle.join() {
                Ok(Some(mut session)) => session.close(),
                Ok(None) => {
                    debug!("Processing thread already released its session");
                    settled = EngineState::Stopped;
                }
                Err(_) => {
                    warn!("Processing thread panicked");
                    settled = EngineState::Stopped;
                }
            }
        }

        self.state.set(settled);
        settled
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.halt(EngineState::Stopped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VirtualBackend;
    use std::time::Duration;

    fn setup() -> (VirtualBackend, Controller, SessionConfig) {
        let backend = VirtualBackend::new();
        backend.add_input("in");
        backend.add_output("out");
        let controller = Controller::new(Arc::new(backend.clone()));
        let config = SessionConfig::new(
            "in",
            "out",
            Channel::new(0).unwrap(),
            MappingTable::from_pairs([(1, 74)]).unwrap(),
        );
        (backend, controller, config)
    }

    #[test]
    fn test_initial_state_is_stopped() {
        let (_backend, controller, _config) = setup();
        assert_eq!(controller.state(), EngineState::Stopped);
    }

    #[test]
    fn test_start_pause_resume_stop() {
        let (backend, mut controller, config) = setup();
        let input = backend.add_input("in");

        controller.start(config).unwrap();
        assert_eq!(controller.state(), EngineState::Running);
        assert!(input.is_open());

        controller.pause().unwrap();
        assert_eq!(controller.state(), EngineState::Paused);
        assert!(!input.is_open());

        controller.resume().unwrap();
        assert_eq!(controller.state(), EngineState::Running);
        assert!(input.is_open());

        controller.stop().unwrap();
        assert_eq!(controller.state(), EngineState::Stopped);
        assert!(!input.is_open());
    }

    #[test]
    fn test_stop_from_paused() {
        let (_backend, mut controller, config) = setup();
        controller.start(config).unwrap();
        controller.pause().unwrap();
        controller.stop().unwrap();
        assert_eq!(controller.state(), EngineState::Stopped);
    }

    #[test]
    fn test_open_failure_is_synchronous() {
        let (_backend, mut controller, mut config) = setup();
        config.output_port = "missing".to_string();

        assert!(matches!(controller.start(config), Err(Error::Device(_))));
        assert_eq!(controller.state(), EngineState::Stopped);
    }

    #[test]
    fn test_resume_without_session() {
        let (_backend, mut controller, _config) = setup();
        assert!(matches!(controller.resume(), Err(Error::Config(_))));
    }

    #[test]
    fn test_events_are_reported() {
        let (_backend, mut controller, config) = setup();
        let mut events = controller.take_event_receiver().unwrap();
        assert!(controller.take_event_receiver().is_none());

        controller.start(config).unwrap();
        controller.pause().unwrap();
        controller.stop().unwrap();

        assert!(matches!(events.try_recv(), Ok(EngineEvent::Started { .. })));
        assert_eq!(events.try_recv(), Ok(EngineEvent::Paused));
        assert_eq!(events.try_recv(), Ok(EngineEvent::Stopped));
    }

    #[test]
    fn test_drop_releases_ports() {
        let (backend, mut controller, config) = setup();
        let output = backend.add_output("out");
        controller.start(config).unwrap();
        assert!(output.is_open());

        drop(controller);
        assert!(!output.is_open());
    }

    #[test]
    fn test_from_user_checks_channel_first() {
        let err = SessionConfig::from_user("in", "out", 17, "/nonexistent.csv").unwrap_err();
        assert!(matches!(err, Error::InvalidChannel(17)));

        let err = SessionConfig::from_user("in", "out", 1, "/nonexistent.csv").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_pause_racing_a_failure_ends_stopped() {
        let (backend, mut controller, config) = setup();
        let mut events = controller.take_event_receiver().unwrap();
        let input = backend.add_input("in");
        let output = backend.add_output("out");
        controller.start(config).unwrap();

        output.unplug();
        input.inject(&[0xB0, 1, 1]);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while controller.state() != EngineState::Stopped && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }

        // The worker is gone but not yet reaped; pause observes it as still running
        controller.state.set(EngineState::Running);
        controller.pause().unwrap();

        assert_eq!(controller.state(), EngineState::Stopped);
        assert!(matches!(events.try_recv(), Ok(EngineEvent::Started { .. })));
        assert!(matches!(events.try_recv(), Ok(EngineEvent::Failed(_))));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_set_table_requires_a_session() {
        let (_backend, mut controller, _config) = setup();
        let table = Arc::new(MappingTable::empty());
        assert!(matches!(controller.set_table(table), Err(Error::Config(_))));
    }

    #[test]
    fn test_pause_without_traffic_returns_promptly() {
        let (_backend, mut controller, config) = setup();
        controller.start(config).unwrap();
        std::thread::sleep(Duration::from_millis(10));

        let started = std::time::Instant::now();
        controller.pause().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
