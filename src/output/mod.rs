//! Output routing
//!
//! The router owns at most one open output connection and forwards note
//! messages to it. Port discovery and connection go through the
//! [`OutputBackend`] trait so the router can run against midir in production
//! and against an in-memory backend in tests.
//!
//! Nothing here blocks or retries: a message with no destination is dropped,
//! and a failed send is reported through the status and then forgotten.

pub mod midir_port;

#[cfg(test)]
pub(crate) mod memory;


use std::fmt;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::midi::{format_hex, MidiMessage};

pub use midir_port::MidirBackend;

/// A discovered output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Position in the current port list (what the user selects by)
    pub index: usize,
    /// Identifier that survives re-enumeration and tells apart ports that
    /// share a name
    pub id: String,
    /// Human-readable name
    pub name: String,
}

/// Router status, surfaced to the UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    /// MIDI could not be initialised; the router is inert
    Unavailable(String),
    /// No output selected
    Disconnected,
    /// Output selected and the last send (if any) succeeded
    Connected { name: String },
    /// The selected output rejected the last message
    SendError { name: String, reason: String },
}

impl fmt::Display for OutputStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStatus::Unavailable(reason) => write!(f, "MIDI unavailable: {}", reason),
            OutputStatus::Disconnected => write!(f, "disconnected"),
            OutputStatus::Connected { name } => write!(f, "connected to {}", name),
            OutputStatus::SendError { name, reason } => {
                write!(f, "send error on {}: {}", name, reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputError {
    #[error("MIDI output unavailable: {0}")]
    Unavailable(String),

    #[error("no output port at index {0}")]
    NoSuchIndex(usize),

    #[error("no output port matching '{0}'")]
    NoMatch(String),

    #[error("failed to connect to '{name}': {reason}")]
    Connect { name: String, reason: String },

    #[error("send failed: {0}")]
    Send(String),
}

/// Result of handing a message to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No output selected; not an error
    Dropped,
    Failed,
}

/// An open connection to one output port
pub trait OutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), OutputError>;
}

/// Platform MIDI service
pub trait OutputBackend {
    /// Enumerate the output ports currently present
    fn ports(&self) -> Result<Vec<PortInfo>, OutputError>;

    /// Open a connection to `port`
    fn connect(&self, port: &PortInfo) -> Result<Box<dyn OutputConnection>, OutputError>;
}

/// Called with every status change
pub type StatusCallback = Box<dyn Fn(&OutputStatus)>;

struct ActiveOutput {
    port: PortInfo,
    connection: Box<dyn OutputConnection>,
}

/// Zero-or-one selected output, plus the list it was chosen from
pub struct OutputRouter {
    backend: Option<Box<dyn OutputBackend>>,
    ports: Vec<PortInfo>,
    active: Option<ActiveOutput>,
    status: OutputStatus,
    status_callbacks: Vec<StatusCallback>,
}

impl OutputRouter {
    /// Create a router over `backend` and discover its ports
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        let mut router = Self {
            backend: Some(backend),
            ports: Vec::new(),
            active: None,
            status: OutputStatus::Disconnected,
            status_callbacks: Vec::new(),
        };
        router.refresh();
        router
    }

    /// Create a router with no MIDI access. Every message is dropped.
    pub fn inert(reason: impl Into<String>) -> Self {
        Self {
            backend: None,
            ports: Vec::new(),
            active: None,
            status: OutputStatus::Unavailable(reason.into()),
            status_callbacks: Vec::new(),
        }
    }

    /// Known output ports. Each call starts a fresh pass over the list.
    pub fn list_outputs(&self) -> impl Iterator<Item = &PortInfo> + '_ {
        self.ports.iter()
    }

    pub fn selected(&self) -> Option<&PortInfo> {
        self.active.as_ref().map(|a| &a.port)
    }

    pub fn status(&self) -> &OutputStatus {
        &self.status
    }

    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Register a status listener. It is called immediately with the current status.
    pub fn subscribe_status(&mut self, callback: StatusCallback) {
        callback(&self.status);
        self.status_callbacks.push(callback);
    }

    fn set_status(&mut self, status: OutputStatus) {
        if self.status == status {
            return;
        }
        debug!("Output status: {}", status);
        self.status = status;
        for callback in &self.status_callbacks {
            callback(&self.status);
        }
    }

    /// Re-derive the port list. Returns `true` when the list changed.
    ///
    /// If the selected port is gone the selection is dropped.
    pub fn refresh(&mut self) -> bool {
        let Some(backend) = &self.backend else {
            return false;
        };

        let ports = match backend.ports() {
            Ok(ports) => ports,
            Err(e) => {
                warn!("Failed to enumerate MIDI outputs: {}", e);
                return false;
            }
        };

        if ports == self.ports {
            return false;
        }

        info!("MIDI output list changed ({} ports)", ports.len());
        self.ports = ports;

        if let Some(id) = self.active.as_ref().map(|a| a.port.id.clone()) {
            match self.ports.iter().find(|p| p.id == id).cloned() {
                Some(port) => {
                    if let Some(active) = &mut self.active {
                        active.port = port;
                    }
                }
                None => {
                    if let Some(lost) = self.active.take() {
                        warn!("Selected output '{}' disappeared", lost.port.name);
                    }
                    self.set_status(OutputStatus::Disconnected);
                }
            }
        }

        true
    }

    /// Select the port at `index` in the current list.
    ///
    /// On failure nothing is selected and the status reads "disconnected".
    pub fn select_output(&mut self, index: usize) -> Result<(), OutputError> {
        let Some(backend) = &self.backend else {
            return Err(OutputError::Unavailable(self.status.to_string()));
        };

        // Close the old connection before opening the new one
        self.active = None;

        let Some(port) = self.ports.get(index).cloned() else {
            self.set_status(OutputStatus::Disconnected);
            return Err(OutputError::NoSuchIndex(index));
        };

        match backend.connect(&port) {
            Ok(connection) => {
                info!("Selected MIDI output [{}] {}", port.index, port.name);
                let name = port.name.clone();
                self.active = Some(ActiveOutput { port, connection });
                self.set_status(OutputStatus::Connected { name });
                Ok(())
            }
            Err(e) => {
                warn!("Failed to open MIDI output '{}': {}", port.name, e);
                self.set_status(OutputStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Select by index (if `pattern` is a number) or by case-insensitive
    /// substring of the port name.
    pub fn select_output_matching(&mut self, pattern: &str) -> Result<(), OutputError> {
        if let Ok(index) = pattern.trim().parse::<usize>() {
            return self.select_output(index);
        }

        let needle = pattern.to_lowercase();
        let index = self
            .ports
            .iter()
            .find(|p| p.name.to_lowercase().contains(&needle))
            .map(|p| p.index);

        match index {
            Some(index) => self.select_output(index),
            None => {
                debug!("No MIDI output matches '{}'", pattern);
                Err(OutputError::NoMatch(pattern.to_string()))
            }
        }
    }

    /// Forward a message to the selected output, if any.
    pub fn send(&mut self, message: &MidiMessage) -> Delivery {
        let Some(active) = &mut self.active else {
            trace!("TX dropped (no output): {}", message);
            return Delivery::Dropped;
        };

        let bytes = message.to_bytes();
        match active.connection.send(&bytes) {
            Ok(()) => {
                debug!("TX -> {}: {} ({})", active.port.name, format_hex(&bytes), message);
                if matches!(self.status, OutputStatus::SendError { .. }) {
                    let name = active.port.name.clone();
                    self.set_status(OutputStatus::Connected { name });
                }
                Delivery::Sent
            }
            Err(e) => {
                warn!("MIDI send to '{}' failed: {}", active.port.name, e);
                let name = active.port.name.clone();
                self.set_status(OutputStatus::SendError {
                    name,
                    reason: e.to_string(),
                });
                Delivery::Failed
            }
        }
    }
}
