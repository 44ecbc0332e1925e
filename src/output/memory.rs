//! In-memory output backend for tests
//!
//! Ports are plain names; a repeated name gets `#2`, `#3`... appended to its
//! id, in list order, the way two identical USB interfaces enumerate. Every
//! delivered message is recorded together with
//! the port it went to. Ports can be added or removed to simulate hot-plug and
//! sends can be made to fail.

use std::cell::RefCell;
use std::rc::Rc;

use super::{OutputBackend, OutputConnection, OutputError, PortInfo};

#[derive(Default)]
struct MemoryState {
    /// `(id, name)` pairs
    ports: Vec<(String, String)>,
    sent: Vec<(String, Vec<u8>)>,
    fail_sends: bool,
    refuse_connect: bool,
}

/// Cloneable handle; clones share state so a test can keep one after boxing another.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Rc<RefCell<MemoryState>>,
}

impl MemoryBackend {
    pub fn with_ports(names: &[&str]) -> Self {
        let backend = Self::default();
        backend.set_ports(names);
        backend
    }

    pub fn set_ports(&self, names: &[&str]) {
        let mut ports: Vec<(String, String)> = Vec::new();
        for name in names {
            let seen = ports.iter().filter(|(_, n)| n == name).count();
            let id = if seen == 0 {
                name.to_string()
            } else {
                format!("{}#{}", name, seen + 1)
            };
            ports.push((id, name.to_string()));
        }
        self.state.borrow_mut().ports = ports;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.borrow_mut().fail_sends = fail;
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.state.borrow_mut().refuse_connect = refuse;
    }

    /// Raw bytes of every delivered message, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.borrow().sent.iter().map(|(_, b)| b.clone()).collect()
    }

    /// Delivered messages with their destination port
    pub fn sent_to(&self) -> Vec<(String, Vec<u8>)> {
        self.state.borrow().sent.clone()
    }
}

impl OutputBackend for MemoryBackend {
    fn ports(&self) -> Result<Vec<PortInfo>, OutputError> {
        Ok(self
            .state
            .borrow()
            .ports
            .iter()
            .enumerate()
            .map(|(index, (id, name))| PortInfo {
                index,
                id: id.clone(),
                name: name.clone(),
            })
            .collect())
    }

    fn connect(&self, port: &PortInfo) -> Result<Box<dyn OutputConnection>, OutputError> {
        let state = self.state.borrow();
        if state.refuse_connect || !state.ports.iter().any(|(id, _)| *id == port.id) {
            return Err(OutputError::Connect {
                name: port.name.clone(),
                reason: "refused".to_string(),
            });
        }
        Ok(Box::new(MemoryConnection {
            port: port.id.clone(),
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    port: String,
    state: Rc<RefCell<MemoryState>>,
}

impl OutputConnection for MemoryConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        let mut state = self.state.borrow_mut();
        if state.fail_sends {
            return Err(OutputError::Send("simulated transport fault".to_string()));
        }
        if !state.ports.iter().any(|(id, _)| *id == self.port) {
            return Err(OutputError::Send("device unplugged".to_string()));
        }
        state.sent.push((self.port.clone(), bytes.to_vec()));
        Ok(())
    }
}
