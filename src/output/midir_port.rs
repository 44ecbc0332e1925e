//! midir-backed output ports

use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use tracing::debug;

use super::{OutputBackend, OutputConnection, OutputError, PortInfo};

/// Output backend over the platform MIDI service
pub struct MidirBackend {
    client_name: String,
    midi_out: MidiOutput,
}

impl MidirBackend {
    /// Open a MIDI client. Failure means MIDI is unsupported or access was denied.
    pub fn request_access(client_name: &str) -> Result<Self, OutputError> {
        let midi_out =
            MidiOutput::new(client_name).map_err(|e| OutputError::Unavailable(e.to_string()))?;
        debug!("MIDI client '{}' created", client_name);
        Ok(Self {
            client_name: client_name.to_string(),
            midi_out,
        })
    }

    /// Find a port by its backend id on a given client
    fn find_port(midi_out: &MidiOutput, id: &str) -> Option<MidiOutputPort> {
        midi_out.ports().into_iter().find(|port| port.id() == id)
    }
}

impl OutputBackend for MidirBackend {
    fn ports(&self) -> Result<Vec<PortInfo>, OutputError> {
        let ports = self
            .midi_out
            .ports()
            .iter()
            .filter_map(|port| {
                let name = self.midi_out.port_name(port).ok()?;
                Some((port.id(), name))
            })
            .enumerate()
            .map(|(index, (id, name))| PortInfo { index, id, name })
            .collect();
        Ok(ports)
    }

    fn connect(&self, port: &PortInfo) -> Result<Box<dyn OutputConnection>, OutputError> {
        // midir consumes the client on connect, so each connection gets its own
        let midi_out = MidiOutput::new(&self.client_name)
            .map_err(|e| OutputError::Unavailable(e.to_string()))?;

        let midir_port = Self::find_port(&midi_out, &port.id).ok_or_else(|| OutputError::Connect {
            name: port.name.clone(),
            reason: "port no longer present".to_string(),
        })?;

        let connection = midi_out
            .connect(&midir_port, &self.client_name)
            .map_err(|e| OutputError::Connect {
                name: port.name.clone(),
                reason: e.to_string(),
            })?;

        debug!("MIDI output '{}' opened", port.name);
        Ok(Box::new(connection))
    }
}

impl OutputConnection for MidiOutputConnection {
    fn send(&mut self, bytes: &[u8]) -> Result<(), OutputError> {
        MidiOutputConnection::send(self, bytes).map_err(|e| OutputError::Send(e.to_string()))
    }
}
