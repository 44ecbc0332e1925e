//! MIDI message types and wire encoding
//!
//! Only the voice messages the keyboard can emit are modelled here.

use std::fmt;

/// Highest valid MIDI data byte (note number, velocity).
pub const MAX_DATA: u8 = 0x7F;

/// Channel voice messages emitted by the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note Off: channel (0-15), note (0-127). Always sent with release velocity 0.
    NoteOff { channel: u8, note: u8 },

    /// Note On: channel (0-15), note (0-127), velocity (0-127)
    NoteOn { channel: u8, note: u8, velocity: u8 },
}

impl MidiMessage {
    /// Encode the message to MIDI bytes
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOff { channel, note } => [0x80 | (channel & 0x0F), note & MAX_DATA, 0],
            MidiMessage::NoteOn { channel, note, velocity } => {
                [0x90 | (channel & 0x0F), note & MAX_DATA, velocity & MAX_DATA]
            }
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note } => {
                write!(f, "NoteOff ch:{} n:{} ({})", channel + 1, note, note_name(note))
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} ({}) v:{}", channel + 1, note, note_name(note), velocity)
            }
        }
    }
}

/// Scientific pitch name for a note number, middle C (60) being `C4`.
pub fn note_name(note: u8) -> String {
    const NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i8 - 1;
    format!("{}{}", NAMES[(note % 12) as usize], octave)
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
