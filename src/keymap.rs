//! Computer keyboard to note number mapping
//!
//! The map is an ordered list of `(key, note)` pairs. Keys are stored in their
//! normalized form (see [`normalize_key`]). Transposition shifts every entry by
//! one octave at a time and is all-or-nothing.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::midi::{note_name, MAX_DATA};

/// Semitones moved by one transpose step
pub const OCTAVE: u8 = 12;

/// Transposing down is refused while any note sits at or below this value.
pub const LOWEST_NOTE_BEFORE_DOWN: u8 = 20;

/// Two-row layout: lower row starts at middle C, upper row continues at F5.
const DEFAULT_LAYOUT: [(char, u8); 37] = [
    ('Z', 60),
    ('S', 61),
    ('X', 62),
    ('D', 63),
    ('C', 64),
    ('V', 65),
    ('G', 66),
    ('B', 67),
    ('H', 68),
    ('N', 69),
    ('J', 70),
    ('M', 71),
    (',', 72),
    ('L', 73),
    ('.', 74),
    (';', 75),
    ('/', 76),
    ('Q', 77),
    ('2', 78),
    ('W', 79),
    ('3', 80),
    ('E', 81),
    ('4', 82),
    ('R', 83),
    ('T', 84),
    ('6', 85),
    ('Y', 86),
    ('7', 87),
    ('U', 88),
    ('I', 89),
    ('9', 90),
    ('O', 91),
    ('0', 92),
    ('P', 93),
    ('-', 94),
    ('[', 95),
    (']', 96),
];

/// Transpose direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    Up,
    Down,
}

impl fmt::Display for Transpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transpose::Up => write!(f, "up"),
            Transpose::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransposeError {
    #[error("cannot transpose up: key '{key}' is already at note {note}")]
    TooHigh { key: char, note: u8 },

    #[error("cannot transpose down: key '{key}' is already at note {note}")]
    TooLow { key: char, note: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyMapError {
    #[error("key layout is empty")]
    Empty,

    #[error("key '{0}' is mapped more than once")]
    DuplicateKey(char),

    #[error("key '{key}' maps to note {note} (must be 0-127)")]
    NoteOutOfRange { key: char, note: u8 },
}

/// Normalize a raw key character: letters upper-cased, everything else literal.
///
/// Digits and punctuation have no case, so `to_ascii_uppercase` leaves them
/// untouched.
pub fn normalize_key(raw: char) -> char {
    raw.to_ascii_uppercase()
}

/// Ordered key to note table with a tracked octave offset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    entries: Vec<(char, u8)>,
    octave_offset: i8,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self {
            entries: DEFAULT_LAYOUT.to_vec(),
            octave_offset: 0,
        }
    }
}

impl KeyMap {
    /// Build a map from explicit bindings, normalizing keys.
    pub fn from_bindings<I>(bindings: I) -> Result<Self, KeyMapError>
    where
        I: IntoIterator<Item = (char, u8)>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (raw, note) in bindings {
            let key = normalize_key(raw);
            if note > MAX_DATA {
                return Err(KeyMapError::NoteOutOfRange { key, note });
            }
            if !seen.insert(key) {
                return Err(KeyMapError::DuplicateKey(key));
            }
            entries.push((key, note));
        }

        if entries.is_empty() {
            return Err(KeyMapError::Empty);
        }

        Ok(Self {
            entries,
            octave_offset: 0,
        })
    }

    /// Note for a raw key, or `None` when the key is unmapped
    pub fn note_for(&self, raw: char) -> Option<u8> {
        let key = normalize_key(raw);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, note)| *note)
    }

    pub fn contains(&self, raw: char) -> bool {
        self.note_for(raw).is_some()
    }

    /// Iterate `(key, note)` pairs in layout order
    pub fn iter(&self) -> impl Iterator<Item = (char, u8)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Octaves shifted from the layout as loaded
    pub fn octave_offset(&self) -> i8 {
        self.octave_offset
    }

    /// Shift every note by one octave.
    ///
    /// Either every entry moves or none does.
    pub fn transpose(&mut self, direction: Transpose) -> Result<(), TransposeError> {
        match direction {
            Transpose::Up => {
                if let Some(&(key, note)) = self.entries.iter().find(|(_, n)| *n > MAX_DATA - OCTAVE) {
                    return Err(TransposeError::TooHigh { key, note });
                }
                for (_, note) in &mut self.entries {
                    *note += OCTAVE;
                }
                self.octave_offset += 1;
            }
            Transpose::Down => {
                if let Some(&(key, note)) =
                    self.entries.iter().find(|(_, n)| *n <= LOWEST_NOTE_BEFORE_DOWN)
                {
                    return Err(TransposeError::TooLow { key, note });
                }
                for (_, note) in &mut self.entries {
                    *note -= OCTAVE;
                }
                self.octave_offset -= 1;
            }
        }
        Ok(())
    }

    /// Lowest and highest mapped notes as pitch names, for display
    pub fn range_label(&self) -> String {
        let low = self.entries.iter().map(|(_, n)| *n).min();
        let high = self.entries.iter().map(|(_, n)| *n).max();
        match (low, high) {
            (Some(low), Some(high)) => format!("{}-{}", note_name(low), note_name(high)),
            _ => String::from("-"),
        }
    }
}
