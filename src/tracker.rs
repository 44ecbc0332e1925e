//! Key-state tracking
//!
//! Turns raw press/release notifications into correctly paired note on/off
//! transitions. OS auto-repeat produces repeated presses for a held key; those
//! are swallowed here. The note number is captured when the key goes down so a
//! transpose while the key is held cannot leave a note hanging.

use std::collections::BTreeMap;

use crate::keymap::{normalize_key, KeyMap};

/// A note-level change produced by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Pressed { key: char, note: u8 },
    Released { key: char, note: u8 },
}

impl KeyTransition {
    pub fn key(&self) -> char {
        match *self {
            KeyTransition::Pressed { key, .. } | KeyTransition::Released { key, .. } => key,
        }
    }

    pub fn note(&self) -> u8 {
        match *self {
            KeyTransition::Pressed { note, .. } | KeyTransition::Released { note, .. } => note,
        }
    }
}

/// Set of held keys, each with the note it started
#[derive(Debug, Default)]
pub struct KeyTracker {
    held: BTreeMap<char, u8>,
}

impl KeyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a key-down notification.
    ///
    /// Returns `None` for unmapped keys and for keys that are already held.
    pub fn press(&mut self, raw: char, keymap: &KeyMap) -> Option<KeyTransition> {
        let key = normalize_key(raw);
        let note = keymap.note_for(key)?;

        if self.held.contains_key(&key) {
            return None;
        }

        self.held.insert(key, note);
        Some(KeyTransition::Pressed { key, note })
    }

    /// Handle a key-up notification.
    ///
    /// Returns `None` for unmapped keys and for keys that are not held. The
    /// released note is the one captured by [`press`](Self::press).
    pub fn release(&mut self, raw: char, keymap: &KeyMap) -> Option<KeyTransition> {
        let key = normalize_key(raw);
        if !keymap.contains(key) {
            return None;
        }

        self.held
            .remove(&key)
            .map(|note| KeyTransition::Released { key, note })
    }

    /// Release every held key, in key order.
    pub fn release_all(&mut self) -> Vec<KeyTransition> {
        std::mem::take(&mut self.held)
            .into_iter()
            .map(|(key, note)| KeyTransition::Released { key, note })
            .collect()
    }

    pub fn is_held(&self, raw: char) -> bool {
        self.held.contains_key(&normalize_key(raw))
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}
