//! Playing session
//!
//! [`Session`] is the one piece of mutable state in the program: the key map,
//! the held-key tracker, the output router and the UI collaborator. It is
//! built once at startup and every event handler goes through it.

use std::ops::ControlFlow;
use tracing::{debug, info, warn};

use crate::input::Command;
use crate::keymap::{KeyMap, Transpose, TransposeError};
use crate::midi::MidiMessage;
use crate::output::{Delivery, OutputError, OutputRouter, PortInfo};
use crate::tracker::{KeyTracker, KeyTransition};

/// Default Note On velocity
pub const DEFAULT_VELOCITY: u8 = 127;

/// UI side of the session: key highlighting and informational display
pub trait KeyIndicator {
    /// Highlight (or clear) the key that plays `note`
    fn set_active(&mut self, key: char, note: u8, active: bool);

    /// Key map changed (transpose or new layout)
    fn show_keymap(&mut self, _keymap: &KeyMap) {}

    /// Port list or selection changed
    fn show_outputs(&mut self, _ports: &[PortInfo], _selected: Option<usize>) {}

    /// One-off message for the user (rejected transpose, bad selection, ...)
    fn notice(&mut self, _text: &str) {}
}

/// Channel and velocity used for outgoing notes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteSettings {
    /// Zero-based MIDI channel (0-15)
    pub channel: u8,
    pub velocity: u8,
}

impl Default for NoteSettings {
    fn default() -> Self {
        Self {
            channel: 0,
            velocity: DEFAULT_VELOCITY,
        }
    }
}

pub struct Session<I: KeyIndicator> {
    keymap: KeyMap,
    tracker: KeyTracker,
    router: OutputRouter,
    indicator: I,
    settings: NoteSettings,
}

impl<I: KeyIndicator> Session<I> {
    pub fn new(keymap: KeyMap, router: OutputRouter, indicator: I, settings: NoteSettings) -> Self {
        let mut session = Self {
            keymap,
            tracker: KeyTracker::new(),
            router,
            indicator,
            settings,
        };
        session.indicator.show_keymap(&session.keymap);
        session.publish_outputs();
        session
    }

    pub fn keymap(&self) -> &KeyMap {
        &self.keymap
    }

    pub fn router(&self) -> &OutputRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut OutputRouter {
        &mut self.router
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn settings(&self) -> NoteSettings {
        self.settings
    }

    pub fn held_count(&self) -> usize {
        self.tracker.held_count()
    }

    /// Apply one input command. Breaks when the user asked to quit.
    pub fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::KeyDown(key) => {
                self.key_down(key);
            }
            Command::KeyUp(key) => {
                self.key_up(key);
            }
            Command::Transpose(direction) => {
                // Rejections are already shown to the user
                let _ = self.transpose(direction);
            }
            Command::SelectOutput(index) => {
                if let Err(e) = self.select_output(index) {
                    debug!("Output selection failed: {}", e);
                }
            }
            Command::ReleaseAll => {
                self.release_all();
            }
            Command::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Key pressed (or auto-repeated). Returns what happened to the Note On,
    /// or `None` when the key is unmapped or already held.
    pub fn key_down(&mut self, raw: char) -> Option<Delivery> {
        let transition = self.tracker.press(raw, &self.keymap)?;
        Some(self.emit(transition))
    }

    /// Key released. Returns what happened to the Note Off, or `None` when the
    /// key is unmapped or was not held.
    pub fn key_up(&mut self, raw: char) -> Option<Delivery> {
        let transition = self.tracker.release(raw, &self.keymap)?;
        Some(self.emit(transition))
    }

    /// Release every held key. Returns how many notes were turned off.
    pub fn release_all(&mut self) -> usize {
        let released = self.tracker.release_all();
        for transition in &released {
            self.emit(*transition);
        }
        if !released.is_empty() {
            debug!("Released {} held keys", released.len());
        }
        released.len()
    }

    fn emit(&mut self, transition: KeyTransition) -> Delivery {
        let channel = self.settings.channel;
        let (message, active) = match transition {
            KeyTransition::Pressed { note, .. } => (
                MidiMessage::NoteOn {
                    channel,
                    note,
                    velocity: self.settings.velocity,
                },
                true,
            ),
            KeyTransition::Released { note, .. } => (MidiMessage::NoteOff { channel, note }, false),
        };

        let delivery = self.router.send(&message);
        self.indicator
            .set_active(transition.key(), transition.note(), active);
        delivery
    }

    /// Shift the key map by one octave. Held keys keep sounding their
    /// original notes.
    pub fn transpose(&mut self, direction: Transpose) -> Result<(), TransposeError> {
        match self.keymap.transpose(direction) {
            Ok(()) => {
                info!(
                    "Transposed {} (octave {:+}, range {})",
                    direction,
                    self.keymap.octave_offset(),
                    self.keymap.range_label()
                );
                self.indicator.show_keymap(&self.keymap);
                Ok(())
            }
            Err(e) => {
                debug!("Transpose rejected: {}", e);
                self.indicator.notice(&e.to_string());
                Err(e)
            }
        }
    }

    /// Select an output by list index.
    ///
    /// Held notes are released on the old output first.
    pub fn select_output(&mut self, index: usize) -> Result<(), OutputError> {
        self.release_all();
        let result = self.router.select_output(index);
        self.after_selection(&result);
        result
    }

    /// Select an output by index or name substring
    pub fn select_output_matching(&mut self, pattern: &str) -> Result<(), OutputError> {
        self.release_all();
        let result = self.router.select_output_matching(pattern);
        self.after_selection(&result);
        result
    }

    fn after_selection(&mut self, result: &Result<(), OutputError>) {
        if let Err(e) = result {
            self.indicator.notice(&e.to_string());
        }
        self.publish_outputs();
    }

    /// Re-scan ports after a possible hot-plug. Returns `true` on change.
    pub fn refresh_outputs(&mut self) -> bool {
        let changed = self.router.refresh();
        if changed {
            self.publish_outputs();
        }
        changed
    }

    fn publish_outputs(&mut self) {
        let ports: Vec<PortInfo> = self.router.list_outputs().cloned().collect();
        let selected = self.router.selected().map(|p| p.index);
        self.indicator.show_outputs(&ports, selected);
    }

    /// Swap in new note settings. Takes effect from the next key press.
    ///
    /// A channel change releases held keys first.
    pub fn set_note_settings(&mut self, settings: NoteSettings) {
        if settings.channel != self.settings.channel {
            // Note Offs must go out on the channel their Note Ons used
            self.release_all();
        }
        if settings != self.settings {
            info!(
                "Note settings: channel {} velocity {}",
                settings.channel + 1,
                settings.velocity
            );
            self.settings = settings;
        }
    }

    /// Replace the key layout.
    ///
    /// Held keys are released first since they may not exist in the new
    /// layout. The current octave offset is carried over when the new layout
    /// allows it, otherwise the layout is used as written.
    pub fn replace_keymap(&mut self, layout: KeyMap) {
        let offset = self.keymap.octave_offset();
        let direction = if offset >= 0 {
            Transpose::Up
        } else {
            Transpose::Down
        };

        let mut shifted = layout.clone();
        let carried = (0..offset.unsigned_abs()).all(|_| shifted.transpose(direction).is_ok());
        let next = if carried {
            shifted
        } else {
            warn!("New key layout cannot hold octave offset {:+}, resetting to 0", offset);
            layout
        };

        if next == self.keymap {
            return;
        }

        self.release_all();
        self.keymap = next;

        info!(
            "Key layout replaced ({} keys, range {})",
            self.keymap.len(),
            self.keymap.range_label()
        );
        self.indicator.show_keymap(&self.keymap);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::memory::MemoryBackend;
    use crate::output::OutputStatus;

    #[derive(Debug, Default)]
    struct RecordingIndicator {
        events: Vec<(char, u8, bool)>,
        notices: Vec<String>,
        outputs: Vec<(usize, Option<usize>)>,
    }

    impl KeyIndicator for RecordingIndicator {
        fn set_active(&mut self, key: char, note: u8, active: bool) {
            self.events.push((key, note, active));
        }

        fn show_outputs(&mut self, ports: &[PortInfo], selected: Option<usize>) {
            self.outputs.push((ports.len(), selected));
        }

        fn notice(&mut self, text: &str) {
            self.notices.push(text.to_string());
        }
    }

    fn session_with(ports: &[&str]) -> (Session<RecordingIndicator>, MemoryBackend) {
        let backend = MemoryBackend::with_ports(ports);
        let router = OutputRouter::new(Box::new(backend.clone()));
        let session = Session::new(
            KeyMap::default(),
            router,
            RecordingIndicator::default(),
            NoteSettings::default(),
        );
        (session, backend)
    }

    fn connected_session() -> (Session<RecordingIndicator>, MemoryBackend) {
        let (mut session, backend) = session_with(&["Synth"]);
        session.select_output(0).unwrap();
        (session, backend)
    }

    #[test]
    fn test_handle_commands() {
        let (mut session, backend) = session_with(&["A", "B"]);

        let commands = [
            Command::SelectOutput(1),
            Command::Transpose(Transpose::Up),
            Command::KeyDown('z'),
            Command::KeyDown('z'),
            Command::ReleaseAll,
            Command::KeyUp('z'),
        ];
        for command in commands {
            assert_eq!(session.handle(command), ControlFlow::Continue(()));
        }
        assert_eq!(session.handle(Command::Quit), ControlFlow::Break(()));

        assert_eq!(
            backend.sent_to(),
            vec![
                ("B".to_string(), vec![0x90, 72, 127]),
                ("B".to_string(), vec![0x80, 72, 0]),
            ]
        );
    }

    #[test]
    fn test_press_and_release_z() {
        let (mut session, backend) = connected_session();

        assert_eq!(session.key_down('z'), Some(Delivery::Sent));
        assert_eq!(backend.sent(), vec![vec![0x90, 60, 127]]);

        assert_eq!(session.key_up('z'), Some(Delivery::Sent));
        assert_eq!(backend.sent(), vec![vec![0x90, 60, 127], vec![0x80, 60, 0]]);

        assert_eq!(
            session.indicator().events,
            vec![('Z', 60, true), ('Z', 60, false)]
        );
    }

    #[test]
    fn test_every_mapped_key_pairs_on_and_off() {
        let (mut session, backend) = connected_session();
        let keys: Vec<(char, u8)> = session.keymap().iter().collect();

        for (key, note) in keys {
            let before = backend.sent().len();
            session.key_down(key);
            session.key_up(key);
            let sent = backend.sent();
            assert_eq!(&sent[before..], &[vec![0x90, note, 127], vec![0x80, note, 0]]);
        }
    }

    #[test]
    fn test_holding_key_sends_one_note_on() {
        let (mut session, backend) = connected_session();

        session.key_down('x');
        for _ in 0..20 {
            assert_eq!(session.key_down('X'), None);
        }
        assert_eq!(backend.sent(), vec![vec![0x90, 62, 127]]);
    }

    #[test]
    fn test_release_never_pressed_sends_nothing() {
        let (mut session, backend) = connected_session();
        assert_eq!(session.key_up('c'), None);
        assert!(backend.sent().is_empty());
        assert!(session.indicator().events.is_empty());
    }

    #[test]
    fn test_unmapped_key_is_silent() {
        let (mut session, backend) = connected_session();
        assert_eq!(session.key_down('a'), None);
        assert_eq!(session.key_up('a'), None);
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_transpose_up_then_press() {
        let (mut session, backend) = connected_session();

        session.transpose(Transpose::Up).unwrap();
        session.key_down('z');
        assert_eq!(backend.sent(), vec![vec![0x90, 72, 127]]);
    }

    #[test]
    fn test_key_held_across_transpose_releases_original_note() {
        let (mut session, backend) = connected_session();

        session.key_down('z');
        session.transpose(Transpose::Up).unwrap();
        session.key_up('z');

        assert_eq!(backend.sent(), vec![vec![0x90, 60, 127], vec![0x80, 60, 0]]);
    }

    #[test]
    fn test_rejected_transpose_leaves_mapping_and_notifies() {
        let (mut session, _) = connected_session();
        session.transpose(Transpose::Up).unwrap();
        session.transpose(Transpose::Up).unwrap();
        let before = session.keymap().clone();

        assert!(session.transpose(Transpose::Up).is_err());
        assert_eq!(session.keymap(), &before);
        assert_eq!(session.indicator().notices.len(), 1);
    }

    #[test]
    fn test_no_output_still_updates_visuals() {
        let (mut session, backend) = session_with(&["Synth"]);

        assert_eq!(session.key_down('z'), Some(Delivery::Dropped));
        assert_eq!(session.key_up('z'), Some(Delivery::Dropped));
        assert!(backend.sent().is_empty());
        assert_eq!(session.indicator().events.len(), 2);
    }

    #[test]
    fn test_inert_router_still_updates_visuals() {
        let mut session = Session::new(
            KeyMap::default(),
            OutputRouter::inert("no MIDI service"),
            RecordingIndicator::default(),
            NoteSettings::default(),
        );

        assert_eq!(session.key_down('q'), Some(Delivery::Dropped));
        assert_eq!(session.indicator().events, vec![('Q', 77, true)]);
        assert!(session.select_output(0).is_err());
    }

    #[test]
    fn test_selecting_missing_index_disconnects() {
        let (mut session, backend) = connected_session();

        assert!(session.select_output(2).is_err());
        assert_eq!(session.router().status(), &OutputStatus::Disconnected);
        assert_eq!(session.indicator().notices.len(), 1);

        session.key_down('z');
        assert!(backend.sent().is_empty());
    }

    #[test]
    fn test_output_disappears_then_new_one_chosen() {
        let (mut session, backend) = session_with(&["Old", "Other"]);
        session.select_output(0).unwrap();

        backend.set_ports(&["Other"]);
        assert!(session.refresh_outputs());
        assert_eq!(session.router().status(), &OutputStatus::Disconnected);

        session.key_down('z');
        session.key_up('z');
        assert!(backend.sent().is_empty());

        session.select_output(0).unwrap();
        session.key_down('z');
        assert_eq!(
            backend.sent_to(),
            vec![("Other".to_string(), vec![0x90, 60, 127])]
        );
        assert_eq!(session.indicator().outputs.last(), Some(&(1, Some(0))));
    }

    #[test]
    fn test_switching_output_releases_held_notes_on_old_port() {
        let (mut session, backend) = session_with(&["A", "B"]);
        session.select_output(0).unwrap();

        session.key_down('z');
        session.select_output(1).unwrap();
        session.key_up('z');

        assert_eq!(
            backend.sent_to(),
            vec![
                ("A".to_string(), vec![0x90, 60, 127]),
                ("A".to_string(), vec![0x80, 60, 0]),
            ]
        );
    }

    #[test]
    fn test_release_all_turns_off_each_held_key_once() {
        let (mut session, backend) = connected_session();
        session.key_down('z');
        session.key_down('m');

        assert_eq!(session.release_all(), 2);
        assert_eq!(session.release_all(), 0);
        assert_eq!(session.key_up('z'), None);

        let offs: Vec<Vec<u8>> = backend
            .sent()
            .into_iter()
            .filter(|b| b[0] == 0x80)
            .collect();
        assert_eq!(offs, vec![vec![0x80, 71, 0], vec![0x80, 60, 0]]);
    }

    #[test]
    fn test_note_settings_apply_to_next_press() {
        let (mut session, backend) = connected_session();
        session.set_note_settings(NoteSettings {
            channel: 9,
            velocity: 64,
        });

        session.key_down('z');
        session.key_up('z');
        assert_eq!(backend.sent(), vec![vec![0x99, 60, 64], vec![0x89, 60, 0]]);
    }

    #[test]
    fn test_replace_keymap_carries_octave_offset() {
        let (mut session, backend) = connected_session();
        session.transpose(Transpose::Down).unwrap();
        session.key_down('z');

        let layout = KeyMap::from_bindings([('A', 60), ('S', 62)]).unwrap();
        session.replace_keymap(layout);

        assert_eq!(session.held_count(), 0);
        assert_eq!(session.keymap().note_for('a'), Some(48));
        assert_eq!(session.keymap().octave_offset(), -1);
        assert_eq!(backend.sent(), vec![vec![0x90, 48, 127], vec![0x80, 48, 0]]);
    }

    #[test]
    fn test_reloading_same_layout_keeps_held_keys() {
        let (mut session, backend) = connected_session();
        session.transpose(Transpose::Up).unwrap();
        session.key_down('z');

        session.replace_keymap(KeyMap::default());

        assert_eq!(session.held_count(), 1);
        assert_eq!(backend.sent(), vec![vec![0x90, 72, 127]]);
    }

    #[test]
    fn test_channel_change_releases_on_old_channel() {
        let (mut session, backend) = connected_session();
        session.key_down('z');
        session.set_note_settings(NoteSettings {
            channel: 1,
            velocity: 127,
        });

        assert_eq!(backend.sent(), vec![vec![0x90, 60, 127], vec![0x80, 60, 0]]);
        assert_eq!(session.key_up('z'), None);
    }

    #[test]
    fn test_replace_keymap_resets_offset_when_out_of_range() {
        let (mut session, _) = connected_session();
        session.transpose(Transpose::Up).unwrap();

        let layout = KeyMap::from_bindings([('A', 120)]).unwrap();
        session.replace_keymap(layout);

        assert_eq!(session.keymap().note_for('a'), Some(120));
        assert_eq!(session.keymap().octave_offset(), 0);
    }
}
