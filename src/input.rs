//! Terminal input translation
//!
//! Maps crossterm events to session commands. Key releases are only reported
//! by terminals that support the keyboard enhancement protocol; without it the
//! translator runs in tap mode and pairs every press with an immediate release.
//!
//! Tap mode cannot tell OS auto-repeat from a fresh press. Presses of the same
//! key closer together than [`TAP_REPEAT_GAP`] are taken as auto-repeat and
//! dropped, so a held key sounds once, plus once more when the OS repeat delay
//! elapses, rather than once per repeat.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::time::{Duration, Instant};

use crate::keymap::Transpose;

/// What the event loop should do in response to an input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    KeyDown(char),
    KeyUp(char),
    Transpose(Transpose),
    /// Zero-based output index
    SelectOutput(usize),
    /// Focus lost: release every held key
    ReleaseAll,
    Quit,
}

/// Same-key presses closer than this are auto-repeat in tap mode.
/// OS repeat rates sit around 30-40 ms between events.
pub const TAP_REPEAT_GAP: Duration = Duration::from_millis(80);

#[derive(Debug, Clone)]
pub struct InputTranslator {
    tap_mode: bool,
    /// Last tapped key and when its latest press arrived
    last_tap: Option<(char, Instant)>,
}

impl InputTranslator {
    /// `reports_release` says whether the terminal delivers key-up events.
    pub fn new(reports_release: bool) -> Self {
        Self {
            tap_mode: !reports_release,
            last_tap: None,
        }
    }

    pub fn tap_mode(&self) -> bool {
        self.tap_mode
    }

    pub fn translate(&mut self, event: &Event) -> Vec<Command> {
        self.translate_at(event, Instant::now())
    }

    /// [`translate`](Self::translate) with an explicit arrival time
    pub fn translate_at(&mut self, event: &Event, now: Instant) -> Vec<Command> {
        match event {
            Event::Key(key) => self.translate_key(key, now),
            Event::FocusLost => vec![Command::ReleaseAll],
            _ => Vec::new(),
        }
    }

    fn translate_key(&mut self, key: &KeyEvent, now: Instant) -> Vec<Command> {
        let pressed = matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat);

        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if pressed {
                    vec![Command::Quit]
                } else {
                    Vec::new()
                }
            }
            KeyCode::Char(c) => match key.kind {
                _ if self.tap_mode && pressed => self.tap(c, now),
                KeyEventKind::Press | KeyEventKind::Repeat => vec![Command::KeyDown(c)],
                KeyEventKind::Release => vec![Command::KeyUp(c)],
            },
            // Control keys act once per physical press
            _ if key.kind != KeyEventKind::Press => Vec::new(),
            KeyCode::Esc => vec![Command::Quit],
            KeyCode::Up => vec![Command::Transpose(Transpose::Up)],
            KeyCode::Down => vec![Command::Transpose(Transpose::Down)],
            KeyCode::F(n @ 1..=12) => vec![Command::SelectOutput(n as usize - 1)],
            _ => Vec::new(),
        }
    }

    fn tap(&mut self, c: char, now: Instant) -> Vec<Command> {
        let repeat = matches!(
            self.last_tap,
            Some((last, at)) if last == c && now.saturating_duration_since(at) < TAP_REPEAT_GAP
        );
        self.last_tap = Some((c, now));

        if repeat {
            Vec::new()
        } else {
            vec![Command::KeyDown(c), Command::KeyUp(c)]
        }
    }
}
