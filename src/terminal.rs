//! Terminal setup while playing
//!
//! Key releases only reach the program on the Windows console or on terminals
//! that speak the kitty keyboard protocol. On the latter every key, including
//! the ones that type text, has to be reported as an escape code, otherwise
//! letters arrive as plain bytes with no release.

use anyhow::{Context, Result};
use crossterm::event::{
    DisableFocusChange, EnableFocusChange, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::style::Print;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use std::io;
use tracing::debug;

/// Flags pushed on kitty-protocol terminals
pub const KEY_REPORTING_FLAGS: KeyboardEnhancementFlags =
    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
        .union(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
        .union(KeyboardEnhancementFlags::REPORT_ALL_KEYS_AS_ESCAPE_CODES);

/// How the terminal reports keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReporting {
    /// Windows console: press, repeat and release without setup
    Native,
    /// Kitty keyboard protocol enabled with [`KEY_REPORTING_FLAGS`]
    Enhanced,
    /// Presses only
    PressOnly,
}

impl KeyReporting {
    /// Probe the current terminal
    pub fn detect() -> Self {
        let supported = !cfg!(windows) && supports_keyboard_enhancement().unwrap_or(false);
        Self::choose(cfg!(windows), supported)
    }

    pub fn choose(windows_console: bool, enhancement_supported: bool) -> Self {
        if windows_console {
            KeyReporting::Native
        } else if enhancement_supported {
            KeyReporting::Enhanced
        } else {
            KeyReporting::PressOnly
        }
    }

    pub fn reports_release(self) -> bool {
        !matches!(self, KeyReporting::PressOnly)
    }

    /// Enhancement flags to push on entry, if any
    pub fn enhancement_flags(self) -> Option<KeyboardEnhancementFlags> {
        match self {
            KeyReporting::Enhanced => Some(KEY_REPORTING_FLAGS),
            KeyReporting::Native | KeyReporting::PressOnly => None,
        }
    }
}

/// Raw mode plus key and focus reporting, undone on drop
pub struct TerminalGuard {
    enhanced: bool,
}

impl TerminalGuard {
    pub fn enter(reporting: KeyReporting) -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw terminal mode")?;
        let mut guard = Self { enhanced: false };

        let mut stdout = io::stdout();
        if let Some(flags) = reporting.enhancement_flags() {
            execute!(stdout, PushKeyboardEnhancementFlags(flags))
                .context("Failed to enable key release reporting")?;
            guard.enhanced = true;
            debug!("Keyboard enhancement flags pushed: {:?}", flags);
        }
        execute!(stdout, EnableFocusChange).context("Failed to enable focus reporting")?;

        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        if self.enhanced {
            let _ = execute!(stdout, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(stdout, DisableFocusChange, Print("\r\n"));
        let _ = disable_raw_mode();
    }
}
