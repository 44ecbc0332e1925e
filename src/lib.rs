//! keymidi - play a MIDI instrument from the computer keyboard
//!
//! Library half of the binary, exposed so the pieces can be tested in
//! isolation.

pub mod config;
pub mod input;
pub mod keymap;
pub mod midi;
pub mod output;
pub mod paths;
pub mod session;
pub mod terminal;
pub mod tracker;
pub mod ui;
