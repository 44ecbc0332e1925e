//! Terminal front end
//!
//! Draws a one-line keyboard with held keys highlighted, and prints status and
//! notices above it. The terminal is in raw mode while playing, so every line
//! ends with an explicit `\r\n`.

use colored::*;
use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::rc::Rc;
use tracing::debug;

use crate::keymap::KeyMap;
use crate::output::{OutputRouter, OutputStatus, PortInfo, StatusCallback};
use crate::session::KeyIndicator;

/// Keyboard line renderer
pub struct TerminalIndicator {
    keys: Vec<(char, u8)>,
    active: BTreeSet<char>,
    header: String,
    /// Last drawn keyboard line, shared with the status printer
    drawn: Rc<RefCell<String>>,
}

impl TerminalIndicator {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            active: BTreeSet::new(),
            header: String::new(),
            drawn: Rc::new(RefCell::new(String::new())),
        }
    }

    /// Router status listener that prints above the keyboard line and puts
    /// the line back afterwards
    pub fn status_printer(&self) -> StatusCallback {
        let drawn = Rc::clone(&self.drawn);
        Box::new(move |status| {
            print_line_above(&status_line(status));
            draw_keyboard(&drawn.borrow());
        })
    }

    fn render_line(&self) -> String {
        let mut line = self.header.clone();
        for (key, _) in &self.keys {
            let cell = format!(" {} ", key);
            if self.active.contains(key) {
                line.push_str(&cell.black().on_bright_green().to_string());
            } else {
                line.push_str(&cell.dimmed().to_string());
            }
        }
        line
    }

    fn redraw(&self) {
        let line = self.render_line();
        draw_keyboard(&line);
        *self.drawn.borrow_mut() = line;
    }

    /// Print a line above the keyboard, then put the keyboard back
    pub fn print_above(&self, text: &str) {
        print_line_above(text);
        self.redraw();
    }
}

impl Default for TerminalIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndicator for TerminalIndicator {
    fn set_active(&mut self, key: char, _note: u8, active: bool) {
        if active {
            self.active.insert(key);
        } else {
            self.active.remove(&key);
        }
        self.redraw();
    }

    fn show_keymap(&mut self, keymap: &KeyMap) {
        self.keys = keymap.iter().collect();
        self.header = format!("[{:+} oct {}] ", keymap.octave_offset(), keymap.range_label());
        self.print_above(&format!(
            "{} {} ({} keys)",
            "Range".bold(),
            keymap.range_label().bright_white(),
            keymap.len()
        ));
    }

    fn show_outputs(&mut self, ports: &[PortInfo], selected: Option<usize>) {
        let mut text = format!("{}", "Outputs:".bold());
        if ports.is_empty() {
            text.push_str(&format!(" {}", "none found".dimmed()));
        }
        for port in ports {
            let label = format!("F{} {}", port.index + 1, port.name);
            let label = if Some(port.index) == selected {
                label.bright_green().bold()
            } else {
                label.normal()
            };
            text.push_str(&format!("  {}", label));
        }
        self.print_above(&text);
    }

    fn notice(&mut self, text: &str) {
        self.print_above(&format!("{}", text.yellow()));
    }
}

fn draw_keyboard(line: &str) {
    let mut stdout = io::stdout();
    let result = queue!(
        stdout,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(line)
    )
    .and_then(|_| stdout.flush());

    if let Err(e) = result {
        debug!("Failed to redraw keyboard line: {}", e);
    }
}

fn print_line_above(text: &str) {
    let mut stdout = io::stdout();
    let result = queue!(
        stdout,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(text),
        Print("\r\n")
    )
    .and_then(|_| stdout.flush());

    if let Err(e) = result {
        debug!("Failed to print status line: {}", e);
    }
}

/// Colored one-line rendering of a router status
pub fn format_status(status: &OutputStatus) -> String {
    let text = status.to_string();
    match status {
        OutputStatus::Connected { .. } => format!("● {}", text).bright_green().to_string(),
        OutputStatus::Disconnected => format!("○ {}", text).dimmed().to_string(),
        OutputStatus::SendError { .. } => format!("✖ {}", text).bright_red().to_string(),
        OutputStatus::Unavailable(_) => format!("✖ {}", text).red().to_string(),
    }
}

fn status_line(status: &OutputStatus) -> String {
    format!("{} {}", "MIDI".bold(), format_status(status))
}

/// Controls summary shown once at startup
pub fn print_help(tap_mode: bool) {
    print_line_above(&format!("{}", "=== keymidi ===".bold().cyan()));
    print_line_above("Play: Z-/ (lower row) and Q-] (upper row)   Up/Down: transpose   F1-F12: output   Esc: quit");
    if tap_mode {
        print_line_above(&format!(
            "{}",
            "Terminal does not report key releases: notes are played staccato".yellow()
        ));
    }
}

/// `--list-ports` output
pub fn print_ports(router: &OutputRouter) {
    println!("\n{}", "=== Available MIDI Outputs ===".bold().cyan());

    if let OutputStatus::Unavailable(reason) = router.status() {
        println!("  {} {}", "MIDI unavailable:".red(), reason);
        println!();
        return;
    }

    let mut any = false;
    for port in router.list_outputs() {
        any = true;
        println!("  {} {}", format!("[{}]", port.index).yellow(), port.name);
    }
    if !any {
        println!("  {}", "No output ports found".dimmed());
    }
    println!();
}
