//! Facade over the terminal emulator collaborator.
//!
//! The core never interprets escape sequences itself; it feeds raw server
//! bytes to an [`Emulator`] and works from read-only [`ScreenSnapshot`]s.
//! The concrete backend wraps `alacritty_terminal`; tests use the scripted
//! mock.

mod alacritty;
pub mod ansi;
mod mock;

pub use alacritty::AlacrittyEmulator;
pub use mock::{MockEmulator, SharedMockEmulator};

use crate::proto::{AnsiColor, ClientContext};

/// Read-only copy of the display taken after a settle. Rows and columns are
/// 1-based at this boundary, matching the remote protocol's own conventions.
#[derive(Debug, Clone, Default)]
pub struct ScreenSnapshot {
    pub lines: Vec<String>,
    pub cursor_row: u16,
    pub cursor_col: u16,
    pub columns: u16,
    pub rows: u16,
}

impl ScreenSnapshot {
    /// Fetch a display row; 1-based, negative counts from the bottom.
    pub fn line(&self, row: i32) -> &str {
        let idx = self.resolve_row(row).saturating_sub(1) as usize;
        self.lines.get(idx).map(String::as_str).unwrap_or("")
    }

    pub fn first_line(&self) -> &str {
        self.line(1)
    }

    pub fn last_line(&self) -> &str {
        self.line(-1)
    }

    pub fn cursor_line(&self) -> &str {
        self.line(self.cursor_row as i32)
    }

    /// Map a possibly negative 1-based row onto a concrete 1-based row.
    pub fn resolve_row(&self, row: i32) -> u16 {
        if row >= 0 {
            row as u16
        } else {
            (self.rows as i32 + 1 + row).max(1) as u16
        }
    }
}

/// The emulator collaborator. Implementations own the decode state for the
/// remote's Big5 byte stream.
pub trait Emulator: Send {
    fn feed(&mut self, bytes: &[u8]);
    fn resize(&mut self, cols: u16, rows: u16);
    fn snapshot(&self) -> ScreenSnapshot;
    fn cursor_background(&self) -> AnsiColor;

    /// Local cursor nudges for uncommitted arrow keys.
    fn cursor_up(&mut self);
    fn cursor_down(&mut self);

    /// Capture a screen region as bytes which, sent to the client, repaint
    /// that region with its current content.
    fn screen_data(&self, region: &ClientContext) -> Vec<u8> {
        let snap = self.snapshot();
        let row = snap.resolve_row(region.row);
        let text: String = snap
            .line(row as i32)
            .chars()
            .skip(region.col.saturating_sub(1) as usize)
            .scan(0u16, |cells, ch| {
                *cells += display_width_char(ch);
                (*cells <= region.length).then_some(ch)
            })
            .collect();
        let mut bytes = ansi::goto(row, region.col);
        bytes.extend_from_slice(&encode_big5(&text));
        bytes
    }
}

/// Display cells occupied by one code point: the remote renders everything
/// outside printable ASCII double-wide.
pub fn display_width_char(ch: char) -> u16 {
    if ch.is_ascii() { 1 } else { 2 }
}

pub fn display_width(text: &str) -> usize {
    text.chars().map(|c| display_width_char(c) as usize).sum()
}

/// Bytes the text occupies in the remote's double-byte encoding.
pub fn encoded_len(text: &str) -> usize {
    text.chars().map(|c| if c.is_ascii() { 1 } else { 2 }).sum()
}

/// Encode toward the client's Big5 terminal; unmappable code points become
/// the encoding's substitute.
pub fn encode_big5(text: &str) -> Vec<u8> {
    let (bytes, _, _) = encoding_rs::BIG5.encode(text);
    bytes.into_owned()
}
