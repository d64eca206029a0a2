use alacritty_terminal::{
    Term,
    event::{Event, EventListener},
    grid::Dimensions,
    index::{Column, Line, Point},
    term::{cell::Flags, Config},
    vte::ansi::{Color as AlacColor, NamedColor, Processor},
};
use encoding_rs::{Decoder, BIG5};

use crate::proto::AnsiColor;

use super::{Emulator, ScreenSnapshot};

struct TermDimensions {
    columns: usize,
    screen_lines: usize,
}

impl Dimensions for TermDimensions {
    fn total_lines(&self) -> usize {
        self.screen_lines
    }

    fn screen_lines(&self) -> usize {
        self.screen_lines
    }

    fn columns(&self) -> usize {
        self.columns
    }
}

#[derive(Clone)]
struct EventProxy;

impl EventListener for EventProxy {
    fn send_event(&self, _event: Event) {}
}

/// The concrete emulator collaborator: `alacritty_terminal` fed with the
/// Big5 server stream decoded incrementally, so a double-byte character split
/// across two network reads still comes out whole.
pub struct AlacrittyEmulator {
    term: Term<EventProxy>,
    parser: Processor,
    decoder: Decoder,
    columns: u16,
    rows: u16,
}

impl AlacrittyEmulator {
    pub fn new(columns: u16, rows: u16) -> Self {
        let dimensions = TermDimensions {
            columns: columns as usize,
            screen_lines: rows as usize,
        };
        let term = Term::new(Config::default(), &dimensions, EventProxy);
        Self {
            term,
            parser: Processor::new(),
            decoder: BIG5.new_decoder(),
            columns,
            rows,
        }
    }

    fn advance_utf8(&mut self, text: &str) {
        for byte in text.as_bytes() {
            self.parser.advance(&mut self.term, *byte);
        }
    }

    fn convert_color(color: &AlacColor) -> AnsiColor {
        match color {
            AlacColor::Named(named) => match named {
                NamedColor::Black | NamedColor::BrightBlack => AnsiColor::Black,
                NamedColor::Red | NamedColor::BrightRed => AnsiColor::Red,
                NamedColor::Green | NamedColor::BrightGreen => AnsiColor::Green,
                NamedColor::Yellow | NamedColor::BrightYellow => AnsiColor::Yellow,
                NamedColor::Blue | NamedColor::BrightBlue => AnsiColor::Blue,
                NamedColor::Magenta | NamedColor::BrightMagenta => AnsiColor::Magenta,
                NamedColor::Cyan | NamedColor::BrightCyan => AnsiColor::Cyan,
                NamedColor::White | NamedColor::BrightWhite => AnsiColor::White,
                _ => AnsiColor::Default,
            },
            AlacColor::Indexed(i) => match i & 0x07 {
                0 => AnsiColor::Black,
                1 => AnsiColor::Red,
                2 => AnsiColor::Green,
                3 => AnsiColor::Yellow,
                4 => AnsiColor::Blue,
                5 => AnsiColor::Magenta,
                6 => AnsiColor::Cyan,
                _ => AnsiColor::White,
            },
            AlacColor::Spec(_) => AnsiColor::Default,
        }
    }
}

impl Emulator for AlacrittyEmulator {
    fn feed(&mut self, bytes: &[u8]) {
        let capacity = self
            .decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 16);
        let mut text = String::with_capacity(capacity);
        let (_result, _read, _had_errors) =
            self.decoder.decode_to_string(bytes, &mut text, false);
        self.advance_utf8(&text);
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        if cols == self.columns && rows == self.rows {
            return;
        }
        self.term.resize(TermDimensions {
            columns: cols as usize,
            screen_lines: rows as usize,
        });
        self.columns = cols;
        self.rows = rows;
    }

    fn snapshot(&self) -> ScreenSnapshot {
        let grid = self.term.grid();
        let mut lines = Vec::with_capacity(self.rows as usize);
        for row in 0..self.rows as usize {
            let mut line = String::with_capacity(self.columns as usize);
            for col in 0..self.columns as usize {
                let cell = &grid[Point {
                    line: Line(row as i32),
                    column: Column(col),
                }];
                if cell.flags.contains(Flags::WIDE_CHAR_SPACER) {
                    continue;
                }
                line.push(cell.c);
            }
            while line.ends_with(' ') {
                line.pop();
            }
            lines.push(line);
        }

        let cursor = grid.cursor.point;
        ScreenSnapshot {
            lines,
            cursor_row: cursor.line.0 as u16 + 1,
            cursor_col: cursor.column.0 as u16 + 1,
            columns: self.columns,
            rows: self.rows,
        }
    }

    fn cursor_background(&self) -> AnsiColor {
        let grid = self.term.grid();
        let cell = &grid[grid.cursor.point];
        Self::convert_color(&cell.bg)
    }

    fn cursor_up(&mut self) {
        self.advance_utf8("\x1b[A");
    }

    fn cursor_down(&mut self) {
        self.advance_utf8("\x1b[B");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeds_and_snapshots_plain_text() {
        let mut emu = AlacrittyEmulator::new(80, 24);
        emu.feed(b"\x1b[1;1Hhello world");
        let snap = emu.snapshot();
        assert_eq!(snap.first_line(), "hello world");
        assert_eq!(snap.columns, 80);
        assert_eq!(snap.rows, 24);
    }

    #[test]
    fn cursor_moves_are_one_based() {
        let mut emu = AlacrittyEmulator::new(80, 24);
        emu.feed(b"\x1b[5;9H");
        let snap = emu.snapshot();
        assert_eq!((snap.cursor_row, snap.cursor_col), (5, 9));

        emu.cursor_up();
        assert_eq!(emu.snapshot().cursor_row, 4);
        emu.cursor_down();
        assert_eq!(emu.snapshot().cursor_row, 5);
    }

    #[test]
    fn big5_split_across_feeds_reassembles() {
        let mut emu = AlacrittyEmulator::new(80, 24);
        let encoded = crate::term::encode_big5("中");
        assert_eq!(encoded.len(), 2);
        emu.feed(&encoded[..1]);
        emu.feed(&encoded[1..]);
        assert_eq!(emu.snapshot().first_line(), "中");
    }

    #[test]
    fn resize_applies_new_dimensions() {
        let mut emu = AlacrittyEmulator::new(80, 24);
        emu.resize(128, 32);
        let snap = emu.snapshot();
        assert_eq!((snap.columns, snap.rows), (128, 32));
    }
}
