use std::sync::{Arc, Mutex};

use crate::proto::AnsiColor;

use super::{Emulator, ScreenSnapshot};

/// Scripted emulator for unit tests: the screen is whatever the test says it
/// is, and fed bytes are recorded instead of interpreted.
pub struct MockEmulator {
    pub lines: Vec<String>,
    pub cursor_row: u16,
    pub cursor_col: u16,
    pub columns: u16,
    pub rows: u16,
    pub cursor_bg: AnsiColor,
    pub fed: Vec<Vec<u8>>,
}

impl MockEmulator {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self {
            lines: vec![String::new(); rows as usize],
            cursor_row: 1,
            cursor_col: 1,
            columns,
            rows,
            cursor_bg: AnsiColor::Default,
            fed: Vec::new(),
        }
    }

    pub fn set_line(&mut self, row: u16, text: &str) {
        let idx = row.saturating_sub(1) as usize;
        if idx < self.lines.len() {
            self.lines[idx] = text.to_string();
        }
    }

    /// Overwrite the display from the top; remaining rows go blank.
    pub fn set_screen(&mut self, rows: &[&str]) {
        for line in self.lines.iter_mut() {
            line.clear();
        }
        for (n, text) in rows.iter().enumerate().take(self.lines.len()) {
            self.lines[n] = text.to_string();
        }
    }

    pub fn set_last_line(&mut self, text: &str) {
        self.set_line(self.rows, text);
    }

    pub fn set_cursor(&mut self, row: u16, col: u16) {
        self.cursor_row = row;
        self.cursor_col = col;
    }
}

impl Emulator for MockEmulator {
    fn feed(&mut self, bytes: &[u8]) {
        self.fed.push(bytes.to_vec());
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.columns = cols;
        self.rows = rows;
        self.lines.resize(rows as usize, String::new());
    }

    fn snapshot(&self) -> ScreenSnapshot {
        ScreenSnapshot {
            lines: self.lines.clone(),
            cursor_row: self.cursor_row,
            cursor_col: self.cursor_col,
            columns: self.columns,
            rows: self.rows,
        }
    }

    fn cursor_background(&self) -> AnsiColor {
        self.cursor_bg
    }

    fn cursor_up(&mut self) {
        self.cursor_row = self.cursor_row.saturating_sub(1).max(1);
    }

    fn cursor_down(&mut self) {
        self.cursor_row = (self.cursor_row + 1).min(self.rows);
    }
}

/// Handle that lets a test keep mutating the mock's screen while a session
/// owns it as its emulator.
#[derive(Clone)]
pub struct SharedMockEmulator(pub Arc<Mutex<MockEmulator>>);

impl SharedMockEmulator {
    pub fn new(columns: u16, rows: u16) -> Self {
        Self(Arc::new(Mutex::new(MockEmulator::new(columns, rows))))
    }
}

impl Emulator for SharedMockEmulator {
    fn feed(&mut self, bytes: &[u8]) {
        self.0.lock().unwrap().feed(bytes);
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.0.lock().unwrap().resize(cols, rows);
    }

    fn snapshot(&self) -> ScreenSnapshot {
        self.0.lock().unwrap().snapshot()
    }

    fn cursor_background(&self) -> AnsiColor {
        self.0.lock().unwrap().cursor_background()
    }

    fn cursor_up(&mut self) {
        self.0.lock().unwrap().cursor_up();
    }

    fn cursor_down(&mut self) {
        self.0.lock().unwrap().cursor_down();
    }
}
