//! Scripted macro replay: synthetic keystrokes driven through the session's
//! send path, gated on menu states observed by the automaton.

mod engine;

pub use engine::{run_script, MacroContext, MacroError, MacroTerminal};

use crate::proto::MenuKind;

/// What a step sends: fixed bytes, or a per-state alternative.
#[derive(Debug, Clone)]
pub enum StepSend {
    Bytes(Vec<u8>),
    PerState(Vec<(MenuKind, Vec<u8>)>),
}

/// A step's state requirement.
#[derive(Debug, Clone)]
pub enum StateExpect {
    OneOf(Vec<MenuKind>),
    /// Same as the previous step's result.
    FromLast,
}

/// One scripted keystroke with its assertions and retry budget.
#[derive(Debug, Clone)]
pub struct MacroStep {
    pub send: StepSend,
    /// Checked before sending; `None` skips the check.
    pub in_state: Option<StateExpect>,
    /// Checked once the screen settles; `None` skips the check.
    pub to_state: Option<StateExpect>,
    /// A silent remote is tolerated: the wait is treated as satisfied and
    /// remembered as a timeout continuation.
    pub timeout_ok: bool,
    /// Payload re-issued on a timeout continuation.
    pub resend: Option<Vec<u8>>,
    /// Shared budget for resend and row-pattern retries.
    pub retry: u32,
    /// Screen row (negative from the bottom) asserted against `pattern`.
    pub row: i32,
    pub pattern: Option<String>,
}

impl MacroStep {
    pub fn send(bytes: &[u8], to: &[MenuKind]) -> Self {
        Self {
            send: StepSend::Bytes(bytes.to_vec()),
            in_state: Some(StateExpect::FromLast),
            to_state: Some(StateExpect::OneOf(to.to_vec())),
            timeout_ok: false,
            resend: None,
            retry: 0,
            row: 0,
            pattern: None,
        }
    }

    pub fn from_states(mut self, states: &[MenuKind]) -> Self {
        self.in_state = Some(StateExpect::OneOf(states.to_vec()));
        self
    }

    pub fn unchecked_entry(mut self) -> Self {
        self.in_state = None;
        self
    }

    pub fn per_state(map: &[(MenuKind, &[u8])], to: &[MenuKind]) -> Self {
        Self {
            send: StepSend::PerState(
                map.iter().map(|(k, b)| (*k, b.to_vec())).collect(),
            ),
            ..Self::send(b"", to)
        }
    }

    pub fn tolerate_timeout(mut self) -> Self {
        self.timeout_ok = true;
        self
    }

    pub fn resend_on_timeout(mut self, bytes: &[u8], retry: u32) -> Self {
        self.timeout_ok = true;
        self.resend = Some(bytes.to_vec());
        self.retry = retry;
        self
    }

    pub fn assert_row(mut self, row: i32, pattern: &str, retry: u32) -> Self {
        self.row = row;
        self.pattern = Some(pattern.to_string());
        self.retry = retry;
        self
    }
}

/// The onboarding sequence: park the session in a board, walk into a thread,
/// switch the reader to wrapped lines without header separators, then return
/// home. Mirrors the way a maintainer would hand-configure a fresh account.
pub fn reader_setup() -> Vec<MacroStep> {
    use MenuKind::*;
    vec![
        // searching from a hot-board list only moves the cursor, so enter
        // the search dialog explicitly
        MacroStep::send(b"s", &[SearchBoard]).from_states(&[BoardList, Board]),
        // the board name; a fresh account may get the onboarding screen
        MacroStep::send(b"pttnewhand\r", &[BoardList, Board, Waiting, Unknown]),
        // skip onboarding if it showed, or commit the board-list cursor
        MacroStep::per_state(
            &[
                (BoardList, b"\r"),
                (Waiting, b"\x1b[A"),
                (Unknown, b"\x1b[A"),
            ],
            &[Board],
        ),
        // entering from the list can still land on the onboarding screen
        MacroStep::send(b"\x1b[A", &[Board]),
        // open the thread at the cursor; page up and retry if it is deleted
        MacroStep::send(b"\r", &[Thread, Board]).resend_on_timeout(b"\x1b[5~", 5),
        MacroStep::send(b"o", &[ThreadOption]).from_states(&[Thread]),
        // 斷行符號: 顯示
        MacroStep::send(b"m", &[ThreadOption]).assert_row(-5, r"\*顯示", 3),
        // 文章標頭分隔線: 無
        MacroStep::send(b"l", &[ThreadOption]).assert_row(-4, r"\*無", 3),
        MacroStep::send(b" ", &[Thread]),
        MacroStep::send(b"\x1b[D", &[Board]),
        MacroStep::send(b"\x1a", &[QuickSwitch]),
        MacroStep::send(b"t", &[BoardList]),
    ]
}

/// Named scripts reachable from the command box.
pub fn by_name(name: &str) -> Option<Vec<MacroStep>> {
    match name {
        "reader-setup" => Some(reader_setup()),
        _ => None,
    }
}
