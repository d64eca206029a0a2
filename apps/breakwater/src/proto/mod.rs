//! The event/effect protocol spoken between nesting levels of the menu
//! machine and the session that owns them.
//!
//! Update routines return a sequence of [`ProxyEvent`]s to their caller; a
//! routine that is not prepared to act on an event forwards it upward.
//! Terminal facts are a separate request/response channel ([`TermRequest`] /
//! [`TermReply`]) answered synchronously through the [`TermQuery`] chain, so
//! a routine gets its reply before it resumes.

use crate::input::ClientEvent;

/// Every recognized remote UI context, plus the proxy-local command overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MenuKind {
    BoardList,
    Board,
    Thread,
    SearchBoard,
    SearchBox,
    HelpScreen,
    QuickSwitch,
    ThreadInfo,
    JumpToPosition,
    ThreadOption,
    CommandBox,
    /// The last row shows an input prompt; no context transition happens.
    Waiting,
    #[default]
    Unknown,
}

impl MenuKind {
    pub fn name(self) -> &'static str {
        match self {
            MenuKind::BoardList => "board-list",
            MenuKind::Board => "board",
            MenuKind::Thread => "thread",
            MenuKind::SearchBoard => "search-board",
            MenuKind::SearchBox => "search-box",
            MenuKind::HelpScreen => "help-screen",
            MenuKind::QuickSwitch => "quick-switch",
            MenuKind::ThreadInfo => "thread-info",
            MenuKind::JumpToPosition => "jump-to-position",
            MenuKind::ThreadOption => "thread-option",
            MenuKind::CommandBox => "command-box",
            MenuKind::Waiting => "waiting",
            MenuKind::Unknown => "unknown",
        }
    }
}

/// Basic ANSI colors, enough to classify a cursor cell's background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnsiColor {
    #[default]
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl AnsiColor {
    pub fn fg_code(self) -> u8 {
        match self {
            AnsiColor::Default => 39,
            AnsiColor::Black => 30,
            AnsiColor::Red => 31,
            AnsiColor::Green => 32,
            AnsiColor::Yellow => 33,
            AnsiColor::Blue => 34,
            AnsiColor::Magenta => 35,
            AnsiColor::Cyan => 36,
            AnsiColor::White => 37,
        }
    }

    pub fn bg_code(self) -> u8 {
        self.fg_code() + 10
    }
}

/// Placement and rendition for text drawn onto the client screen, and the
/// region addressed by a screen-data request. Rows are 1-based; negative rows
/// count from the bottom of the screen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientContext {
    pub row: i32,
    pub col: u16,
    pub text: Option<String>,
    pub fg: Option<AnsiColor>,
    pub bg: Option<AnsiColor>,
    pub bold: bool,
    /// Cell count for screen-data requests.
    pub length: u16,
}

impl ClientContext {
    pub fn at(row: i32, col: u16) -> Self {
        Self {
            row,
            col,
            ..Self::default()
        }
    }

    pub fn text(row: i32, col: u16, text: impl Into<String>) -> Self {
        Self {
            row,
            col,
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn styled(mut self, fg: AnsiColor, bg: AnsiColor, bold: bool) -> Self {
        self.fg = Some(fg);
        self.bg = Some(bg);
        self.bold = bold;
        self
    }

    pub fn span(row: i32, col: u16, length: u16) -> Self {
        Self {
            row,
            col,
            length,
            ..Self::default()
        }
    }
}

/// The tagged effect vocabulary exchanged across nesting levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    True,
    False,
    Ok,

    /// Stop relaying server bytes to the client for `0` (until resumed) or
    /// the given number of seconds; the virtual terminal keeps feeding.
    CutStream(u32),
    ResumeStream,

    DropContent,
    ReplaceContent(Vec<u8>),
    InsertToClient(Vec<u8>),
    SendToClient(Vec<u8>),
    InsertToServer(Vec<u8>),
    SendToServer(Vec<u8>),

    BoardName(String),
    ThreadUrl(String),
    BanFloor(u32),
    UnbanFloor(u32),
    BannedLine(String),
    SetGround(u32),
    GetGround,

    DrawClient(ClientContext),
    DrawCursor,
    ResetRendition,

    /// The emitting menu has exited; consumed by its parent.
    Return,
    /// Direct sibling-to-sibling transition without returning to the parent.
    Switch(MenuKind),

    RunMacro(String),
    Warning(String),
}

impl ProxyEvent {
    pub fn send_event_to_server(event: ClientEvent) -> Self {
        ProxyEvent::SendToServer(event.wire_bytes())
    }
}

/// Sequence of effects returned by one update routine.
pub type Effects = Vec<ProxyEvent>;

/// Terminal facts a menu may need mid-update. Each request pairs with the
/// reply variant of the same shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermRequest {
    ScreenColumns,
    CursorBackground,
    ScreenData(ClientContext),
    SubmenuCached(MenuKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermReply {
    Columns(u16),
    Background(AnsiColor),
    ScreenData(Vec<u8>),
    Cached(bool),
}

impl TermReply {
    pub fn columns(&self) -> u16 {
        match self {
            TermReply::Columns(n) => *n,
            _ => 0,
        }
    }

    pub fn background(&self) -> AnsiColor {
        match self {
            TermReply::Background(c) => *c,
            _ => AnsiColor::Default,
        }
    }

    pub fn screen_data(self) -> Vec<u8> {
        match self {
            TermReply::ScreenData(bytes) => bytes,
            _ => Vec::new(),
        }
    }

    pub fn cached(&self) -> bool {
        matches!(self, TermReply::Cached(true))
    }
}

/// A level able to answer terminal-fact requests. Parents wrap the query they
/// received so they can intercept the requests they own (submenu caches)
/// before delegating the rest to their own owner.
pub trait TermQuery {
    fn query(&mut self, request: TermRequest) -> TermReply;
}

/// What finally happens to one client chunk after the menu machine has seen
/// every event decoded from it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ChunkAction {
    #[default]
    Forward,
    Drop,
    Replace(Vec<u8>),
}

impl ChunkAction {
    /// Fold one more effect into the chunk's fate. Drop and Replace win over
    /// Forward; a later Replace refines an earlier Drop.
    pub fn absorb(&mut self, event: &ProxyEvent) {
        match event {
            ProxyEvent::DropContent => {
                if matches!(self, ChunkAction::Forward) {
                    *self = ChunkAction::Drop;
                }
            }
            ProxyEvent::ReplaceContent(bytes) => {
                *self = ChunkAction::Replace(bytes.clone());
            }
            _ => {}
        }
    }
}
