//! The menu state machine: a tree of recognized remote UI contexts.
//!
//! Two-phase update per unit of server output: `pre_update` runs against the
//! screen before freshly buffered bytes apply (capturing facts the repaint
//! will destroy), `post_update` against the settled screen (detecting the
//! context now displayed). While a child is active its parent forwards both
//! phases to it first; only after the child reports `Return` does the parent
//! re-evaluate its own pattern.

mod board;
mod board_list;
mod dialogs;
mod thread;

pub use board::{BoardMenu, BoardStats};
pub use board_list::BoardListMenu;
pub use dialogs::{CommandBox, Dialog, DialogSlot, ThreadInfo};
pub use thread::{BrowseStatus, ThreadMenu};

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use breakwater_archive::ThreadRecord;

use crate::input::ClientEvent;
use crate::proto::{Effects, MenuKind, ProxyEvent, TermQuery, TermReply, TermRequest};
use crate::term::ScreenSnapshot;

static WAITING_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^.+請?按.+鍵.*繼續",
        r"^請選擇",
        r"^搜尋",
        r"^\s*★快速切換",
        r"^\s*跳至第幾[項行]:",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static BOARD_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+作者\s+.+看板\s+([\w-]+)\s*$").unwrap());

/// The last row shows an input prompt: no context transition, the screen is
/// mid-interaction.
pub fn is_waiting_screen(screen: &ScreenSnapshot) -> bool {
    let last = screen.last_line();
    WAITING_RES.iter().any(|re| re.is_match(last))
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Active {
    #[default]
    None,
    BoardList,
    Board(String),
}

/// Per-session root of the menu tree. Owns the board cache; boards own their
/// thread caches in turn. No state outlives the session.
#[derive(Default)]
pub struct SessionAutomaton {
    board_list: BoardListMenu,
    boards: HashMap<String, BoardMenu>,
    active: Active,
    classified: MenuKind,
}

impl SessionAutomaton {
    pub fn new() -> Self {
        Self {
            board_list: BoardListMenu::new(),
            boards: HashMap::new(),
            active: Active::None,
            classified: MenuKind::Unknown,
        }
    }

    /// Deepest currently-active context; `Waiting`/`Unknown` when no pattern
    /// matched.
    pub fn current_kind(&self) -> MenuKind {
        match &self.active {
            Active::Board(name) => self
                .boards
                .get(name)
                .map(BoardMenu::current_kind)
                .unwrap_or(MenuKind::Unknown),
            Active::BoardList => self.board_list.current_kind(),
            Active::None => self.classified,
        }
    }

    /// Thread records closed out since the last drain, ready for the
    /// archivist.
    pub fn drain_records(&mut self) -> Vec<ThreadRecord> {
        self.boards
            .values_mut()
            .flat_map(BoardMenu::take_records)
            .collect()
    }

    pub fn client_event(&mut self, event: ClientEvent, q: &mut dyn TermQuery) -> Effects {
        debug!(target: "breakwater::automaton", event = %event.name(), "client event");
        match self.active.clone() {
            Active::Board(name) => match self.boards.get_mut(&name) {
                Some(board) => board.client_event(event, q),
                None => Vec::new(),
            },
            Active::BoardList => self.board_list.client_event(event, q),
            Active::None => Vec::new(),
        }
    }

    pub fn pre_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        match self.active.clone() {
            Active::Board(name) => match self.boards.get_mut(&name) {
                Some(board) => board.pre_update(screen, q),
                None => Vec::new(),
            },
            Active::BoardList => self.board_list.pre_update(screen, q),
            Active::None => Vec::new(),
        }
    }

    pub fn post_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        let mut effects = Vec::new();

        // active context first; only a Return lets us re-classify
        match self.active.clone() {
            Active::Board(name) => {
                if let Some(board) = self.boards.get_mut(&name) {
                    let child = board.post_update(screen, q);
                    let mut left = false;
                    for event in child {
                        match event {
                            ProxyEvent::Return => left = true,
                            ProxyEvent::Switch(_) => left = true,
                            other => effects.push(other),
                        }
                    }
                    if left {
                        self.active = Active::None;
                    }
                }
            }
            Active::BoardList => {
                let child = self.board_list.post_update(screen, q);
                let mut left = false;
                for event in child {
                    match event {
                        ProxyEvent::Return | ProxyEvent::Switch(_) => left = true,
                        other => effects.push(other),
                    }
                }
                if left {
                    self.active = Active::None;
                }
            }
            Active::None => {}
        }

        if self.active == Active::None {
            effects.extend(self.detect(screen, q));
        }
        effects
    }

    /// Classify an unowned screen, most specific pattern first: a board
    /// listing, a thread view (attributable through its header row), the top
    /// panels, then the waiting prompts.
    fn detect(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        if let Some(name) = BoardMenu::is_entered(screen) {
            let name = if name.is_empty() {
                "(unnamed)".to_string()
            } else {
                name
            };
            return self.activate_board(name, screen, q);
        }

        if ThreadMenu::is_entered(screen).is_some() {
            if let Some(caps) = BOARD_HEADER_RE.captures(screen.first_line()) {
                let name = caps[1].to_string();
                return self.activate_board(name, screen, q);
            }
            // a thread page with no header in sight; wait for one
            self.classified = MenuKind::Unknown;
            return Vec::new();
        }

        if BoardListMenu::is_entered(screen) {
            self.active = Active::BoardList;
            self.classified = MenuKind::BoardList;
            let mut effects = self.board_list.enter(screen, q);
            effects.extend(self.board_list.post_update(screen, q));
            return effects;
        }

        self.classified = if is_waiting_screen(screen) {
            debug!(target: "breakwater::automaton", "waiting for input");
            MenuKind::Waiting
        } else {
            MenuKind::Unknown
        };
        Vec::new()
    }

    fn activate_board(
        &mut self,
        name: String,
        screen: &ScreenSnapshot,
        q: &mut dyn TermQuery,
    ) -> Effects {
        let cached = self.boards.contains_key(&name);
        let board = self
            .boards
            .entry(name.clone())
            .or_insert_with(|| BoardMenu::new(name.clone()));
        let mut chained = CacheAnswer {
            cached,
            kind: MenuKind::Board,
            upstream: q,
        };
        let mut effects = board.enter(screen, &mut chained);
        effects.extend(board.post_update(screen, &mut chained));
        self.active = Active::Board(name);
        self.classified = MenuKind::Board;
        effects
    }

    /// Operator dump: the active context path and its interesting state.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        match &self.active {
            Active::Board(name) => {
                if let Some(board) = self.boards.get(name) {
                    board.describe(&mut out);
                }
            }
            Active::BoardList => self.board_list.describe(&mut out),
            Active::None => {
                use std::fmt::Write as _;
                let _ = writeln!(out, "no active context ({})", self.classified.name());
            }
        }
        out
    }
}

/// Answers a child's submenu-cache request at this level; everything else
/// delegates to the owner above. This is the reply slot of the request /
/// response protocol threaded through the menu chain.
pub(crate) struct CacheAnswer<'a> {
    pub cached: bool,
    pub kind: MenuKind,
    pub upstream: &'a mut dyn TermQuery,
}

impl TermQuery for CacheAnswer<'_> {
    fn query(&mut self, request: TermRequest) -> TermReply {
        match request {
            TermRequest::SubmenuCached(kind) if kind == self.kind => TermReply::Cached(self.cached),
            other => self.upstream.query(other),
        }
    }
}
