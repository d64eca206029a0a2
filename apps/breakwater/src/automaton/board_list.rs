use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::input::ClientEvent;
use crate::proto::{Effects, MenuKind, ProxyEvent, TermQuery};
use crate::term::ScreenSnapshot;

use super::dialogs::DialogSlot;
use super::is_waiting_screen;

/// Top-level panels all behave like the board list for our purposes: a menu
/// of entries with a cursor, leading to boards.
const PANEL_TITLES: [&str; 5] = [
    "【主功能表】",
    "【分類看板】",
    "【看板列表】",
    "【 選擇看板 】",
    "【個人設定】",
];

static PANEL_LAST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*選擇看板").unwrap());

/// The board list / top panel context.
pub struct BoardListMenu {
    dialog: DialogSlot,
    cursor_line: String,
}

impl BoardListMenu {
    pub fn new() -> Self {
        Self {
            dialog: DialogSlot::new(MenuKind::BoardList),
            cursor_line: String::new(),
        }
    }

    pub fn is_entered(screen: &ScreenSnapshot) -> bool {
        let first = screen.first_line().trim_start();
        PANEL_TITLES.iter().any(|title| first.starts_with(title))
            || PANEL_LAST_RE.is_match(screen.last_line())
    }

    pub fn current_kind(&self) -> MenuKind {
        self.dialog.active_kind().unwrap_or(MenuKind::BoardList)
    }

    pub fn cursor_line(&self) -> &str {
        &self.cursor_line
    }

    pub fn enter(&mut self, screen: &ScreenSnapshot, _q: &mut dyn TermQuery) -> Effects {
        self.cursor_line = screen.cursor_line().to_string();
        debug!(target: "breakwater::automaton", "board list entered");
        Vec::new()
    }

    pub fn client_event(&mut self, event: ClientEvent, q: &mut dyn TermQuery) -> Effects {
        if let Some(effects) = self.dialog.client_event(event, q) {
            return effects;
        }
        match event {
            ClientEvent::Ctrl(b'Z') => self.dialog.arm(MenuKind::QuickSwitch),
            ClientEvent::Ctrl(b'S') | ClientEvent::Byte(b's') => {
                self.dialog.arm(MenuKind::SearchBoard)
            }
            ClientEvent::Byte(b'h') => self.dialog.arm(MenuKind::HelpScreen),
            ClientEvent::Byte(b'/') => self.dialog.arm(MenuKind::SearchBox),
            ClientEvent::Byte(b'1'..=b'9') => self.dialog.arm(MenuKind::JumpToPosition),
            ClientEvent::Byte(b';') => {
                self.dialog.arm(MenuKind::CommandBox);
                return vec![ProxyEvent::DropContent];
            }
            _ => {}
        }
        Vec::new()
    }

    pub fn pre_update(&mut self, screen: &ScreenSnapshot, _q: &mut dyn TermQuery) -> Effects {
        self.cursor_line = screen.cursor_line().to_string();
        Vec::new()
    }

    pub fn post_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        let slot = self.dialog.post_update(screen, q);
        if slot.consumed {
            return slot.effects;
        }
        let mut effects = slot.effects;

        if Self::is_entered(screen) {
            if screen.cursor_line().starts_with('>') {
                self.cursor_line = screen.cursor_line().to_string();
            }
            return effects;
        }
        if is_waiting_screen(screen) {
            return effects;
        }

        debug!(target: "breakwater::automaton", "board list left");
        effects.push(ProxyEvent::Return);
        effects
    }

    pub fn describe(&self, out: &mut String) {
        use std::fmt::Write as _;
        let _ = writeln!(out, "board list, cursor at '{}'", self.cursor_line.trim_end());
    }
}

impl Default for BoardListMenu {
    fn default() -> Self {
        Self::new()
    }
}
