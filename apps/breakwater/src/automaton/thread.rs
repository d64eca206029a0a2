use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::content::ThreadContent;
use crate::input::ClientEvent;
use crate::proto::{Effects, MenuKind, ProxyEvent, TermQuery, TermRequest};
use crate::term::{ansi, ScreenSnapshot};

use super::dialogs::DialogSlot;
use super::is_waiting_screen;

static BROWSE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*瀏覽.+\(\ *?(\d+)%\)\s+目前顯示: 第 (\d+)~(\d+) 行").unwrap()
});

/// Floor badges are drawn right-aligned into this column, and only when the
/// client screen is wide enough to have free margin next to the 80-column
/// remote view.
const BADGE_MIN_COLUMNS: u16 = 86;
const BADGE_WIDTH: u16 = 5;
const BADGE_COL: u16 = BADGE_MIN_COLUMNS + 1 - BADGE_WIDTH;

/// One thread being read. Owns the reconstructed content while active; the
/// board takes it back when the view is abandoned.
pub struct ThreadMenu {
    board: String,
    pub content: ThreadContent,
    dialog: DialogSlot,
    last_event: ClientEvent,
    badges_drawn: bool,
    /// A sibling-thread jump was keyed; the next page belongs to a different
    /// thread and must not merge into this buffer.
    pending_switch: bool,
}

/// Parse of the reader's status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowseStatus {
    pub percent: u8,
    pub first: u32,
    pub last: u32,
}

impl BrowseStatus {
    pub fn at_end(&self) -> bool {
        self.percent == 100
    }
}

impl ThreadMenu {
    pub fn new(board: impl Into<String>, content: ThreadContent) -> Self {
        Self {
            board: board.into(),
            content,
            dialog: DialogSlot::new(MenuKind::Thread),
            last_event: ClientEvent::Unknown,
            badges_drawn: false,
            pending_switch: false,
        }
    }

    pub fn is_entered(screen: &ScreenSnapshot) -> Option<BrowseStatus> {
        let caps = BROWSE_RE.captures(screen.last_line())?;
        Some(BrowseStatus {
            percent: caps[1].parse().ok()?,
            first: caps[2].parse().ok()?,
            last: caps[3].parse().ok()?,
        })
    }

    pub fn current_kind(&self) -> MenuKind {
        self.dialog.active_kind().unwrap_or(MenuKind::Thread)
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn enter(&mut self, _screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        let resumed = q
            .query(TermRequest::SubmenuCached(MenuKind::Thread))
            .cached();
        debug!(target: "breakwater::automaton", board = %self.board, resumed, "thread entered");
        Vec::new()
    }

    pub fn client_event(&mut self, event: ClientEvent, q: &mut dyn TermQuery) -> Effects {
        self.last_event = event;

        if let Some(effects) = self.dialog.client_event(event, q) {
            return self.absorb(effects, q);
        }

        if self.content.is_prohibited(event) {
            debug!(target: "breakwater::automaton", event = %event.name(), "prohibited at boundary");
            return vec![ProxyEvent::DropContent];
        }

        if self.content.is_switch_event(event) {
            self.pending_switch = true;
        }

        match event {
            ClientEvent::Byte(b'o') => self.dialog.arm(MenuKind::ThreadOption),
            ClientEvent::Byte(b'h') => self.dialog.arm(MenuKind::HelpScreen),
            ClientEvent::Byte(b':') => self.dialog.arm(MenuKind::JumpToPosition),
            ClientEvent::Byte(b';') => {
                self.dialog.arm(MenuKind::CommandBox);
                // open immediately: the overlay is proxy-local, nothing will
                // repaint the screen for us
                return vec![ProxyEvent::DropContent];
            }
            ClientEvent::Byte(b'Q') => self.dialog.arm(MenuKind::ThreadInfo),
            _ => {}
        }
        Vec::new()
    }

    /// Runs against the screen still showing the previous page. Stale floor
    /// badges are wiped here, ahead of the repaint that will move them.
    pub fn pre_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        if self.badges_drawn
            && (self.content.is_update_event(self.last_event)
                || self.content.is_switch_event(self.last_event))
        {
            self.badges_drawn = false;
            let bytes = self.badge_bytes(screen, q, true);
            if !bytes.is_empty() {
                return vec![ProxyEvent::InsertToClient(bytes)];
            }
        }
        Vec::new()
    }

    pub fn post_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        // the command box is proxy-local: confirm an armed one even though no
        // repaint arrives; other dialogs confirm on the settled screen
        let slot = self.dialog.post_update(screen, q);
        if slot.consumed {
            return self.absorb(slot.effects, q);
        }
        let mut effects = self.absorb(slot.effects, q);

        if let Some(status) = Self::is_entered(screen) {
            if self.pending_switch {
                // still a reader screen, but a different thread: the owner
                // rotates the content and re-enters
                self.pending_switch = false;
                debug!(target: "breakwater::automaton", board = %self.board, "sibling thread jump");
                effects.push(ProxyEvent::Switch(MenuKind::Thread));
                return effects;
            }
            let page_rows = screen.rows.saturating_sub(1) as usize;
            let page: Vec<String> = screen.lines.iter().take(page_rows).cloned().collect();
            let outcome = self
                .content
                .view(&page, status.first, status.last, status.at_end());
            if outcome.wrap_missing {
                effects.push(ProxyEvent::Warning(
                    "line wrap continuation missing; content kept best-effort".into(),
                ));
            }
            if outcome.updated {
                let bytes = self.badge_bytes(screen, q, false);
                if !bytes.is_empty() {
                    self.badges_drawn = true;
                    effects.push(ProxyEvent::SendToClient(bytes));
                }
            }
            return effects;
        }

        if is_waiting_screen(screen) {
            // an input prompt covers the status row; no transition
            return effects;
        }

        debug!(target: "breakwater::automaton", board = %self.board, "thread left");
        effects.push(ProxyEvent::Return);
        effects
    }

    /// Fold annotation requests from a child dialog into content mutations;
    /// forward anything this level does not own.
    fn absorb(&mut self, effects: Effects, q: &mut dyn TermQuery) -> Effects {
        let mut out = Vec::with_capacity(effects.len());
        for event in effects {
            match event {
                ProxyEvent::BanFloor(floor) => match self.content.ban_floor(floor) {
                    Some(ban) => {
                        out.push(ProxyEvent::BannedLine(ban.original.clone()));
                        out.extend(self.redraw_line(ban.line, q));
                    }
                    None => out.push(ProxyEvent::Warning(format!("no such floor: {floor}"))),
                },
                ProxyEvent::UnbanFloor(floor) => match self.content.unban_floor(floor) {
                    Some(ban) => out.extend(self.redraw_line(ban.line, q)),
                    None => out.push(ProxyEvent::Warning(format!("floor not banned: {floor}"))),
                },
                ProxyEvent::SetGround(line) => {
                    self.content.set_ground(line);
                    out.push(ProxyEvent::Warning(format!("ground line set to {line}")));
                }
                ProxyEvent::GetGround => {
                    let text = match self.content.ground() {
                        Some(line) => format!("ground line: {line}"),
                        None => "ground line not located yet".to_string(),
                    };
                    out.push(ProxyEvent::Warning(text));
                }
                ProxyEvent::ThreadUrl(url) => {
                    self.content.set_url(url.clone());
                    out.push(ProxyEvent::ThreadUrl(url));
                }
                other => out.push(other),
            }
        }
        out
    }

    /// Repaint one thread line on the client if it is inside the current
    /// view window.
    fn redraw_line(&self, line: u32, _q: &mut dyn TermQuery) -> Effects {
        let (first, last, last_row) = self.content.view_window();
        if line < first || line > last {
            return Vec::new();
        }
        let row = last_row - (last - line) as u16;
        let text = self.content.line(line).unwrap_or("").to_string();
        let mut bytes = ansi::goto(row, 1);
        bytes.extend_from_slice(b"\x1b[K");
        bytes.extend_from_slice(&crate::term::encode_big5(&text));
        vec![ProxyEvent::SendToClient(bytes)]
    }

    /// Bytes that draw (or, with `clear`, blank) the floor badges for the
    /// current view window, ending with a cursor restore.
    fn badge_bytes(&self, screen: &ScreenSnapshot, q: &mut dyn TermQuery, clear: bool) -> Vec<u8> {
        let columns = q.query(TermRequest::ScreenColumns).columns();
        if columns < BADGE_MIN_COLUMNS {
            return Vec::new();
        }

        let (first, last, last_row) = self.content.view_window();
        if last == 0 {
            return Vec::new();
        }

        let mut data = Vec::new();
        for line in (first..=last).rev() {
            let Some(floor) = self.content.floor_of_line(line) else {
                continue;
            };
            let offset = (last - line) as u16;
            if offset >= last_row {
                continue;
            }
            let row = last_row - offset;
            let badge = if clear {
                " ".repeat(BADGE_WIDTH as usize)
            } else {
                format!("{floor:^width$}", width = BADGE_WIDTH as usize)
            };
            data.extend_from_slice(&ansi::goto(row, BADGE_COL));
            data.extend_from_slice(badge.as_bytes());
        }
        if data.is_empty() {
            return data;
        }
        data.extend_from_slice(&ansi::goto(screen.cursor_row, screen.cursor_col));
        data
    }

    pub fn describe(&self, out: &mut String) {
        use std::fmt::Write as _;
        let (first, last, _) = self.content.view_window();
        let _ = writeln!(
            out,
            "thread in {}: {} lines, viewing {}~{}, url {:?}",
            self.board,
            self.content.line_count(),
            first,
            last,
            self.content.url()
        );
        if self.content.line_count() > 0 {
            let _ = writeln!(out, "{}", self.content.text(1, 3));
            let _ = writeln!(out, "...");
            let _ = writeln!(out, "{}", self.content.text(-3, -1));
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TermReply;
    use crate::term::{Emulator, MockEmulator};

    struct WideQuery {
        emu: MockEmulator,
    }

    impl TermQuery for WideQuery {
        fn query(&mut self, request: TermRequest) -> TermReply {
            match request {
                TermRequest::ScreenColumns => TermReply::Columns(self.emu.columns),
                TermRequest::CursorBackground => TermReply::Background(self.emu.cursor_bg),
                TermRequest::ScreenData(region) => {
                    TermReply::ScreenData(self.emu.screen_data(&region))
                }
                TermRequest::SubmenuCached(_) => TermReply::Cached(false),
            }
        }
    }

    fn reader_screen(emu: &mut MockEmulator, first: u32, last: u32, percent: u8) {
        let rows = [
            "作者 author () 看板 Test",
            "標題 [問題] something",
            "body line",
            "--",
            "※ 發信站: 批踢踢實業坊(ptt.cc), 來自: 1.2.3.4",
            "※ 文章網址: https://www.ptt.cc/bbs/Test/G.1.A.001.html",
            "推 alice: first",
            "→ bob: second",
            "噓 carol: third",
        ];
        emu.set_screen(&rows);
        emu.set_last_line(&format!(
            "  瀏覽 第 1/1 頁 ({percent}%)  目前顯示: 第 {first}~{last} 行"
        ));
    }

    fn setup() -> (ThreadMenu, WideQuery) {
        let menu = ThreadMenu::new("Test", ThreadContent::new());
        let mut emu = MockEmulator::new(120, 24);
        reader_screen(&mut emu, 1, 9, 100);
        (menu, WideQuery { emu })
    }

    #[test]
    fn browse_status_parses() {
        let (_, q) = setup();
        let status = ThreadMenu::is_entered(&q.emu.snapshot()).expect("status row");
        assert_eq!(
            status,
            BrowseStatus {
                percent: 100,
                first: 1,
                last: 9
            }
        );
        assert!(status.at_end());
    }

    #[test]
    fn view_draws_floor_badges_on_wide_screens() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        let effects = menu.post_update(&screen, &mut q);
        let sent: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                ProxyEvent::SendToClient(b) => Some(b.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(sent.len(), 1);
        let text = String::from_utf8(sent[0].clone()).unwrap();
        // floors 1..=3 on page rows 7..=9, badge column 82
        assert!(text.contains("\x1b[7;82H"));
        assert!(text.contains("\x1b[9;82H"));
        assert!(text.contains("  1  "));
        assert!(text.contains("  3  "));
    }

    #[test]
    fn no_badges_on_narrow_screens() {
        let (mut menu, mut q) = setup();
        q.emu.columns = 80;
        let screen = q.emu.snapshot();
        let effects = menu.post_update(&screen, &mut q);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, ProxyEvent::SendToClient(_))));
    }

    #[test]
    fn badges_cleared_before_scroll() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        menu.post_update(&screen, &mut q);

        menu.client_event(ClientEvent::PgDn, &mut q);
        let effects = menu.pre_update(&screen, &mut q);
        let inserted: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                ProxyEvent::InsertToClient(b) => Some(b.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(inserted.len(), 1);
        let text = String::from_utf8(inserted[0].clone()).unwrap();
        assert!(text.contains("\x1b[9;82H     "));
    }

    #[test]
    fn up_at_begin_drops_the_keystroke() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        menu.post_update(&screen, &mut q);
        let effects = menu.client_event(ClientEvent::Up, &mut q);
        assert_eq!(effects, vec![ProxyEvent::DropContent]);
    }

    #[test]
    fn leaving_the_reader_returns() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        menu.post_update(&screen, &mut q);

        q.emu.set_screen(&["  【板主:mod】  看板《Test》"]);
        q.emu
            .set_last_line("  文章選讀  (y)回應(X)推文");
        let effects = menu.post_update(&q.emu.snapshot(), &mut q);
        assert!(effects.contains(&ProxyEvent::Return));
    }

    #[test]
    fn waiting_prompt_is_not_an_exit() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        menu.post_update(&screen, &mut q);

        q.emu.set_last_line("  請按任意鍵繼續");
        let effects = menu.post_update(&q.emu.snapshot(), &mut q);
        assert!(!effects.contains(&ProxyEvent::Return));
    }

    #[test]
    fn sibling_jump_signals_switch_instead_of_merging() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        menu.post_update(&screen, &mut q);
        assert_eq!(menu.content.line_count(), 9);

        // 'f' jumps straight to another thread; the next reader page must
        // not be folded into this buffer
        menu.client_event(ClientEvent::Byte(b'f'), &mut q);
        let effects = menu.post_update(&screen, &mut q);
        assert!(effects.contains(&ProxyEvent::Switch(MenuKind::Thread)));
        assert_eq!(menu.content.line_count(), 9);
    }

    #[test]
    fn ban_via_command_box_redacts_and_redraws() {
        let (mut menu, mut q) = setup();
        let screen = q.emu.snapshot();
        menu.post_update(&screen, &mut q);

        // open the command box and ban floor 1
        menu.client_event(ClientEvent::Byte(b';'), &mut q);
        menu.post_update(&screen, &mut q);
        for b in b"ban 1".iter() {
            menu.client_event(ClientEvent::Byte(*b), &mut q);
        }
        let effects = menu.client_event(ClientEvent::Enter, &mut q);
        assert!(effects
            .iter()
            .any(|e| matches!(e, ProxyEvent::BannedLine(t) if t == "推 alice: first")));
        assert!(effects
            .iter()
            .any(|e| matches!(e, ProxyEvent::SendToClient(_))));
        assert_ne!(menu.content.line(7).unwrap(), "推 alice: first");
    }
}
