//! Leaf dialog menus: transient overlays recognized on top of a board list,
//! board or thread context. Each one knows its own screen pattern and exits
//! by emitting `Return` once the pattern is gone.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use breakwater_archive::ArticleId;

use crate::input::ClientEvent;
use crate::proto::{
    AnsiColor, ClientContext, Effects, MenuKind, ProxyEvent, TermQuery, TermRequest,
};
use crate::term::ScreenSnapshot;

static JUMP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*跳至第幾[項行]:").unwrap());
static SEARCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*搜尋").unwrap());
static AID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"#([0-9A-Za-z_-]{8})").unwrap());

/// The closed set of dialog overlays.
pub enum Dialog {
    SearchBoard(SearchBoard),
    SearchBox(SearchBox),
    HelpScreen(HelpScreen),
    QuickSwitch(QuickSwitch),
    ThreadInfo(ThreadInfo),
    JumpToPosition(JumpToPosition),
    ThreadOption(ThreadOption),
    CommandBox(CommandBox),
}

impl Dialog {
    pub fn kind(&self) -> MenuKind {
        match self {
            Dialog::SearchBoard(_) => MenuKind::SearchBoard,
            Dialog::SearchBox(_) => MenuKind::SearchBox,
            Dialog::HelpScreen(_) => MenuKind::HelpScreen,
            Dialog::QuickSwitch(_) => MenuKind::QuickSwitch,
            Dialog::ThreadInfo(_) => MenuKind::ThreadInfo,
            Dialog::JumpToPosition(_) => MenuKind::JumpToPosition,
            Dialog::ThreadOption(_) => MenuKind::ThreadOption,
            Dialog::CommandBox(_) => MenuKind::CommandBox,
        }
    }

    /// Pattern check for a dialog kind against the settled screen. The
    /// command box is proxy-local and always recognized once armed.
    pub fn is_entered(kind: MenuKind, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> bool {
        match kind {
            MenuKind::SearchBoard => SearchBoard::is_entered(screen),
            MenuKind::SearchBox => SearchBox::is_entered(screen, q),
            MenuKind::HelpScreen => HelpScreen::is_entered(screen),
            MenuKind::QuickSwitch => QuickSwitch::is_entered(screen, q),
            MenuKind::ThreadInfo => ThreadInfo::extract_url(screen).is_some(),
            MenuKind::JumpToPosition => JumpToPosition::is_entered(screen),
            MenuKind::ThreadOption => ThreadOption::is_entered(screen),
            MenuKind::CommandBox => true,
            _ => false,
        }
    }

    pub fn create(kind: MenuKind, host: MenuKind) -> Option<Dialog> {
        Some(match kind {
            MenuKind::SearchBoard => Dialog::SearchBoard(SearchBoard),
            MenuKind::SearchBox => Dialog::SearchBox(SearchBox),
            MenuKind::HelpScreen => Dialog::HelpScreen(HelpScreen),
            MenuKind::QuickSwitch => Dialog::QuickSwitch(QuickSwitch),
            MenuKind::ThreadInfo => Dialog::ThreadInfo(ThreadInfo),
            MenuKind::JumpToPosition => Dialog::JumpToPosition(JumpToPosition),
            MenuKind::ThreadOption => Dialog::ThreadOption(ThreadOption),
            MenuKind::CommandBox => Dialog::CommandBox(CommandBox::new(host)),
            _ => return None,
        })
    }

    pub fn enter(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        debug!(target: "breakwater::automaton", dialog = self.kind().name(), "entered");
        match self {
            Dialog::ThreadInfo(info) => info.enter(screen),
            Dialog::CommandBox(cmd) => cmd.enter(q),
            _ => Vec::new(),
        }
    }

    pub fn client_event(&mut self, event: ClientEvent, _q: &mut dyn TermQuery) -> Effects {
        match self {
            Dialog::CommandBox(cmd) => cmd.client_event(event),
            _ => Vec::new(),
        }
    }

    pub fn post_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> Effects {
        let kind = self.kind();
        match self {
            Dialog::CommandBox(_) => Vec::new(), // exits on its own Enter key
            Dialog::SearchBoard(_) => {
                if !SearchBoard::is_entered(screen) {
                    debug!(target: "breakwater::automaton", dialog = kind.name(), "left");
                    // a committed search can land the cursor in a different
                    // board; let the owner re-detect instead of resuming
                    vec![ProxyEvent::Return, ProxyEvent::Switch(MenuKind::Board)]
                } else {
                    Vec::new()
                }
            }
            _ => {
                if !Dialog::is_entered(kind, screen, q) {
                    debug!(target: "breakwater::automaton", dialog = kind.name(), "left");
                    vec![ProxyEvent::Return]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

pub struct SearchBoard;

impl SearchBoard {
    pub fn is_entered(screen: &ScreenSnapshot) -> bool {
        (screen.first_line().starts_with("【 搜尋全站看板 】")
            || screen.first_line().starts_with("【 選擇看板 】"))
            && screen.line(2).starts_with("請輸入看板名稱")
    }
}

pub struct HelpScreen;

impl HelpScreen {
    pub fn is_entered(screen: &ScreenSnapshot) -> bool {
        let first = screen.first_line();
        (first.starts_with("【 看板選單輔助說明 】")
            || first.starts_with("【基本命令】")
            || first.contains("瀏覽程式使用說明"))
            && screen.last_line().contains("請按 空白鍵 繼續")
    }
}

/// The Ctrl-Z overlay. The prompt row reuses ordinary text, so the predicate
/// also requires the highlighted cursor cell the overlay paints.
pub struct QuickSwitch;

impl QuickSwitch {
    pub fn is_entered(screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> bool {
        let on_prompt = screen.cursor_line().trim_start().starts_with("★快速切換");
        on_prompt
            && q.query(TermRequest::CursorBackground).background() != AnsiColor::Default
    }
}

pub struct SearchBox;

impl SearchBox {
    pub fn is_entered(screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> bool {
        SEARCH_RE.is_match(screen.last_line())
            && q.query(TermRequest::CursorBackground).background() != AnsiColor::Default
    }
}

pub struct JumpToPosition;

impl JumpToPosition {
    pub fn is_entered(screen: &ScreenSnapshot) -> bool {
        JUMP_RE.is_match(screen.last_line())
    }
}

/// The reader's option box (`o` inside a thread).
pub struct ThreadOption;

impl ThreadOption {
    pub fn is_entered(screen: &ScreenSnapshot) -> bool {
        screen.line(-5).contains("斷行符號") || screen.line(-4).contains("文章標頭分隔線")
    }
}

/// The article-info box: carries the thread's canonical URL and its compact
/// ID. The URL is only trusted when the ID recomputes from it.
pub struct ThreadInfo;

impl ThreadInfo {
    /// Scan the box and return the validated URL.
    pub fn extract_url(screen: &ScreenSnapshot) -> Option<String> {
        let rows = screen.rows as usize;
        // the box spans at least 4 rows
        for i in 2..rows.saturating_sub(4) {
            let aid_line = screen.line(i as i32 + 1);
            if !aid_line.starts_with("│ 文章代碼(AID):") {
                continue;
            }
            let url_line = screen.line(i as i32 + 2);
            if !url_line.starts_with("│ 文章網址:") {
                continue;
            }
            let url = url_line
                .trim_start_matches("│ 文章網址:")
                .trim()
                .trim_end_matches('│')
                .trim()
                .to_string();
            let aidc = AID_RE.captures(aid_line).map(|c| c[1].to_string());
            let id = ArticleId::from_url(&url);
            if let (Some(aidc), Some(id)) = (aidc, id) {
                if id.compact == aidc {
                    return Some(url);
                }
            }
        }
        None
    }

    fn enter(&mut self, screen: &ScreenSnapshot) -> Effects {
        match ThreadInfo::extract_url(screen) {
            Some(url) => vec![ProxyEvent::ThreadUrl(url)],
            None => Vec::new(),
        }
    }
}

/// Proxy-local command line drawn over the bottom row. The stream toward the
/// client is cut while it is open so a server repaint cannot tear the prompt.
pub struct CommandBox {
    host: MenuKind,
    input: String,
    saved_row: Vec<u8>,
}

const COMMAND_ROW: i32 = -1;
const COMMAND_COL: u16 = 60;
const COMMAND_PROMPT: &str = "Command:";

impl CommandBox {
    pub fn new(host: MenuKind) -> Self {
        Self {
            host,
            input: String::new(),
            saved_row: Vec::new(),
        }
    }

    fn max_len(&self) -> usize {
        (COMMAND_COL as usize) - COMMAND_PROMPT.len()
    }

    fn enter(&mut self, q: &mut dyn TermQuery) -> Effects {
        self.saved_row = q
            .query(TermRequest::ScreenData(ClientContext::span(
                COMMAND_ROW,
                1,
                COMMAND_COL,
            )))
            .screen_data();

        let prompt_end = COMMAND_PROMPT.len() as u16 + 1;
        vec![
            ProxyEvent::CutStream(0),
            ProxyEvent::DrawClient(
                ClientContext::text(COMMAND_ROW, 1, COMMAND_PROMPT).styled(
                    AnsiColor::White,
                    AnsiColor::Black,
                    false,
                ),
            ),
            ProxyEvent::DrawClient(
                ClientContext::text(COMMAND_ROW, prompt_end, " ".repeat(self.max_len())).styled(
                    AnsiColor::White,
                    AnsiColor::Black,
                    true,
                ),
            ),
            ProxyEvent::DrawClient(ClientContext::at(COMMAND_ROW, prompt_end)),
        ]
    }

    fn exit(&mut self) -> Effects {
        vec![
            ProxyEvent::SendToClient(std::mem::take(&mut self.saved_row)),
            ProxyEvent::ResetRendition,
            ProxyEvent::DrawCursor,
            ProxyEvent::ResumeStream,
            ProxyEvent::Return,
        ]
    }

    fn client_event(&mut self, event: ClientEvent) -> Effects {
        match event {
            ClientEvent::Byte(b) => {
                let mut out = vec![ProxyEvent::DropContent];
                if self.input.len() < self.max_len() {
                    self.input.push(b as char);
                    out.push(ProxyEvent::SendToClient(vec![b])); // echo
                }
                out
            }
            ClientEvent::Backspace => {
                let mut out = vec![ProxyEvent::DropContent];
                if self.input.pop().is_some() {
                    out.push(ProxyEvent::SendToClient(b"\x08 \x08".to_vec()));
                }
                out
            }
            ClientEvent::Enter => {
                let mut out = vec![ProxyEvent::DropContent];
                out.extend(self.run_command());
                out.extend(self.exit());
                out
            }
            _ => vec![ProxyEvent::DropContent],
        }
    }

    fn run_command(&mut self) -> Effects {
        let input = std::mem::take(&mut self.input);
        let input = input.trim();
        if input.is_empty() {
            return Vec::new();
        }
        debug!(target: "breakwater::automaton", host = self.host.name(), command = input, "command box");

        let mut words = input.split_whitespace();
        let verb = words.next().unwrap_or("");
        let arg = words.next();
        let number = arg.and_then(|a| a.parse::<u32>().ok());
        match (verb, number, arg) {
            ("ban", Some(n), _) => vec![ProxyEvent::BanFloor(n)],
            ("unban", Some(n), _) => vec![ProxyEvent::UnbanFloor(n)],
            ("ground", Some(n), _) => vec![ProxyEvent::SetGround(n)],
            ("ground?", _, _) => vec![ProxyEvent::GetGround],
            ("macro", _, Some(name)) => vec![ProxyEvent::RunMacro(name.to_string())],
            _ => vec![ProxyEvent::Warning(format!("unknown command: {input}"))],
        }
    }
}

/// A parent's single child slot plus the kind armed for the next settle.
pub struct DialogSlot {
    pub dialog: Option<Dialog>,
    pub pending: Option<MenuKind>,
    pub host: MenuKind,
}

/// What the slot did with this update.
pub struct SlotOutcome {
    pub effects: Effects,
    /// A dialog is (still) active and consumed the update.
    pub consumed: bool,
}

impl DialogSlot {
    pub fn new(host: MenuKind) -> Self {
        Self {
            dialog: None,
            pending: None,
            host,
        }
    }

    pub fn active_kind(&self) -> Option<MenuKind> {
        self.dialog.as_ref().map(Dialog::kind)
    }

    /// Remember a client event that announces a dialog; the transition is
    /// confirmed against the screen on the next settle.
    pub fn arm(&mut self, kind: MenuKind) {
        if self.dialog.is_none() {
            self.pending = Some(kind);
        }
    }

    /// Give the active dialog first refusal of a client event.
    pub fn client_event(
        &mut self,
        event: ClientEvent,
        q: &mut dyn TermQuery,
    ) -> Option<Effects> {
        let dialog = self.dialog.as_mut()?;
        let mut effects = dialog.client_event(event, q);
        if effects.iter().any(|e| matches!(e, ProxyEvent::Return)) {
            self.dialog = None;
            effects.retain(|e| !matches!(e, ProxyEvent::Return));
        }
        Some(effects)
    }

    /// Forward a settle to the active dialog, or confirm an armed entry.
    pub fn post_update(&mut self, screen: &ScreenSnapshot, q: &mut dyn TermQuery) -> SlotOutcome {
        if let Some(dialog) = self.dialog.as_mut() {
            let mut effects = dialog.post_update(screen, q);
            let returned = effects.iter().any(|e| matches!(e, ProxyEvent::Return));
            if returned {
                self.dialog = None;
                effects.retain(|e| !matches!(e, ProxyEvent::Return));
                // the screen under the dialog is current again; the owner
                // must re-evaluate its own pattern now
                return SlotOutcome {
                    effects,
                    consumed: false,
                };
            }
            return SlotOutcome {
                effects,
                consumed: true,
            };
        }

        if let Some(kind) = self.pending.take() {
            if Dialog::is_entered(kind, screen, q) {
                if let Some(mut dialog) = Dialog::create(kind, self.host) {
                    let effects = dialog.enter(screen, q);
                    self.dialog = Some(dialog);
                    return SlotOutcome {
                        effects,
                        consumed: true,
                    };
                }
            }
        }

        SlotOutcome {
            effects: Vec::new(),
            consumed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TermReply;
    use crate::term::{Emulator, MockEmulator};

    struct MockQuery {
        emu: MockEmulator,
        cached: bool,
    }

    impl MockQuery {
        fn new() -> Self {
            Self {
                emu: MockEmulator::new(80, 24),
                cached: false,
            }
        }
    }

    impl TermQuery for MockQuery {
        fn query(&mut self, request: TermRequest) -> TermReply {
            match request {
                TermRequest::ScreenColumns => TermReply::Columns(self.emu.columns),
                TermRequest::CursorBackground => TermReply::Background(self.emu.cursor_bg),
                TermRequest::ScreenData(region) => {
                    TermReply::ScreenData(self.emu.screen_data(&region))
                }
                TermRequest::SubmenuCached(_) => TermReply::Cached(self.cached),
            }
        }
    }

    fn snapshot(rows: &[&str]) -> ScreenSnapshot {
        let mut emu = MockEmulator::new(80, 24);
        emu.set_screen(rows);
        emu.snapshot()
    }

    #[test]
    fn help_screen_pattern() {
        let mut screen = snapshot(&["【基本命令】"]);
        screen.lines[23] = "     請按 空白鍵 繼續".into();
        assert!(HelpScreen::is_entered(&screen));
        assert!(!HelpScreen::is_entered(&snapshot(&["【基本命令】"])));
    }

    #[test]
    fn search_board_pattern() {
        let screen = snapshot(&["【 搜尋全站看板 】", "請輸入看板名稱(按空白鍵自動搜尋):"]);
        assert!(SearchBoard::is_entered(&screen));
    }

    #[test]
    fn quick_switch_needs_highlighted_cursor() {
        let mut q = MockQuery::new();
        q.emu.set_line(12, "   ★快速切換");
        q.emu.set_cursor(12, 4);
        let screen = q.emu.snapshot();
        assert!(!QuickSwitch::is_entered(&screen, &mut q));
        q.emu.cursor_bg = AnsiColor::White;
        let screen = q.emu.snapshot();
        assert!(QuickSwitch::is_entered(&screen, &mut q));
    }

    #[test]
    fn thread_info_validates_compact_id() {
        let mut rows = vec![""; 24];
        rows[10] = "│ 文章代碼(AID): #40000101 │";
        rows[11] = "│ 文章網址: https://www.ptt.cc/bbs/Test/G.1.A.001.html │";
        let screen = snapshot(&rows);
        assert_eq!(
            ThreadInfo::extract_url(&screen).as_deref(),
            Some("https://www.ptt.cc/bbs/Test/G.1.A.001.html")
        );

        // a forged box whose ID does not match its URL is ignored
        let mut rows = vec![""; 24];
        rows[10] = "│ 文章代碼(AID): #99999999 │";
        rows[11] = "│ 文章網址: https://www.ptt.cc/bbs/Test/G.1.A.001.html │";
        assert_eq!(ThreadInfo::extract_url(&snapshot(&rows)), None);
    }

    #[test]
    fn command_box_ban_flow() {
        let mut q = MockQuery::new();
        let mut slot = DialogSlot::new(MenuKind::Thread);
        slot.arm(MenuKind::CommandBox);

        let screen = q.emu.snapshot();
        let outcome = slot.post_update(&screen, &mut q);
        assert!(outcome.consumed);
        assert!(outcome
            .effects
            .iter()
            .any(|e| matches!(e, ProxyEvent::CutStream(0))));

        for b in b"ban 3".iter() {
            slot.client_event(ClientEvent::Byte(*b), &mut q);
        }
        let effects = slot
            .client_event(ClientEvent::Enter, &mut q)
            .expect("dialog active");
        assert!(effects.contains(&ProxyEvent::BanFloor(3)));
        assert!(effects.contains(&ProxyEvent::ResumeStream));
        assert!(slot.dialog.is_none());
    }

    #[test]
    fn command_box_unknown_command_warns() {
        let mut q = MockQuery::new();
        let mut slot = DialogSlot::new(MenuKind::Board);
        slot.arm(MenuKind::CommandBox);
        slot.post_update(&q.emu.snapshot(), &mut q);

        for b in b"bogus".iter() {
            slot.client_event(ClientEvent::Byte(*b), &mut q);
        }
        let effects = slot.client_event(ClientEvent::Enter, &mut q).unwrap();
        assert!(effects
            .iter()
            .any(|e| matches!(e, ProxyEvent::Warning(_))));
    }

    #[test]
    fn armed_dialog_not_confirmed_is_forgotten() {
        let mut q = MockQuery::new();
        let mut slot = DialogSlot::new(MenuKind::Board);
        slot.arm(MenuKind::HelpScreen);
        let outcome = slot.post_update(&q.emu.snapshot(), &mut q);
        assert!(!outcome.consumed);
        assert!(slot.dialog.is_none());
        assert!(slot.pending.is_none());
    }
}
