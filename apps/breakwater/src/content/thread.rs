use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use breakwater_archive::{ArticleId, ThreadRecord, LINE_PLACEHOLDER};

use crate::input::ClientEvent;
use crate::term::{display_width, encoded_len};

/// Wrapped source rows longer than this many encoded bytes carry a
/// continuation marker; the remote's reader wraps at 78 of its 80 columns.
const WRAP_THRESHOLD: usize = 78;
const WRAP_MARKER: char = '\\';

/// Article-end signature: a literal separator row followed by the site banner
/// and the canonical URL row.
const SEPARATOR_ROW: &str = "--";
const SITE_BANNER_PREFIX: &str = "※ 發信站: 批踢踢實業坊";
const URL_ROW_PREFIX: &str = "※ 文章網址:";

static REPLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(推|噓|→) [0-9A-Za-z][0-9A-Za-z_-]* *:").unwrap());

/// Outcome of applying one rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOutcome {
    /// Content or view window changed; annotations need a redraw.
    pub updated: bool,
    /// 1-based row within the supplied page holding the last visible line.
    pub last_row: u16,
    /// A continuation ran out of source rows.
    pub wrap_missing: bool,
}

/// Result of redacting one floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanOutcome {
    pub line: u32,
    pub original: String,
    pub redacted: String,
}

/// One thread's accumulated text and derived floor state.
///
/// The line buffer is 1-indexed and append-only: it grows to the highest line
/// ever shown and never shrinks, with placeholder sentinels standing in for
/// lines not yet received.
#[derive(Debug, Default)]
pub struct ThreadContent {
    lines: Vec<String>,
    url: Option<String>,
    /// 1-based line the floor numbering is anchored on (the URL row).
    ground: Option<u32>,
    /// line -> floor, filled incrementally.
    floors: BTreeMap<u32, u32>,
    /// floor -> line, for ban lookups.
    floor_lines: BTreeMap<u32, u32>,
    next_floor: u32,
    last_scanned: u32,
    banned: BTreeMap<u32, String>,

    first_visible: u32,
    last_visible: u32,
    last_row: u16,
    at_begin: bool,
    at_end: bool,

    first_viewed: u64,
    last_viewed: u64,
    elapsed_secs: u64,
    persist_enabled: bool,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl ThreadContent {
    pub fn new() -> Self {
        Self {
            persist_enabled: true,
            ..Self::default()
        }
    }

    pub fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }

    pub fn line(&self, n: u32) -> Option<&str> {
        self.lines.get(n.saturating_sub(1) as usize).map(String::as_str)
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn ground(&self) -> Option<u32> {
        self.ground
    }

    /// Re-anchor floor numbering; existing floor state is discarded and will
    /// be rescanned from the new ground.
    pub fn set_ground(&mut self, line: u32) {
        self.ground = Some(line);
        self.floors.clear();
        self.floor_lines.clear();
        self.next_floor = 0;
        self.last_scanned = line;
    }

    pub fn floor_of_line(&self, line: u32) -> Option<u32> {
        self.floors.get(&line).copied()
    }

    pub fn line_of_floor(&self, floor: u32) -> Option<u32> {
        self.floor_lines.get(&floor).copied()
    }

    pub fn view_window(&self) -> (u32, u32, u16) {
        (self.first_visible, self.last_visible, self.last_row)
    }

    pub fn at_begin(&self) -> bool {
        self.at_begin
    }

    pub fn at_end(&self) -> bool {
        self.at_end
    }

    pub fn set_persist_enabled(&mut self, enabled: bool) {
        self.persist_enabled = enabled;
    }

    pub fn persist_enabled(&self) -> bool {
        self.persist_enabled
    }

    /// Apply one rendered page. `page` holds the display rows above the
    /// status line; `first..=last` are the 1-based thread lines they show.
    pub fn view(&mut self, page: &[String], first: u32, last: u32, at_end: bool) -> ViewOutcome {
        debug_assert!(0 < first && first <= last);

        self.at_begin = first == 1;
        self.at_end = at_end;
        if self.first_viewed == 0 {
            self.first_viewed = now_secs();
        }

        if self.line_count() < last {
            self.lines
                .resize(last as usize, LINE_PLACEHOLDER.to_string());
        }

        let mut updated =
            (self.first_visible, self.last_visible) != (first, last);
        let mut wrap_missing = false;
        let mut target = first;
        let mut last_row = page.len() as u16;
        let mut joined = String::new();
        for (i, row) in page.iter().enumerate() {
            if target > last {
                break;
            }
            let row = row.trim_end();
            if encoded_len(row) > WRAP_THRESHOLD && row.ends_with(WRAP_MARKER) {
                joined.push_str(&row[..row.len() - WRAP_MARKER.len_utf8()]);
                continue;
            }
            let line = if joined.is_empty() {
                row.to_string()
            } else {
                let mut whole = std::mem::take(&mut joined);
                whole.push_str(row);
                whole
            };
            let slot = &mut self.lines[target as usize - 1];
            if *slot != line {
                *slot = line;
                updated = true;
            }
            if target == last {
                last_row = i as u16 + 1;
            }
            target += 1;
        }

        if !joined.is_empty() && target <= last {
            let slot = &mut self.lines[target as usize - 1];
            if *slot != joined {
                *slot = joined;
                updated = true;
            }
            target += 1;
        }

        if target <= last {
            debug!(target: "breakwater::content", first, last, stopped = target,
                   "line wrap is probably missing");
            wrap_missing = true;
        }

        self.first_visible = first;
        self.last_visible = last;
        if self.last_row != last_row {
            self.last_row = last_row;
            updated = true;
        }

        self.scan_floors();

        ViewOutcome {
            updated,
            last_row,
            wrap_missing,
        }
    }

    /// Locate the ground if still unknown, then extend the floor map over
    /// newly known lines. Never rescans behind `last_scanned`.
    fn scan_floors(&mut self) {
        if self.ground.is_none() {
            self.locate_ground();
        }
        let Some(_ground) = self.ground else {
            return;
        };

        let mut line_no = self.last_scanned + 1;
        while let Some(line) = self.line(line_no) {
            if ThreadRecord::is_placeholder(line) {
                break; // cannot skip an unknown line: floors are ordered
            }
            if REPLY_RE.is_match(line) {
                self.next_floor += 1;
                self.floors.insert(line_no, self.next_floor);
                self.floor_lines.insert(self.next_floor, line_no);
            }
            self.last_scanned = line_no;
            line_no += 1;
        }
    }

    fn locate_ground(&mut self) {
        if self.lines.len() < 3 {
            return;
        }
        // the signature sits at the end of the article body; search backward
        let mut i = self.lines.len() - 3;
        loop {
            if self.lines[i] == SEPARATOR_ROW
                && self.lines[i + 1].starts_with(SITE_BANNER_PREFIX)
                && self.lines[i + 2].starts_with(URL_ROW_PREFIX)
            {
                let url_row = &self.lines[i + 2];
                let url = url_row[URL_ROW_PREFIX.len()..].trim().to_string();
                if self.url.is_none() && !url.is_empty() {
                    self.url = Some(url);
                }
                let ground = i as u32 + 3;
                self.ground = Some(ground);
                self.last_scanned = self.last_scanned.max(ground);
                debug!(target: "breakwater::content", ground, url = ?self.url, "ground located");
                return;
            }
            if i == 0 {
                return;
            }
            i -= 1;
        }
    }

    /// Redact a floor's line: equal display width, original cached for an
    /// exact restore.
    pub fn ban_floor(&mut self, floor: u32) -> Option<BanOutcome> {
        let line_no = self.line_of_floor(floor)?;
        if self.banned.contains_key(&floor) {
            return None;
        }
        let original = self.line(line_no)?.to_string();
        let width = display_width(&original);
        let mut redacted = "█".repeat(width / 2);
        if width % 2 == 1 {
            redacted.push(' ');
        }
        self.lines[line_no as usize - 1] = redacted.clone();
        self.banned.insert(floor, original.clone());
        Some(BanOutcome {
            line: line_no,
            original,
            redacted,
        })
    }

    /// Exact restore of a banned floor.
    pub fn unban_floor(&mut self, floor: u32) -> Option<BanOutcome> {
        let line_no = self.line_of_floor(floor)?;
        let original = self.banned.remove(&floor)?;
        let redacted = std::mem::replace(&mut self.lines[line_no as usize - 1], original.clone());
        Some(BanOutcome {
            line: line_no,
            original,
            redacted,
        })
    }

    pub fn banned_floors(&self) -> impl Iterator<Item = u32> + '_ {
        self.banned.keys().copied()
    }

    /// Restore every banned line. Ban state does not survive leaving the
    /// thread view.
    pub fn clear_bans(&mut self) {
        let floors: Vec<u32> = self.banned.keys().copied().collect();
        for floor in floors {
            self.unban_floor(floor);
        }
    }

    /// Cross-thread navigation is gated at the buffer boundaries.
    pub fn is_prohibited(&self, event: ClientEvent) -> bool {
        match event {
            ClientEvent::Up => self.at_begin,
            ClientEvent::Down | ClientEvent::Enter | ClientEvent::Byte(b' ') => self.at_end,
            _ => false,
        }
    }

    /// Keys that leave the thread or jump to a sibling thread.
    pub fn is_switch_event(&self, event: ClientEvent) -> bool {
        if self.is_prohibited(event) {
            return false;
        }
        match event {
            ClientEvent::Left => true,
            ClientEvent::Byte(b) => b"qfb]+[-=tAa".contains(&b),
            _ => false,
        }
    }

    /// Keys that scroll the view window.
    pub fn is_update_event(&self, event: ClientEvent) -> bool {
        matches!(
            event,
            ClientEvent::Up
                | ClientEvent::Down
                | ClientEvent::PgUp
                | ClientEvent::PgDn
                | ClientEvent::Home
                | ClientEvent::End
                | ClientEvent::Enter
                | ClientEvent::Ctrl(b'B')
                | ClientEvent::Ctrl(b'F')
                | ClientEvent::Byte(b' ')
        )
    }

    /// Range of thread text, 1-based and inclusive; negative indices count
    /// from the last line.
    pub fn text(&self, first: i32, last: i32) -> String {
        let len = self.line_count() as i32;
        let resolve = |n: i32| -> i32 {
            if n < 0 { len + 1 + n } else { n }
        };
        let (mut first, last) = (resolve(first).max(1), resolve(last).min(len));
        let mut out = String::new();
        while first <= last {
            out.push_str(&self.lines[first as usize - 1]);
            out.push('\n');
            first += 1;
        }
        out
    }

    /// Snapshot for the archivist. `None` when there is nothing worth
    /// keeping: no content, no recognized URL, or persistence disabled.
    pub fn to_record(&self, board: &str) -> Option<ThreadRecord> {
        if !self.persist_enabled || self.lines.is_empty() {
            return None;
        }
        let url = self.url.clone()?;
        let id = ArticleId::from_url(&url)?;
        Some(ThreadRecord {
            board: if board.is_empty() { id.board } else { board.to_string() },
            key: id.compact,
            url,
            lines: self.lines.clone(),
            ground_line: self.ground.unwrap_or(0),
            first_viewed: self.first_viewed,
            last_viewed: self.last_viewed,
            elapsed_secs: self.elapsed_secs,
        })
    }

    /// Close out a visit: restore bans, stamp the visit timestamps and hand
    /// back the record to persist. The content itself survives, so a revisit
    /// resumes from the cached buffer.
    pub fn close_visit(&mut self, board: &str) -> Option<ThreadRecord> {
        if self.lines.is_empty() {
            return None;
        }
        self.clear_bans();
        self.last_viewed = now_secs();
        if self.last_viewed > self.first_viewed {
            self.elapsed_secs = self.last_viewed - self.first_viewed;
        }
        self.to_record(board)
    }

    /// Leave the thread view for good: close the visit and reset for the
    /// next thread.
    pub fn switch(&mut self, board: &str) -> Option<ThreadRecord> {
        let record = self.close_visit(board);
        if record.is_none() && self.lines.is_empty() {
            return None;
        }
        let persist = self.persist_enabled;
        *self = Self::new();
        self.persist_enabled = persist;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(rows: &[&str]) -> Vec<String> {
        rows.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn buffer_grows_to_max_last_line() {
        let mut thread = ThreadContent::new();
        thread.view(&page(&["a", "b", "c"]), 1, 3, false);
        assert_eq!(thread.line_count(), 3);
        thread.view(&page(&["x", "y"]), 9, 10, false);
        assert_eq!(thread.line_count(), 10);
        // lines 4..=8 are placeholders, not empties
        assert_eq!(thread.line(5), Some(LINE_PLACEHOLDER));
        assert_eq!(thread.line(9), Some("x"));
        // a shorter view never shrinks the buffer
        thread.view(&page(&["a2"]), 1, 1, false);
        assert_eq!(thread.line_count(), 10);
    }

    #[test]
    fn soft_wrap_reassembles_one_logical_line() {
        // a long row ending in the continuation marker joins the next row
        let long = format!("{}\\", "x".repeat(79));
        let mut thread = ThreadContent::new();
        thread.view(&page(&[&long, "tail", "after"]), 1, 2, false);
        assert_eq!(thread.line(1), Some(format!("{}tail", "x".repeat(79)).as_str()));
        assert_eq!(thread.line(2), Some("after"));
    }

    #[test]
    fn short_row_with_backslash_is_not_a_continuation() {
        let mut thread = ThreadContent::new();
        thread.view(&page(&["short\\", "next"]), 1, 2, false);
        assert_eq!(thread.line(1), Some("short\\"));
        assert_eq!(thread.line(2), Some("next"));
    }

    #[test]
    fn missing_continuation_is_reported_not_fatal() {
        let long = format!("{}\\", "x".repeat(79));
        let mut thread = ThreadContent::new();
        let outcome = thread.view(&page(&[&long]), 1, 2, false);
        assert!(outcome.wrap_missing);
        assert_eq!(thread.line_count(), 2);
    }

    fn article_page() -> Vec<String> {
        page(&[
            "作者 author () 看板 Test",
            "標題 [問題] something",
            "body line",
            "--",
            "※ 發信站: 批踢踢實業坊(ptt.cc), 來自: 1.2.3.4",
            "※ 文章網址: https://www.ptt.cc/bbs/Test/G.1.A.001.html",
            "推 alice: first",
            "→ bob: second",
            "噓 carol: third",
        ])
    }

    #[test]
    fn ground_and_floors_from_signature() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);
        assert_eq!(thread.ground(), Some(6));
        assert_eq!(thread.url(), Some("https://www.ptt.cc/bbs/Test/G.1.A.001.html"));
        assert_eq!(thread.floor_of_line(7), Some(1));
        assert_eq!(thread.floor_of_line(8), Some(2));
        assert_eq!(thread.floor_of_line(9), Some(3));
        assert_eq!(thread.floor_of_line(3), None);
    }

    #[test]
    fn floors_stable_under_repeated_views() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);
        let before: Vec<_> = (1..=9).map(|n| thread.floor_of_line(n)).collect();
        thread.view(&article_page(), 1, 9, true);
        let after: Vec<_> = (1..=9).map(|n| thread.floor_of_line(n)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn floors_extend_across_pages_without_rescan() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, false);
        thread.view(&page(&["推 dave: fourth", "推 erin: fifth"]), 10, 11, true);
        assert_eq!(thread.floor_of_line(10), Some(4));
        assert_eq!(thread.floor_of_line(11), Some(5));
        assert_eq!(thread.line_of_floor(5), Some(11));
    }

    #[test]
    fn repeated_identical_view_is_not_an_update() {
        let mut thread = ThreadContent::new();
        let first = thread.view(&article_page(), 1, 9, true);
        assert!(first.updated);
        let second = thread.view(&article_page(), 1, 9, true);
        assert!(!second.updated);
    }

    #[test]
    fn ban_unban_round_trip_preserves_text_and_width() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);

        let original_line = thread.line(7).unwrap().to_string();
        let width = display_width(&original_line);

        let ban = thread.ban_floor(1).expect("floor 1 exists");
        assert_eq!(ban.line, 7);
        assert_eq!(display_width(thread.line(7).unwrap()), width);
        assert_ne!(thread.line(7).unwrap(), original_line);

        let unban = thread.unban_floor(1).expect("was banned");
        assert_eq!(unban.original, original_line);
        assert_eq!(thread.line(7).unwrap(), original_line);
    }

    #[test]
    fn ban_of_double_byte_text_keeps_width() {
        let mut thread = ThreadContent::new();
        let mut rows = article_page();
        rows.push("推 frank: 中文回應".to_string());
        thread.view(&rows, 1, 10, true);
        let width = display_width(thread.line(10).unwrap());
        thread.ban_floor(4).expect("floor 4 exists");
        assert_eq!(display_width(thread.line(10).unwrap()), width);
    }

    #[test]
    fn boundary_gating() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);
        assert!(thread.at_begin());
        assert!(thread.at_end());
        assert!(thread.is_prohibited(ClientEvent::Up));
        assert!(thread.is_prohibited(ClientEvent::Down));
        assert!(!thread.is_switch_event(ClientEvent::Enter));
        assert!(thread.is_switch_event(ClientEvent::Left));
        assert!(thread.is_switch_event(ClientEvent::Byte(b'q')));
    }

    #[test]
    fn switch_produces_record_and_resets() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);
        let record = thread.switch("Test").expect("record");
        assert_eq!(record.board, "Test");
        assert_eq!(record.key, "40000101");
        assert_eq!(record.lines.len(), 9);
        assert_eq!(record.ground_line, 6);
        assert_eq!(thread.line_count(), 0);
    }

    #[test]
    fn switch_restores_bans_before_persisting() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);
        let original = thread.line(7).unwrap().to_string();
        thread.ban_floor(1).unwrap();
        let record = thread.switch("Test").expect("record");
        assert_eq!(record.lines[6], original);
    }

    #[test]
    fn switch_without_persistence_returns_nothing() {
        let mut thread = ThreadContent::new();
        thread.set_persist_enabled(false);
        thread.view(&article_page(), 1, 9, true);
        assert!(thread.switch("Test").is_none());
    }

    #[test]
    fn set_ground_rescans_floors() {
        let mut thread = ThreadContent::new();
        thread.view(&article_page(), 1, 9, true);
        assert_eq!(thread.floor_of_line(7), Some(1));
        // re-anchor two lines later: only the last reply remains a floor
        thread.set_ground(8);
        thread.view(&article_page(), 1, 9, true);
        assert_eq!(thread.floor_of_line(7), None);
        assert_eq!(thread.floor_of_line(9), Some(1));
    }
}
