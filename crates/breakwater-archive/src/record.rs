/// Marker for a thread line that has not been captured yet. Distinct from an
/// intentionally empty line, which is stored as `""`.
pub const LINE_PLACEHOLDER: &str = "\u{7f}";

/// One reconstructed thread, as shipped to and accumulated by the archivist.
///
/// `lines` is 1-indexed at the protocol level (line N of the thread is
/// `lines[N - 1]`) and only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadRecord {
    pub board: String,
    /// Compact article ID; doubles as the archive file name.
    pub key: String,
    pub url: String,
    pub lines: Vec<String>,
    /// 1-based line the floor numbering is anchored on; 0 when unknown.
    pub ground_line: u32,
    pub first_viewed: u64,
    pub last_viewed: u64,
    pub elapsed_secs: u64,
}

impl ThreadRecord {
    pub fn is_placeholder(line: &str) -> bool {
        line == LINE_PLACEHOLDER
    }

    /// Merge a freshly captured copy into this accumulated record.
    ///
    /// A real line never regresses to a placeholder; a placeholder is filled
    /// from the incoming copy when it has the line. The buffer extends to the
    /// longer of the two.
    pub fn merge(&mut self, incoming: &ThreadRecord) {
        let len = self.lines.len().max(incoming.lines.len());
        self.lines.resize(len, LINE_PLACEHOLDER.to_string());
        for (n, slot) in self.lines.iter_mut().enumerate() {
            if !Self::is_placeholder(slot) {
                continue;
            }
            if let Some(line) = incoming.lines.get(n) {
                if !Self::is_placeholder(line) {
                    *slot = line.clone();
                }
            }
        }

        if !incoming.url.is_empty() {
            self.url = incoming.url.clone();
        }
        if incoming.ground_line != 0 {
            self.ground_line = incoming.ground_line;
        }
        if self.first_viewed == 0 {
            self.first_viewed = incoming.first_viewed;
        }
        self.last_viewed = incoming.last_viewed;
        self.elapsed_secs += incoming.elapsed_secs;
    }

    /// Render the line buffer for the on-disk text file; placeholders become
    /// the designated single-character marker so re-imports can tell an
    /// uncaptured line from an empty one.
    pub fn to_file_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Parse the on-disk representation back into a record's line buffer.
    pub fn lines_from_file_text(text: &str) -> Vec<String> {
        text.lines().map(|l| l.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_lines(lines: &[&str]) -> ThreadRecord {
        ThreadRecord {
            board: "SomeBoard".into(),
            key: "40000101".into(),
            lines: lines.iter().map(|s| s.to_string()).collect(),
            ..ThreadRecord::default()
        }
    }

    #[test]
    fn merge_fills_placeholders_and_keeps_real_lines() {
        // archive copy: nothing at line 2, real content at line 5
        let mut archived = record_with_lines(&[
            "first",
            LINE_PLACEHOLDER,
            "third",
            "fourth",
            "fifth (archived)",
        ]);
        // volatile copy: placeholders at lines 2 and 5
        let incoming = record_with_lines(&[
            "first",
            LINE_PLACEHOLDER,
            "third",
            "fourth",
            LINE_PLACEHOLDER,
        ]);

        // line 5 must not regress; line 2 stays open for a later capture
        archived.merge(&incoming);
        assert_eq!(archived.lines[4], "fifth (archived)");
        assert_eq!(archived.lines[1], LINE_PLACEHOLDER);

        // now the volatile copy has line 2
        let incoming = record_with_lines(&["first", "second", "third"]);
        archived.merge(&incoming);
        assert_eq!(archived.lines[1], "second");
        assert_eq!(archived.lines[4], "fifth (archived)");
    }

    #[test]
    fn merge_extends_to_longer_copy() {
        let mut archived = record_with_lines(&["a"]);
        let incoming = record_with_lines(&["a", "b", "c"]);
        archived.merge(&incoming);
        assert_eq!(archived.lines.len(), 3);
        assert_eq!(archived.lines[2], "c");
    }

    #[test]
    fn merge_accumulates_view_metadata() {
        let mut archived = record_with_lines(&[]);
        archived.first_viewed = 0;
        archived.elapsed_secs = 30;

        let mut incoming = record_with_lines(&[]);
        incoming.first_viewed = 1_700_000_000;
        incoming.last_viewed = 1_700_000_500;
        incoming.elapsed_secs = 12;

        archived.merge(&incoming);
        assert_eq!(archived.first_viewed, 1_700_000_000);
        assert_eq!(archived.last_viewed, 1_700_000_500);
        assert_eq!(archived.elapsed_secs, 42);

        // a second session must not move first_viewed
        incoming.first_viewed = 1_700_001_000;
        archived.merge(&incoming);
        assert_eq!(archived.first_viewed, 1_700_000_000);
    }
}
