//! Streaming parser for unified diff text.
//!
//! [`HunkParser`] wraps any line iterator and yields [`DiffHunk`]s as soon as
//! each one is complete, so consumers can start on the first hunk of a huge
//! patch before the rest has been read.

use std::sync::OnceLock;

use regex::Regex;

use crate::core::{CancelToken, DiffHunk, DiffLine, HunkBody};

/// Parsed `@@ -a,b +c,d @@ trailing` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HunkHeader {
    /// First old-side line.
    pub old_start: u32,
    /// Old-side line count (1 when omitted).
    pub old_count: u32,
    /// First new-side line.
    pub new_start: u32,
    /// New-side line count (1 when omitted).
    pub new_count: u32,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hardcoded hunk regex")
    })
}

/// Parse a hunk header line. Returns `None` for anything malformed,
/// including ranges whose end does not fit in `u32`.
pub fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let caps = header_regex().captures(line)?;
    let num = |i: usize, default: u32| -> Option<u32> {
        match caps.get(i) {
            Some(m) => m.as_str().parse().ok(),
            None => Some(default),
        }
    };
    let header = HunkHeader {
        old_start: num(1, 0)?,
        old_count: num(2, 1)?,
        new_start: num(3, 0)?,
        new_count: num(4, 1)?,
    };
    header.old_start.checked_add(header.old_count)?;
    header.new_start.checked_add(header.new_count)?;
    Some(header)
}

/// Whether hunk bodies are parsed into lines or only located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Build [`DiffLine`] records for every body line.
    #[default]
    Materialize,
    /// Record only the byte range of each body within the input.
    Defer,
}

/// Counters collected while parsing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Input lines consumed.
    pub lines_read: usize,
    /// Hunks emitted.
    pub hunks_emitted: usize,
    /// `@@` lines that did not parse and were skipped.
    pub skipped_headers: usize,
}

#[derive(Debug)]
struct OpenHunk {
    header_text: String,
    header: HunkHeader,
    lines: Vec<DiffLine>,
    old_next: u32,
    new_next: u32,
    old_remaining: u32,
    new_remaining: u32,
    body_start: usize,
    body_end: usize,
}

impl OpenHunk {
    fn is_complete(&self) -> bool {
        self.old_remaining == 0 && self.new_remaining == 0
    }

    fn finish(self, mode: ParseMode) -> DiffHunk {
        let body = match mode {
            ParseMode::Materialize => HunkBody::Materialized(self.lines),
            ParseMode::Defer => HunkBody::Deferred(self.body_start..self.body_end),
        };
        DiffHunk {
            header_text: self.header_text,
            old_start: self.header.old_start,
            old_line_count: self.header.old_count,
            new_start: self.header.new_start,
            new_line_count: self.header.new_count,
            body,
        }
    }
}

#[derive(Debug)]
enum State {
    Seeking,
    InHunk(OpenHunk),
}

/// Incremental unified-diff parser.
///
/// Input lines must not include their `\n`; a trailing `\r` is tolerated
/// and stripped. Byte offsets (used by [`ParseMode::Defer`]) assume every
/// input line but the last was followed by exactly one `\n` in the original
/// text. A deferred range ends where its last body line's text ends, so it
/// stays inside the input whether or not the input ends with a newline.
///
/// The iterator is finite and not restartable. Once the cancel token is set
/// it stops without emitting the hunk that was being built.
#[derive(Debug)]
pub struct HunkParser<I> {
    lines: I,
    mode: ParseMode,
    cancel: Option<CancelToken>,
    state: State,
    offset: usize,
    stats: ParseStats,
    done: bool,
}

impl<I> HunkParser<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    /// Parse `lines`, materializing every hunk.
    pub fn new(lines: I) -> Self {
        Self {
            lines,
            mode: ParseMode::Materialize,
            cancel: None,
            state: State::Seeking,
            offset: 0,
            stats: ParseStats::default(),
            done: false,
        }
    }

    /// Set the body handling mode.
    pub fn with_mode(mut self, mode: ParseMode) -> Self {
        self.mode = mode;
        self
    }

    /// Stop early once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Counters so far.
    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn take_open(&mut self) -> Option<DiffHunk> {
        match std::mem::replace(&mut self.state, State::Seeking) {
            State::InHunk(open) => {
                self.stats.hunks_emitted += 1;
                Some(open.finish(self.mode))
            }
            State::Seeking => None,
        }
    }

    fn open(&mut self, header: HunkHeader, text: &str) {
        self.state = State::InHunk(OpenHunk {
            header_text: text.to_string(),
            header,
            lines: Vec::new(),
            old_next: header.old_start,
            new_next: header.new_start,
            old_remaining: header.old_count,
            new_remaining: header.new_count,
            body_start: self.offset,
            body_end: self.offset,
        });
    }

    /// Classify one body line into the open hunk. Returns whether the line
    /// belonged to the hunk.
    fn push_body_line(&mut self, line: &str) -> bool {
        let State::InHunk(open) = &mut self.state else {
            return false;
        };
        let materialize = self.mode == ParseMode::Materialize;
        let Some(marker) = line.as_bytes().first() else {
            return false;
        };
        let text = line.get(1..).unwrap_or_default();
        match marker {
            b'+' => {
                if materialize {
                    open.lines.push(DiffLine::addition(text, open.new_next));
                }
                open.new_next = open.new_next.saturating_add(1);
                open.new_remaining = open.new_remaining.saturating_sub(1);
            }
            b'-' => {
                if materialize {
                    open.lines.push(DiffLine::deletion(text, open.old_next));
                }
                open.old_next = open.old_next.saturating_add(1);
                open.old_remaining = open.old_remaining.saturating_sub(1);
            }
            b' ' => {
                if materialize {
                    open.lines
                        .push(DiffLine::context(text, open.old_next, open.new_next));
                }
                open.old_next = open.old_next.saturating_add(1);
                open.new_next = open.new_next.saturating_add(1);
                open.old_remaining = open.old_remaining.saturating_sub(1);
                open.new_remaining = open.new_remaining.saturating_sub(1);
            }
            // "\ No newline at end of file"
            b'\\' => {}
            _ => return false,
        }
        // End of this line's text, before its newline.
        open.body_end = self.offset - 1;
        true
    }

    fn open_is_complete(&self) -> bool {
        matches!(&self.state, State::InHunk(open) if open.is_complete())
    }
}

impl<I> Iterator for HunkParser<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = DiffHunk;

    fn next(&mut self) -> Option<DiffHunk> {
        if self.done {
            return None;
        }
        loop {
            if self.cancelled() {
                self.done = true;
                self.state = State::Seeking;
                return None;
            }

            let Some(raw) = self.lines.next() else {
                self.done = true;
                return self.take_open();
            };
            let raw = raw.as_ref();
            self.offset += raw.len() + 1;
            self.stats.lines_read += 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);

            if line.starts_with("@@") {
                let finished = self.take_open();
                match parse_hunk_header(line) {
                    Some(header) => self.open(header, line),
                    None => {
                        self.stats.skipped_headers += 1;
                        log::warn!("skipping malformed hunk header: {:?}", line);
                    }
                }
                if finished.is_some() {
                    return finished;
                }
                if self.open_is_complete() {
                    return self.take_open();
                }
                continue;
            }

            if line.starts_with("diff --git ") {
                if let Some(hunk) = self.take_open() {
                    return Some(hunk);
                }
                continue;
            }

            if self.push_body_line(line) && self.open_is_complete() {
                return self.take_open();
            }
        }
    }
}

/// Parse a whole patch held in memory.
///
/// Splits on `\n` so deferred byte ranges index straight into `text`.
pub fn parse_patch(text: &str, mode: ParseMode) -> HunkParser<std::str::Split<'_, char>> {
    HunkParser::new(text.split('\n')).with_mode(mode)
}

/// Materialize a deferred hunk from the patch text it was parsed from.
///
/// Returns `None` if the hunk is not deferred or the range does not fit
/// `patch`. An already materialized hunk is returned unchanged.
pub fn materialize(hunk: &DiffHunk, patch: &str) -> Option<DiffHunk> {
    let range = match &hunk.body {
        HunkBody::Materialized(_) => return Some(hunk.clone()),
        HunkBody::Deferred(range) => range.clone(),
    };
    let body = if range.is_empty() {
        ""
    } else {
        patch.get(range)?
    };
    let lines = std::iter::once(hunk.header_text.as_str()).chain(body.split('\n'));
    HunkParser::new(lines).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DiffLineKind;

    const SIMPLE: &str = "diff --git a/src/lib.rs b/src/lib.rs
index 111..222 100644
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -16,8 +16,9 @@ use turbo_tasks::{
 a
 b
-c
+C
+D
 e
 f
 g
 h
";

    fn parse(text: &str) -> Vec<DiffHunk> {
        parse_patch(text, ParseMode::Materialize).collect()
    }

    #[test]
    fn header_with_counts() {
        let h = parse_hunk_header("@@ -16,8 +16,9 @@ use turbo_tasks::{").unwrap();
        assert_eq!(
            h,
            HunkHeader {
                old_start: 16,
                old_count: 8,
                new_start: 16,
                new_count: 9
            }
        );
    }

    #[test]
    fn header_counts_default_to_one() {
        let h = parse_hunk_header("@@ -3 +4 @@").unwrap();
        assert_eq!((h.old_count, h.new_count), (1, 1));
        let h = parse_hunk_header("@@ -0,0 +1 @@").unwrap();
        assert_eq!((h.old_start, h.old_count, h.new_start, h.new_count), (0, 0, 1, 1));
    }

    #[test]
    fn header_rejects_garbage() {
        assert!(parse_hunk_header("@@ bogus @@").is_none());
        assert!(parse_hunk_header("@@ -1,2 +3 @").is_none());
        assert!(parse_hunk_header("@@ -99999999999,1 +1 @@").is_none());
    }

    #[test]
    fn parses_simple_hunk_with_line_numbers() {
        let hunks = parse(SIMPLE);
        assert_eq!(hunks.len(), 1);
        let h = &hunks[0];
        assert_eq!((h.old_start, h.old_line_count), (16, 8));
        assert_eq!((h.new_start, h.new_line_count), (16, 9));
        assert_eq!(h.header_text, "@@ -16,8 +16,9 @@ use turbo_tasks::{");

        let lines = h.lines().unwrap();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[2], DiffLine::deletion("c", 18));
        assert_eq!(lines[3], DiffLine::addition("C", 18));
        assert_eq!(lines[4], DiffLine::addition("D", 19));
        assert_eq!(lines[9], DiffLine::context("h", 23, 24));
    }

    #[test]
    fn multiple_hunks_emit_in_order() {
        let text = "@@ -1,2 +1,2 @@\n-a\n+b\n x\n@@ -10 +10,2 @@\n y\n+z\n";
        let hunks = parse(text);
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(hunks[1].old_start, 10);
        assert_eq!(hunks[1].lines().unwrap()[1], DiffLine::addition("z", 11));
    }

    #[test]
    fn emits_hunk_before_reading_rest_of_stream() {
        let mut reads = 0usize;
        let lines = ["@@ -1 +1 @@", "-a", "+b", "@@ -5 +5 @@", " x"]
            .into_iter()
            .inspect(|_| reads += 1);
        let mut parser = HunkParser::new(lines);
        let first = parser.next().unwrap();
        assert_eq!(first.old_start, 1);
        drop(parser);
        assert_eq!(reads, 3);
    }

    #[test]
    fn no_newline_marker_is_ignored() {
        let text = "@@ -1 +1 @@\n-old\n\\ No newline at end of file\n+new\n\\ No newline at end of file\n";
        let hunks = parse(text);
        let lines = hunks[0].lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, DiffLineKind::Deletion);
        assert_eq!(lines[1].kind, DiffLineKind::Addition);
    }

    #[test]
    fn malformed_header_is_skipped_with_its_body() {
        let text = "@@ -1 +1 @@\n-a\n+b\n@@ broken @@\n-zzz\n@@ -4 +4 @@\n q\n";
        let mut parser = parse_patch(text, ParseMode::Materialize);
        let hunks: Vec<_> = parser.by_ref().collect();
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].lines().unwrap().len(), 2);
        assert_eq!(hunks[1].old_start, 4);
        assert_eq!(parser.stats().skipped_headers, 1);
    }

    #[test]
    fn following_file_headers_do_not_leak_into_hunk() {
        let text = "diff --git a/a b/a
--- a/a
+++ b/a
@@ -1 +1 @@
-x
+y
diff --git a/b b/b
--- a/b
+++ b/b
@@ -3,2 +3 @@
 k
-l
";
        let hunks = parse(text);
        assert_eq!(hunks.len(), 2);
        assert_eq!(hunks[0].lines().unwrap().len(), 2);
        assert_eq!(hunks[1].lines().unwrap().len(), 2);
    }

    #[test]
    fn truncated_hunk_is_flushed_at_end() {
        let hunks = parse("@@ -1,5 +1,5 @@\n a\n b");
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].lines().unwrap().len(), 2);
    }

    #[test]
    fn crlf_lines_are_stripped() {
        let hunks = parse("@@ -1 +1 @@\r\n-a\r\n+b\r\n");
        let lines = hunks[0].lines().unwrap();
        assert_eq!(lines[0].text, "a");
        assert_eq!(lines[1].text, "b");
    }

    #[test]
    fn empty_and_headerless_input() {
        assert!(parse("").is_empty());
        assert!(parse("just some text\n+not in a hunk\n").is_empty());
    }

    #[test]
    fn cancellation_stops_without_partial_hunk() {
        let token = CancelToken::new();
        let text = "@@ -1 +1 @@\n-a\n+b\n@@ -5,3 +5,3 @@\n x\n y\n";
        let mut parser = parse_patch(text, ParseMode::Materialize).with_cancel(token.clone());
        assert!(parser.next().is_some());
        token.cancel();
        assert!(parser.next().is_none());
        assert!(parser.next().is_none());
    }

    #[test]
    fn deferred_ranges_materialize_to_same_hunks() {
        let text = "@@ -1,2 +1,2 @@\n-a\n+b\n c\n@@ -9 +9,2 @@\n d\n+e\n";
        let eager = parse(text);
        let deferred: Vec<_> = parse_patch(text, ParseMode::Defer).collect();
        assert_eq!(deferred.len(), 2);
        assert!(!deferred[0].is_materialized());
        assert_eq!(&text[deferred[0].deferred_range().unwrap()], "-a\n+b\n c");

        let expanded: Vec<_> = deferred
            .iter()
            .map(|h| materialize(h, text).unwrap())
            .collect();
        assert_eq!(expanded, eager);
    }

    #[test]
    fn materialize_rejects_out_of_range() {
        let hunk = DiffHunk {
            header_text: "@@ -1 +1 @@".into(),
            old_start: 1,
            old_line_count: 1,
            new_start: 1,
            new_line_count: 1,
            body: HunkBody::Deferred(5..500),
        };
        assert!(materialize(&hunk, "short").is_none());
    }

    #[test]
    fn deferred_range_without_trailing_newline() {
        let text = "@@ -1 +1 @@\n-a\n+b";
        let deferred: Vec<_> = parse_patch(text, ParseMode::Defer).collect();
        let range = deferred[0].deferred_range().unwrap();
        assert!(range.end <= text.len());
        assert_eq!(&text[range], "-a\n+b");

        let expanded = materialize(&deferred[0], text).unwrap();
        assert_eq!(expanded, parse(text)[0]);
    }

    #[test]
    fn empty_deferred_body_at_end_of_input() {
        let text = "@@ -3,0 +4,0 @@";
        let deferred: Vec<_> = parse_patch(text, ParseMode::Defer).collect();
        let expanded = materialize(&deferred[0], text).unwrap();
        assert_eq!(expanded.lines(), Some(&[][..]));
    }

    #[test]
    fn header_ranges_past_u32_are_rejected() {
        assert!(parse_hunk_header("@@ -4294967295,2 +1 @@").is_none());
        assert!(parse_hunk_header("@@ -1 +4294967295,2 @@").is_none());
        assert!(parse_hunk_header("@@ -4294967294,1 +4294967294,1 @@").is_some());

        let mut parser = HunkParser::new(
            "@@ -4294967295,2 +4294967295,2 @@\n a\n b\n@@ -1 +1 @@\n-x\n+y".split('\n'),
        );
        let hunks: Vec<_> = parser.by_ref().collect();
        assert_eq!(hunks.len(), 1);
        assert_eq!(hunks[0].old_start, 1);
        assert_eq!(parser.stats().skipped_headers, 1);
    }

    #[test]
    fn overlong_body_saturates_line_numbers() {
        // Declares one new line but carries two context lines that end at
        // the top of the u32 range.
        let text = "@@ -4294967293,2 +4294967294,1 @@\n a\n b\n";
        let hunks = parse(text);
        let lines = hunks[0].lines().unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].old_line_number, Some(4_294_967_294));
        assert_eq!(lines[1].new_line_number, Some(u32::MAX));
    }
}
