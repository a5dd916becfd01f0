//! Incremental, cancellable search over parsed hunks.

use std::ops::Range;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use regex::{Regex, RegexBuilder};
use thiserror::Error;

use crate::core::{CancelToken, DiffHunk, DiffLineKind};

/// Upper bound on ranges reported for one line.
pub const MAX_MATCHES_PER_LINE: usize = 100;

/// The search thread yields its time slice after this many matches.
pub const YIELD_EVERY: usize = 10;

/// Errors from starting a search.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SearchError {
    /// The term did not compile as a pattern.
    #[error("invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Which line kinds are searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineKinds {
    /// Search added lines.
    pub additions: bool,
    /// Search deleted lines.
    pub deletions: bool,
    /// Search context lines.
    pub context: bool,
}

impl Default for LineKinds {
    fn default() -> Self {
        Self {
            additions: true,
            deletions: true,
            context: true,
        }
    }
}

impl LineKinds {
    fn includes(&self, kind: DiffLineKind) -> bool {
        match kind {
            DiffLineKind::Addition => self.additions,
            DiffLineKind::Deletion => self.deletions,
            DiffLineKind::Context => self.context,
            DiffLineKind::HunkHeader => false,
        }
    }
}

/// Search settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOptions {
    /// Match case exactly.
    pub case_sensitive: bool,
    /// Only match whole words.
    pub whole_word: bool,
    /// Treat the term as a regular expression.
    pub regex: bool,
    /// Line kinds to include.
    pub kinds: LineKinds,
}

/// All matches on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    /// Index of the hunk in the searched sequence.
    pub hunk_index: usize,
    /// Index of the line within the hunk.
    pub line_index: usize,
    /// Byte ranges into `line_snapshot`, ascending and non-overlapping.
    pub match_ranges: Vec<Range<usize>>,
    /// Copy of the line text at search time.
    pub line_snapshot: String,
}

/// Totals for a finished or cancelled search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSummary {
    /// Lines with at least one match.
    pub matched_lines: usize,
    /// Sum of match ranges.
    pub total_matches: usize,
    /// Deferred hunks passed over without searching.
    pub skipped_deferred: usize,
}

/// Compiled form of a search term, built once per session.
#[derive(Debug)]
enum Matcher {
    Empty,
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    fn compile(term: &str, options: &SearchOptions) -> Result<Self, SearchError> {
        if term.is_empty() {
            return Ok(Self::Empty);
        }
        if !options.regex && !options.whole_word && options.case_sensitive {
            return Ok(Self::Literal(term.to_string()));
        }
        let body = if options.regex {
            term.to_string()
        } else {
            regex::escape(term)
        };
        let pattern = if options.whole_word {
            format!(r"\b(?:{})\b", body)
        } else {
            body
        };
        let re = RegexBuilder::new(&pattern)
            .case_insensitive(!options.case_sensitive)
            .build()?;
        Ok(Self::Pattern(re))
    }

    fn find(&self, text: &str) -> Vec<Range<usize>> {
        match self {
            Self::Empty => Vec::new(),
            Self::Literal(needle) => text
                .match_indices(needle.as_str())
                .take(MAX_MATCHES_PER_LINE)
                .map(|(start, m)| start..start + m.len())
                .collect(),
            Self::Pattern(re) => re
                .find_iter(text)
                .filter(|m| !m.is_empty())
                .take(MAX_MATCHES_PER_LINE)
                .map(|m| m.range())
                .collect(),
        }
    }
}

/// Lazy search over a hunk slice.
///
/// Matches come out in hunk-then-line order. Cancellation is checked at each
/// hunk boundary. Deferred hunks are skipped and counted in the summary.
#[derive(Debug)]
pub struct Search<'a> {
    hunks: &'a [DiffHunk],
    matcher: Matcher,
    kinds: LineKinds,
    cancel: Option<CancelToken>,
    hunk: usize,
    line: usize,
    summary: SearchSummary,
    done: bool,
}

impl<'a> Search<'a> {
    /// Start a search for `term` in `hunks`.
    pub fn new(
        hunks: &'a [DiffHunk],
        term: &str,
        options: SearchOptions,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            hunks,
            matcher: Matcher::compile(term, &options)?,
            kinds: options.kinds,
            cancel: None,
            hunk: 0,
            line: 0,
            summary: SearchSummary::default(),
            done: false,
        })
    }

    /// Stop at the next hunk boundary once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Totals so far.
    pub fn summary(&self) -> SearchSummary {
        self.summary
    }
}

impl Iterator for Search<'_> {
    type Item = SearchMatch;

    fn next(&mut self) -> Option<SearchMatch> {
        while !self.done {
            let Some(hunk) = self.hunks.get(self.hunk) else {
                self.done = true;
                break;
            };

            if self.line == 0 && self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                self.done = true;
                break;
            }

            let Some(lines) = hunk.lines() else {
                self.summary.skipped_deferred += 1;
                self.hunk += 1;
                continue;
            };
            let Some(line) = lines.get(self.line) else {
                self.hunk += 1;
                self.line = 0;
                continue;
            };
            let line_index = self.line;
            self.line += 1;

            if !self.kinds.includes(line.kind) {
                continue;
            }
            let ranges = self.matcher.find(&line.text);
            if ranges.is_empty() {
                continue;
            }

            self.summary.matched_lines += 1;
            self.summary.total_matches += ranges.len();
            return Some(SearchMatch {
                hunk_index: self.hunk,
                line_index,
                match_ranges: ranges,
                line_snapshot: line.text.clone(),
            });
        }
        None
    }
}

/// Search running on a background thread, streaming matches over a channel.
#[derive(Debug)]
pub struct SearchHandle {
    matches: Receiver<SearchMatch>,
    cancel: CancelToken,
    handle: Option<JoinHandle<SearchSummary>>,
}

impl SearchHandle {
    /// Request cancellation. Matches already sent stay in the channel.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Receiver of matches; closes when the search ends.
    pub fn matches(&self) -> &Receiver<SearchMatch> {
        &self.matches
    }

    /// Wait for the search thread and return its totals.
    pub fn finish(mut self) -> SearchSummary {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Run a search on its own thread.
///
/// The pattern is compiled before the thread starts so errors surface here.
pub fn spawn_search(
    hunks: Arc<[DiffHunk]>,
    term: &str,
    options: SearchOptions,
) -> Result<SearchHandle, SearchError> {
    // Validate now; the thread recompiles from the same inputs.
    Matcher::compile(term, &options)?;
    let term = term.to_string();
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel();

    let token = cancel.clone();
    let handle = thread::spawn(move || {
        let Ok(mut search) = Search::new(&hunks, &term, options) else {
            return SearchSummary::default();
        };
        search = search.with_cancel(token);
        let mut sent = 0usize;
        for m in search.by_ref() {
            if tx.send(m).is_err() {
                break;
            }
            sent += 1;
            if sent % YIELD_EVERY == 0 {
                thread::yield_now();
            }
        }
        search.summary()
    });

    Ok(SearchHandle {
        matches: rx,
        cancel,
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DiffLine, HunkBody};

    fn hunk(lines: Vec<DiffLine>) -> DiffHunk {
        DiffHunk {
            header_text: "@@ -1 +1 @@".into(),
            old_start: 1,
            old_line_count: 1,
            new_start: 1,
            new_line_count: 1,
            body: HunkBody::Materialized(lines),
        }
    }

    fn opts() -> SearchOptions {
        SearchOptions::default()
    }

    fn run(hunks: &[DiffHunk], term: &str, options: SearchOptions) -> Vec<SearchMatch> {
        Search::new(hunks, term, options).unwrap().collect()
    }

    #[test]
    fn case_insensitive_literal() {
        let hunks = [hunk(vec![DiffLine::context("Foo foo FOO", 1, 1)])];
        let found = run(&hunks, "foo", opts());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].match_ranges, vec![0..3, 4..7, 8..11]);
        assert_eq!(found[0].line_snapshot, "Foo foo FOO");
    }

    #[test]
    fn case_sensitive_literal() {
        let hunks = [hunk(vec![DiffLine::context("Foo foo FOO", 1, 1)])];
        let options = SearchOptions {
            case_sensitive: true,
            ..opts()
        };
        let found = run(&hunks, "foo", options);
        assert_eq!(found[0].match_ranges, vec![4..7]);
    }

    #[test]
    fn literal_matches_do_not_overlap() {
        let hunks = [hunk(vec![DiffLine::addition("aaaa", 1)])];
        let options = SearchOptions {
            case_sensitive: true,
            ..opts()
        };
        assert_eq!(run(&hunks, "aa", options)[0].match_ranges, vec![0..2, 2..4]);
    }

    #[test]
    fn per_line_cap() {
        let long = "x".repeat(1_000);
        let hunks = [hunk(vec![DiffLine::addition(long, 1)])];
        let found = run(&hunks, "x", opts());
        assert_eq!(found[0].match_ranges.len(), MAX_MATCHES_PER_LINE);
    }

    #[test]
    fn whole_word() {
        let hunks = [hunk(vec![DiffLine::context("cat concat cat_x cat", 1, 1)])];
        let options = SearchOptions {
            whole_word: true,
            ..opts()
        };
        assert_eq!(run(&hunks, "cat", options)[0].match_ranges, vec![0..3, 17..20]);
    }

    #[test]
    fn regex_mode_and_invalid_pattern() {
        let hunks = [hunk(vec![DiffLine::context("let x1 = y22;", 1, 1)])];
        let options = SearchOptions {
            regex: true,
            ..opts()
        };
        assert_eq!(run(&hunks, r"\d+", options)[0].match_ranges, vec![5..6, 10..12]);
        assert!(matches!(
            Search::new(&hunks, "(", options),
            Err(SearchError::InvalidPattern(_))
        ));
    }

    #[test]
    fn empty_regex_matches_are_ignored() {
        let hunks = [hunk(vec![DiffLine::context("abc", 1, 1)])];
        let options = SearchOptions {
            regex: true,
            ..opts()
        };
        assert!(run(&hunks, "z*", options).is_empty());
        assert!(run(&hunks, "", opts()).is_empty());
    }

    #[test]
    fn kind_filter() {
        let hunks = [hunk(vec![
            DiffLine::deletion("needle", 1),
            DiffLine::addition("needle", 1),
            DiffLine::context("needle", 2, 2),
        ])];
        let options = SearchOptions {
            kinds: LineKinds {
                additions: true,
                deletions: false,
                context: false,
            },
            ..opts()
        };
        let found = run(&hunks, "needle", options);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line_index, 1);
    }

    #[test]
    fn deferred_hunks_are_skipped() {
        let mut deferred = hunk(Vec::new());
        deferred.body = HunkBody::Deferred(0..100);
        let hunks = [deferred, hunk(vec![DiffLine::addition("hit", 1)])];
        let mut search = Search::new(&hunks, "hit", opts()).unwrap();
        let found: Vec<_> = search.by_ref().collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].hunk_index, 1);
        assert_eq!(search.summary().skipped_deferred, 1);
        assert_eq!(search.summary().total_matches, 1);
    }

    #[test]
    fn cancellation_yields_prefix() {
        let hunks: Vec<DiffHunk> = (0..20)
            .map(|i| hunk(vec![DiffLine::addition(format!("m{}", i), 1), DiffLine::addition("m", 2)]))
            .collect();
        let full = run(&hunks, "m", opts());
        assert_eq!(full.len(), 40);

        let token = CancelToken::new();
        let mut search = Search::new(&hunks, "m", opts())
            .unwrap()
            .with_cancel(token.clone());
        let mut partial = Vec::new();
        for m in search.by_ref() {
            partial.push(m);
            if partial.len() == 5 {
                token.cancel();
            }
        }
        assert!(partial.len() < full.len());
        assert_eq!(&full[..partial.len()], &partial[..]);
    }

    #[test]
    fn background_search_streams_matches() {
        let hunks: Arc<[DiffHunk]> = (0..50)
            .map(|i| hunk(vec![DiffLine::addition(format!("item {}", i), 1)]))
            .collect::<Vec<_>>()
            .into();
        let handle = spawn_search(hunks, "item", opts()).unwrap();
        let received: Vec<_> = handle.matches().iter().collect();
        let summary = handle.finish();
        assert_eq!(received.len(), 50);
        assert_eq!(summary.matched_lines, 50);
        assert!(received.windows(2).all(|w| w[0].hunk_index < w[1].hunk_index));
    }

    #[test]
    fn background_search_rejects_bad_pattern() {
        let hunks: Arc<[DiffHunk]> = Vec::new().into();
        let options = SearchOptions {
            regex: true,
            ..opts()
        };
        assert!(spawn_search(hunks, "[", options).is_err());
    }
}
