//! Diff data model: lines and hunks produced by the parser.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Kind of a line inside a unified diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiffLineKind {
    /// Line present only in the new side (`+`).
    Addition,
    /// Line present only in the old side (`-`).
    Deletion,
    /// Line present on both sides (` `).
    Context,
    /// A `@@ ... @@` header line.
    HunkHeader,
}

impl DiffLineKind {
    /// Whether this line consumes an old-side line number.
    #[inline]
    pub fn has_old(self) -> bool {
        matches!(self, Self::Deletion | Self::Context)
    }

    /// Whether this line consumes a new-side line number.
    #[inline]
    pub fn has_new(self) -> bool {
        matches!(self, Self::Addition | Self::Context)
    }
}

/// A single classified diff line (marker stripped).
///
/// Additions carry only `new_line_number`, deletions only `old_line_number`,
/// context lines carry both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    /// Line classification.
    pub kind: DiffLineKind,
    /// Content without the leading marker.
    pub text: String,
    /// 1-based old-side line number.
    pub old_line_number: Option<u32>,
    /// 1-based new-side line number.
    pub new_line_number: Option<u32>,
}

impl DiffLine {
    /// An added line at `new` in the new file.
    pub fn addition(text: impl Into<String>, new: u32) -> Self {
        Self {
            kind: DiffLineKind::Addition,
            text: text.into(),
            old_line_number: None,
            new_line_number: Some(new),
        }
    }

    /// A deleted line at `old` in the old file.
    pub fn deletion(text: impl Into<String>, old: u32) -> Self {
        Self {
            kind: DiffLineKind::Deletion,
            text: text.into(),
            old_line_number: Some(old),
            new_line_number: None,
        }
    }

    /// An unchanged line present at `old` and `new`.
    pub fn context(text: impl Into<String>, old: u32, new: u32) -> Self {
        Self {
            kind: DiffLineKind::Context,
            text: text.into(),
            old_line_number: Some(old),
            new_line_number: Some(new),
        }
    }
}

/// Body of a hunk: either parsed lines or a byte range into the raw patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HunkBody {
    /// Lines are parsed and in memory.
    Materialized(Vec<DiffLine>),
    /// Only the byte range of the body within the raw patch text is known.
    Deferred(Range<usize>),
}

/// One `@@` block of a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffHunk {
    /// The full header line, e.g. `@@ -16,8 +16,9 @@ use foo::{`.
    pub header_text: String,
    /// First old-side line number.
    pub old_start: u32,
    /// Number of old-side lines covered.
    pub old_line_count: u32,
    /// First new-side line number.
    pub new_start: u32,
    /// Number of new-side lines covered.
    pub new_line_count: u32,
    /// Parsed lines or a deferred byte range.
    pub body: HunkBody,
}

impl DiffHunk {
    /// Lines of a materialized hunk, `None` while deferred.
    pub fn lines(&self) -> Option<&[DiffLine]> {
        match &self.body {
            HunkBody::Materialized(lines) => Some(lines),
            HunkBody::Deferred(_) => None,
        }
    }

    /// Whether the body is parsed.
    pub fn is_materialized(&self) -> bool {
        matches!(self.body, HunkBody::Materialized(_))
    }

    /// Byte range of a deferred body.
    pub fn deferred_range(&self) -> Option<Range<usize>> {
        match &self.body {
            HunkBody::Deferred(range) => Some(range.clone()),
            HunkBody::Materialized(_) => None,
        }
    }

    /// Number of lines in the body. Deferred hunks report their declared size.
    pub fn line_count(&self) -> usize {
        match &self.body {
            HunkBody::Materialized(lines) => lines.len(),
            HunkBody::Deferred(_) => self.old_line_count as usize + self.new_line_count as usize,
        }
    }

    /// Count of (additions, deletions) in a materialized body.
    pub fn change_counts(&self) -> (usize, usize) {
        self.lines().map_or((0, 0), |lines| {
            lines.iter().fold((0, 0), |(a, d), l| match l.kind {
                DiffLineKind::Addition => (a + 1, d),
                DiffLineKind::Deletion => (a, d + 1),
                _ => (a, d),
            })
        })
    }
}
