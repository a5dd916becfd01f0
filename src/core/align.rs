//! Row alignment for split and unified rendering.
//!
//! Both functions are pure: they only re-pair lines in the order the diff
//! already has them, never compute a diff of their own.

use crate::core::{DiffHunk, DiffLine, DiffLineKind};

/// How a split row links its two panes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    /// Unchanged line shown on both sides.
    None,
    /// Old line replaced by a new line.
    Change,
    /// Old line with no counterpart.
    Deletion,
    /// New line with no counterpart.
    Addition,
}

/// One row of the side-by-side view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlignedRow {
    /// A hunk separator carrying the `@@` header.
    Header {
        /// Header line text.
        text: String,
        /// Index of the hunk in the input sequence.
        hunk_index: usize,
    },
    /// A content row. At least one side is present.
    Content {
        /// Old-side line.
        left: Option<DiffLine>,
        /// New-side line.
        right: Option<DiffLine>,
        /// Pane linkage.
        connection: ConnectionKind,
    },
}

impl AlignedRow {
    /// Whether this is a header row.
    pub fn is_header(&self) -> bool {
        matches!(self, Self::Header { .. })
    }

    /// Linkage of a content row; `None` for headers.
    pub fn connection(&self) -> Option<ConnectionKind> {
        match self {
            Self::Content { connection, .. } => Some(*connection),
            Self::Header { .. } => None,
        }
    }
}

/// Build side-by-side rows for `hunks`.
///
/// Each hunk gets a header row. Context lines pair with themselves; a run of
/// deletions followed by a run of additions is zipped row by row, the shorter
/// side padded with empty cells. Deferred hunks contribute only their header.
pub fn align_blocks(hunks: &[DiffHunk]) -> Vec<AlignedRow> {
    let mut rows = Vec::new();
    for (hunk_index, hunk) in hunks.iter().enumerate() {
        rows.push(AlignedRow::Header {
            text: hunk.header_text.clone(),
            hunk_index,
        });
        if let Some(lines) = hunk.lines() {
            align_hunk_lines(lines, &mut rows);
        }
    }
    rows
}

fn run_len(lines: &[DiffLine], kind: DiffLineKind) -> usize {
    lines.iter().take_while(|l| l.kind == kind).count()
}

fn align_hunk_lines(lines: &[DiffLine], rows: &mut Vec<AlignedRow>) {
    let mut i = 0;
    while i < lines.len() {
        if lines[i].kind == DiffLineKind::Context {
            rows.push(AlignedRow::Content {
                left: Some(lines[i].clone()),
                right: Some(lines[i].clone()),
                connection: ConnectionKind::None,
            });
            i += 1;
            continue;
        }

        let deletes = &lines[i..i + run_len(&lines[i..], DiffLineKind::Deletion)];
        let after = i + deletes.len();
        let inserts = &lines[after..after + run_len(&lines[after..], DiffLineKind::Addition)];
        let consumed = deletes.len() + inserts.len();

        for j in 0..deletes.len().max(inserts.len()) {
            let left = deletes.get(j).cloned();
            let right = inserts.get(j).cloned();
            let connection = match (&left, &right) {
                (Some(_), Some(_)) => ConnectionKind::Change,
                (Some(_), None) => ConnectionKind::Deletion,
                _ => ConnectionKind::Addition,
            };
            rows.push(AlignedRow::Content {
                left,
                right,
                connection,
            });
        }

        // A stray header line inside a body matches neither run.
        i += consumed.max(1);
    }
}

/// Logical side of a unified line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Old side (deletions).
    A,
    /// New side (additions).
    B,
    /// Both sides (context and headers).
    Both,
}

/// One line of the unified view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedLine {
    /// Line text (header text for header lines).
    pub text: String,
    /// Line classification.
    pub kind: DiffLineKind,
    /// Logical side.
    pub side: Side,
    /// Old-side line number.
    pub old_line_number: Option<u32>,
    /// New-side line number.
    pub new_line_number: Option<u32>,
    /// Text of an adjacent opposite-side line, for intra-line highlighting.
    pub paired_text: Option<String>,
    /// Index of the owning hunk.
    pub hunk_index: usize,
}

/// Flatten `hunks` into unified lines.
///
/// A deletion directly next to an addition (either order) records the
/// neighbour's text as `paired_text`; the following line is preferred for
/// deletions, the preceding one for additions. Deferred hunks contribute only
/// their header.
pub fn align_unified(hunks: &[DiffHunk]) -> Vec<UnifiedLine> {
    let mut out = Vec::new();
    for (hunk_index, hunk) in hunks.iter().enumerate() {
        out.push(UnifiedLine {
            text: hunk.header_text.clone(),
            kind: DiffLineKind::HunkHeader,
            side: Side::Both,
            old_line_number: None,
            new_line_number: None,
            paired_text: None,
            hunk_index,
        });
        let Some(lines) = hunk.lines() else {
            continue;
        };
        for (i, line) in lines.iter().enumerate() {
            let prev = i.checked_sub(1).and_then(|p| lines.get(p));
            let next = lines.get(i + 1);
            let (side, paired) = match line.kind {
                DiffLineKind::Deletion => (Side::A, pair_with(next, prev, DiffLineKind::Addition)),
                DiffLineKind::Addition => (Side::B, pair_with(prev, next, DiffLineKind::Deletion)),
                DiffLineKind::Context | DiffLineKind::HunkHeader => (Side::Both, None),
            };
            out.push(UnifiedLine {
                text: line.text.clone(),
                kind: line.kind,
                side,
                old_line_number: line.old_line_number,
                new_line_number: line.new_line_number,
                paired_text: paired,
                hunk_index,
            });
        }
    }
    out
}

fn pair_with(
    first: Option<&DiffLine>,
    second: Option<&DiffLine>,
    kind: DiffLineKind,
) -> Option<String> {
    [first, second]
        .into_iter()
        .flatten()
        .find(|l| l.kind == kind)
        .map(|l| l.text.clone())
}

/// Row indices of every header row, ascending.
pub fn hunk_starts(rows: &[AlignedRow]) -> Vec<usize> {
    rows.iter()
        .enumerate()
        .filter_map(|(i, r)| r.is_header().then_some(i))
        .collect()
}

/// First hunk start strictly after `current_row`.
pub fn next_hunk_row(starts: &[usize], current_row: usize) -> Option<usize> {
    let idx = starts.partition_point(|&s| s <= current_row);
    starts.get(idx).copied()
}

/// Last hunk start strictly before `current_row`.
pub fn prev_hunk_row(starts: &[usize], current_row: usize) -> Option<usize> {
    let idx = starts.partition_point(|&s| s < current_row);
    idx.checked_sub(1).map(|i| starts[i])
}
