//! Preflight analysis: decide whether a change-set needs large-file mode.
//!
//! Everything here is pure. Inputs are cheap statistics gathered before any
//! real parsing (numstat counts and a single scan over the patch bytes).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Three-valued feature switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureToggle {
    /// Follow the computed condition.
    #[default]
    Auto,
    /// Always true.
    On,
    /// Always false.
    Off,
}

impl FeatureToggle {
    /// Resolve against a computed condition.
    #[inline]
    pub fn resolve(self, condition: bool) -> bool {
        match self {
            Self::Auto => condition,
            Self::On => true,
            Self::Off => false,
        }
    }
}

impl fmt::Display for FeatureToggle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::On => "on",
            Self::Off => "off",
        })
    }
}

/// Error for an unrecognized toggle string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("expected one of auto, on, off; got {0:?}")]
pub struct InvalidToggle(pub String);

impl FromStr for FeatureToggle {
    type Err = InvalidToggle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" | "true" | "yes" => Ok(Self::On),
            "off" | "false" | "no" => Ok(Self::Off),
            _ => Err(InvalidToggle(s.to_string())),
        }
    }
}

/// Limits beyond which large-file mode activates. Any one exceeded is enough.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfmThresholds {
    /// Formatted patch size in megabytes.
    pub size_mb: f64,
    /// Estimated number of diff lines.
    pub line_count: usize,
    /// Longest single line in characters.
    pub max_line_length: usize,
    /// Number of hunks.
    pub hunk_count: usize,
}

impl Default for LfmThresholds {
    fn default() -> Self {
        Self {
            size_mb: 2.0,
            line_count: 20_000,
            max_line_length: 5_000,
            hunk_count: 1_000,
        }
    }
}

impl LfmThresholds {
    fn size_bytes(&self) -> u64 {
        (self.size_mb * 1024.0 * 1024.0) as u64
    }
}

/// Counts from a numstat line (`additions\tdeletions\tpath`).
/// Binary files report `-` for both counts, stored here as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Numstat {
    /// Added lines, `None` when reported as `-`.
    pub additions: Option<usize>,
    /// Deleted lines, `None` when reported as `-`.
    pub deletions: Option<usize>,
}

impl Numstat {
    /// Both counts were the binary placeholder.
    pub fn is_binary(&self) -> bool {
        self.additions.is_none() && self.deletions.is_none()
    }
}

/// Parse the first numstat line in `text`.
///
/// Empty output (no changes) yields zero counts. Returns `None` when the
/// counts are neither numbers nor the `-` placeholder.
pub fn parse_numstat(text: &str) -> Option<Numstat> {
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return Some(Numstat {
            additions: Some(0),
            deletions: Some(0),
        });
    };
    let mut fields = line.split('\t');
    let count = |field: Option<&str>| -> Option<Option<usize>> {
        match field?.trim() {
            "-" => Some(None),
            n => n.parse().ok().map(Some),
        }
    };
    let additions = count(fields.next())?;
    let deletions = count(fields.next())?;
    Some(Numstat {
        additions,
        deletions,
    })
}

/// Cheap single-pass statistics over raw patch text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchProbe {
    /// Total bytes including newlines.
    pub bytes: u64,
    /// Number of lines.
    pub line_count: usize,
    /// Number of `@@` lines.
    pub hunk_count: usize,
    /// Longest line in characters.
    pub max_line_length: usize,
}

impl PatchProbe {
    /// Scan a line stream without retaining it.
    pub fn scan<I>(lines: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut probe = Self::default();
        for line in lines {
            let line = line.as_ref();
            probe.bytes += line.len() as u64 + 1;
            probe.line_count += 1;
            if line.starts_with("@@") {
                probe.hunk_count += 1;
            }
            // Byte length bounds char count; only count chars when it matters.
            if line.len() > probe.max_line_length {
                probe.max_line_length = probe.max_line_length.max(line.chars().count());
            }
        }
        probe
    }

    /// Scan patch text held in memory.
    pub fn scan_str(text: &str) -> Self {
        let mut probe = Self::scan(text.lines());
        probe.bytes = text.len() as u64;
        probe
    }
}

/// Inputs to the activation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreflightStats {
    /// Added lines from numstat.
    pub additions: usize,
    /// Deleted lines from numstat.
    pub deletions: usize,
    /// Formatted patch size in bytes.
    pub patch_size_bytes: u64,
    /// Estimated number of lines to render.
    pub estimated_line_count: usize,
    /// Longest line in characters.
    pub max_line_length: usize,
    /// Number of hunks.
    pub hunk_count: usize,
    /// Both numstat counts were `-`.
    pub is_binary: bool,
}

impl PreflightStats {
    /// Combine numstat counts with a patch probe.
    pub fn new(numstat: Numstat, probe: PatchProbe) -> Self {
        let additions = numstat.additions.unwrap_or(0);
        let deletions = numstat.deletions.unwrap_or(0);
        Self {
            additions,
            deletions,
            patch_size_bytes: probe.bytes,
            estimated_line_count: (additions + deletions).max(probe.line_count),
            max_line_length: probe.max_line_length,
            hunk_count: probe.hunk_count,
            is_binary: numstat.is_binary(),
        }
    }
}

/// Which threshold was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LfmReason {
    /// Patch bytes over `size_mb`.
    PatchSize,
    /// Line estimate over `line_count`.
    LineCount,
    /// Some line longer than `max_line_length`.
    LineLength,
    /// More hunks than `hunk_count`.
    HunkCount,
}

/// List every threshold `stats` exceeds, in a fixed order.
pub fn exceeded_thresholds(stats: &PreflightStats, thresholds: &LfmThresholds) -> Vec<LfmReason> {
    let checks = [
        (
            stats.patch_size_bytes > thresholds.size_bytes(),
            LfmReason::PatchSize,
        ),
        (
            stats.estimated_line_count > thresholds.line_count,
            LfmReason::LineCount,
        ),
        (
            stats.max_line_length > thresholds.max_line_length,
            LfmReason::LineLength,
        ),
        (stats.hunk_count > thresholds.hunk_count, LfmReason::HunkCount),
    ];
    checks
        .into_iter()
        .filter_map(|(hit, reason)| hit.then_some(reason))
        .collect()
}

/// Per-feature toggles consulted once the activation decision is known.
///
/// Each toggle answers "degrade this feature?": `Auto` degrades exactly when
/// large-file mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LfmFeatureFlags {
    /// Disable word-level diff.
    pub word_diff: FeatureToggle,
    /// Disable syntax highlighting.
    pub syntax_highlight: FeatureToggle,
    /// Disable side-by-side layout.
    pub side_by_side: FeatureToggle,
    /// Disable soft wrap.
    pub soft_wrap: FeatureToggle,
    /// Start hunks collapsed (bodies deferred).
    pub collapse_hunks: FeatureToggle,
}

/// Resolved set of degraded features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DisabledFeatures {
    /// Word-level diff off.
    pub word_diff: bool,
    /// Syntax highlighting off.
    pub syntax_highlight: bool,
    /// Side-by-side layout off.
    pub side_by_side: bool,
    /// Soft wrap off.
    pub soft_wrap: bool,
    /// Hunks start collapsed.
    pub collapse_hunks: bool,
}

/// Where the activation decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Thresholds were evaluated.
    Measured,
    /// The request's large-file-mode toggle was `on` or `off`.
    Requested,
    /// A per-file override was present.
    FileOverride,
}

/// Outcome of a preflight pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightDecision {
    /// Large-file mode is active.
    pub active: bool,
    /// Thresholds that were exceeded (even when overridden).
    pub reasons: Vec<LfmReason>,
    /// What settled `active`.
    pub source: DecisionSource,
    /// Feature degradations.
    pub disabled: DisabledFeatures,
    /// The change summary marked the file binary.
    pub is_binary: bool,
}

/// Decide large-file mode.
///
/// Precedence: per-file override, then the requested toggle, then the
/// thresholds.
pub fn analyze(
    stats: &PreflightStats,
    thresholds: &LfmThresholds,
    requested: FeatureToggle,
    file_override: Option<bool>,
    flags: &LfmFeatureFlags,
) -> PreflightDecision {
    let reasons = exceeded_thresholds(stats, thresholds);
    let measured = !reasons.is_empty();

    let (active, source) = match (file_override, requested) {
        (Some(forced), _) => (forced, DecisionSource::FileOverride),
        (None, FeatureToggle::Auto) => (measured, DecisionSource::Measured),
        (None, toggle) => (toggle.resolve(measured), DecisionSource::Requested),
    };

    let disabled = DisabledFeatures {
        word_diff: flags.word_diff.resolve(active),
        syntax_highlight: flags.syntax_highlight.resolve(active),
        side_by_side: flags.side_by_side.resolve(active),
        soft_wrap: flags.soft_wrap.resolve(active),
        collapse_hunks: flags.collapse_hunks.resolve(active),
    };

    PreflightDecision {
        active,
        reasons,
        source,
        disabled,
        is_binary: stats.is_binary,
    }
}
