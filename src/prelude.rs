//! Common re-exports for convenient importing.
//!
//! # Example
//!
//! ```rust,ignore
//! use diffcore::prelude::*;
//! ```

pub use crate::core::{
    align_blocks, align_unified, AlignedRow, CancelToken, ConnectionKind, DiffEngine, DiffError,
    DiffHunk, DiffLine, DiffLineKind, DiffOptions, DiffOutcome, DiffRequest, FeatureToggle,
    GitSource, HunkBody, HunkCache, HunkParser, MemorySource, Preferences, Search, SearchMatch,
    SearchOptions, UnifiedLine,
};
pub use crate::worker::{spawn_diff_worker, DiffLoadResponse, DiffWorker};
