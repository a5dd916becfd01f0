//! diffcore - the computation core behind a git diff viewer.
//!
//! Parses unified diff text into hunks as it streams, decides when a change
//! is too large for full-fidelity rendering, caches parsed hunks under a
//! byte budget, aligns them into split or unified rows, and searches them.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use diffcore::prelude::*;
//!
//! let engine = DiffEngine::new(
//!     Arc::new(GitSource::new(".")),
//!     Arc::new(Preferences::default()),
//!     Arc::new(HunkCache::default()),
//! );
//! let outcome = engine.request(&DiffRequest::new("src/lib.rs", false))?;
//! let rows = align_blocks(&outcome.hunks);
//! ```

#![deny(missing_docs)]

pub mod core;
pub mod metrics;
pub mod prelude;
pub mod worker;
