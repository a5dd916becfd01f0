//! Integration tests for large file handling.

use std::sync::Arc;
use std::time::Instant;

use diffcore::core::{
    parse_patch, DiffEngine, DiffOptions, DiffRequest, FeatureToggle, HunkCache, LfmReason,
    MemorySource, ParseMode, Preferences, Search, SearchOptions,
};

/// Patch with `hunks` hunks, each replacing `per_hunk` lines.
fn generate_patch(hunks: usize, per_hunk: usize) -> String {
    let mut out = String::from("diff --git a/big.txt b/big.txt\n--- a/big.txt\n+++ b/big.txt\n");
    for h in 0..hunks {
        let start = 1 + h * (per_hunk + 10);
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            start,
            per_hunk + 1,
            start,
            per_hunk + 1
        ));
        out.push_str(&format!(" anchor {}\n", h));
        for i in 0..per_hunk {
            out.push_str(&format!("-old line {} {}\n", h, i));
        }
        for i in 0..per_hunk {
            out.push_str(&format!("+new line {} {}\n", h, i));
        }
    }
    out
}

fn engine(patch: String) -> DiffEngine {
    let source = Arc::new(MemorySource::new());
    source.insert_patch("big.txt", false, patch);
    DiffEngine::new(
        source,
        Arc::new(Preferences::default()),
        Arc::new(HunkCache::default()),
    )
}

#[test]
fn parse_large_patch_completes_in_reasonable_time() {
    let patch = generate_patch(2_000, 10);

    let start = Instant::now();
    let hunks: Vec<_> = parse_patch(&patch, ParseMode::Materialize).collect();
    let elapsed = start.elapsed();

    assert!(
        elapsed.as_millis() < 1000,
        "Parse took too long: {:?}",
        elapsed
    );
    assert_eq!(hunks.len(), 2_000);
    assert_eq!(hunks[1_999].lines().map(<[_]>::len), Some(21));
}

#[test]
fn large_patch_activates_large_file_mode() {
    let engine = engine(generate_patch(1_500, 10));
    let outcome = engine
        .request(&DiffRequest::new("big.txt", false))
        .unwrap();

    assert!(outcome.decision.active);
    assert!(outcome.decision.reasons.contains(&LfmReason::LineCount));
    assert!(outcome.decision.reasons.contains(&LfmReason::HunkCount));
    assert!(outcome.plan.collapse_hunks);
    assert!(!outcome.plan.side_by_side);
    assert!(!outcome.plan.word_diff);
    assert_eq!(outcome.hunks.len(), 1_500);
    assert!(outcome.hunks.iter().all(|h| !h.is_materialized()));
}

#[test]
fn deferred_hunks_expand_on_demand() {
    let engine = engine(generate_patch(1_500, 10));
    engine
        .request(&DiffRequest::new("big.txt", false))
        .unwrap();

    let hunk = engine.expand_hunk("big.txt", false, 700).unwrap();
    let lines = hunk.lines().unwrap();
    assert_eq!(lines.len(), 21);
    assert_eq!(lines[0].text, "anchor 700");
    assert_eq!(lines[11].text, "new line 700 0");

    assert!(engine.expand_hunk("big.txt", false, 1_500).is_none());
}

#[test]
fn long_line_triggers_large_file_mode() {
    let long = "x".repeat(6_000);
    let patch = format!("@@ -1 +1 @@\n-short\n+{}\n", long);
    let engine = engine(patch);
    let outcome = engine
        .request(&DiffRequest::new("big.txt", false))
        .unwrap();

    assert!(outcome.decision.active);
    assert_eq!(outcome.decision.reasons, vec![LfmReason::LineLength]);
}

#[test]
fn forcing_off_keeps_full_rendering() {
    let engine = engine(generate_patch(1_500, 10));
    let req = DiffRequest::new("big.txt", false).with_options(DiffOptions {
        large_file_mode: FeatureToggle::Off,
        ..DiffOptions::default()
    });
    let outcome = engine.request(&req).unwrap();

    assert!(!outcome.decision.active);
    assert!(!outcome.decision.reasons.is_empty());
    assert!(outcome.plan.side_by_side);
    assert!(outcome.hunks.iter().all(|h| h.is_materialized()));
}

#[test]
fn search_large_patch() {
    let patch = generate_patch(2_000, 10);
    let hunks: Vec<_> = parse_patch(&patch, ParseMode::Materialize).collect();

    let start = Instant::now();
    let count = Search::new(&hunks, "line 1999", SearchOptions::default())
        .unwrap()
        .count();
    let elapsed = start.elapsed();

    assert!(
        elapsed.as_millis() < 1000,
        "Search took too long: {:?}",
        elapsed
    );
    assert_eq!(count, 20);
}
