//! Byte-budgeted LRU cache of parsed hunks.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::core::{DiffHunk, HunkBody};

/// Fixed per-line bookkeeping cost added to each materialized line.
pub const LINE_OVERHEAD_BYTES: usize = 64;

/// Assumed line length when estimating the cost of a deferred hunk.
/// A tuning guess, not a measurement.
pub const AVERAGE_LINE_LENGTH: usize = 80;

/// Estimated in-memory cost of a hunk in bytes.
pub fn estimate_cost(hunk: &DiffHunk) -> usize {
    let body: usize = match &hunk.body {
        HunkBody::Materialized(lines) => lines
            .iter()
            .map(|l| l.text.len() + LINE_OVERHEAD_BYTES)
            .sum(),
        HunkBody::Deferred(_) => hunk.line_count().saturating_mul(AVERAGE_LINE_LENGTH),
    };
    body.saturating_add(hunk.header_text.len())
}

/// Cache key: one hunk of one file in one staging state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HunkKey {
    /// Repository-relative file path; also the grouping key.
    pub path: String,
    /// Position of the hunk in the file's diff.
    pub hunk_index: usize,
    /// Staged (index) vs. unstaged (worktree) diff.
    pub staged: bool,
}

impl HunkKey {
    /// Build a key.
    pub fn new(path: impl Into<String>, hunk_index: usize, staged: bool) -> Self {
        Self {
            path: path.into(),
            hunk_index,
            staged,
        }
    }

    /// File-level grouping key used by [`HunkCache::remove_file`].
    pub fn file_key(&self) -> &str {
        &self.path
    }
}

/// A cached hunk with its accounted cost.
#[derive(Debug, Clone)]
pub struct CachedHunk {
    /// Shared hunk data.
    pub hunk: Arc<DiffHunk>,
    /// Bytes charged against the budget.
    pub cost: usize,
    /// Grouping key for file-level invalidation.
    pub file_key: String,
}

impl CachedHunk {
    /// Wrap a hunk, computing its cost.
    pub fn new(hunk: DiffHunk, file_key: impl Into<String>) -> Self {
        let cost = estimate_cost(&hunk);
        Self::with_cost(hunk, file_key, cost)
    }

    /// Wrap a hunk with an explicit cost.
    pub fn with_cost(hunk: DiffHunk, file_key: impl Into<String>, cost: usize) -> Self {
        Self {
            hunk: Arc::new(hunk),
            cost,
            file_key: file_key.into(),
        }
    }
}

/// Cache budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on summed entry cost.
    pub max_bytes: usize,
    /// Upper bound on entry count.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_entries: 20_000,
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    /// Live entries.
    pub entries: usize,
    /// Summed cost of live entries.
    pub total_bytes: usize,
    /// Byte budget.
    pub max_bytes: usize,
    /// Successful lookups.
    pub hits: u64,
    /// Failed lookups.
    pub misses: u64,
    /// Entries dropped to respect a budget.
    pub evictions: u64,
    /// `hits / (hits + misses)`, or 0 with no lookups.
    pub hit_rate: f64,
}

#[derive(Debug)]
struct CacheInner {
    entries: LruCache<HunkKey, CachedHunk>,
    config: CacheConfig,
    total_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn evict_to_budget(&mut self) {
        while self.total_bytes > self.config.max_bytes {
            if !self.evict_one() {
                break;
            }
        }
        while self.entries.len() > self.config.max_entries {
            if !self.evict_one() {
                break;
            }
        }
    }

    fn evict_one(&mut self) -> bool {
        match self.entries.pop_lru() {
            Some((key, entry)) => {
                self.total_bytes -= entry.cost;
                self.evictions += 1;
                log::trace!(
                    "evicted hunk {}#{} ({} bytes)",
                    key.path,
                    key.hunk_index,
                    entry.cost
                );
                true
            }
            None => false,
        }
    }
}

/// Thread-safe LRU of [`CachedHunk`]s bounded by bytes and entry count.
///
/// Every operation takes the instance lock, so the byte total and the
/// recency order always agree. Separate instances share nothing.
#[derive(Debug)]
pub struct HunkCache {
    inner: Mutex<CacheInner>,
}

impl Default for HunkCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl HunkCache {
    /// Create an empty cache with the given budgets.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                config,
                total_bytes: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        }
    }

    /// Look up a hunk, marking it most recently used on a hit.
    pub fn get(&self, key: &HunkKey) -> Option<CachedHunk> {
        let mut inner = self.inner.lock();
        match inner.entries.get(key).cloned() {
            Some(entry) => {
                inner.hits += 1;
                Some(entry)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert or replace an entry, then evict least recently used entries
    /// until both budgets hold.
    pub fn set(&self, key: HunkKey, entry: CachedHunk) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(&key) {
            inner.total_bytes -= old.cost;
        }
        inner.total_bytes += entry.cost;
        inner.entries.put(key, entry);
        inner.evict_to_budget();
    }

    /// Remove one entry.
    pub fn remove(&self, key: &HunkKey) -> Option<CachedHunk> {
        let mut inner = self.inner.lock();
        let entry = inner.entries.pop(key)?;
        inner.total_bytes -= entry.cost;
        Some(entry)
    }

    /// Remove every entry grouped under `file_key`. Returns how many went.
    pub fn remove_file(&self, file_key: &str) -> usize {
        let mut inner = self.inner.lock();
        let doomed: Vec<HunkKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.file_key == file_key)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            if let Some(entry) = inner.entries.pop(key) {
                inner.total_bytes -= entry.cost;
            }
        }
        doomed.len()
    }

    /// Drop all entries. Hit, miss and eviction counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
            max_bytes: inner.config.max_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups > 0 {
                inner.hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Configured budgets.
    pub fn config(&self) -> CacheConfig {
        self.inner.lock().config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DiffLine;

    fn hunk(lines: Vec<DiffLine>) -> DiffHunk {
        DiffHunk {
            header_text: String::new(),
            old_start: 1,
            old_line_count: 0,
            new_start: 1,
            new_line_count: lines.len() as u32,
            body: HunkBody::Materialized(lines),
        }
    }

    fn sized(path: &str, cost: usize) -> CachedHunk {
        CachedHunk::with_cost(hunk(Vec::new()), path, cost)
    }

    fn cache(max_bytes: usize, max_entries: usize) -> HunkCache {
        HunkCache::new(CacheConfig {
            max_bytes,
            max_entries,
        })
    }

    #[test]
    fn cost_of_materialized_lines() {
        let h = hunk(vec![DiffLine::addition("abcd", 1), DiffLine::addition("", 2)]);
        assert_eq!(estimate_cost(&h), 4 + 2 * LINE_OVERHEAD_BYTES);
    }

    #[test]
    fn cost_of_deferred_hunk_uses_average_length() {
        let h = DiffHunk {
            header_text: "@@".into(),
            old_start: 1,
            old_line_count: 3,
            new_start: 1,
            new_line_count: 2,
            body: HunkBody::Deferred(0..10),
        };
        assert_eq!(estimate_cost(&h), 5 * AVERAGE_LINE_LENGTH + 2);
    }

    #[test]
    fn cost_of_huge_deferred_hunk_counts_both_sides() {
        let h = DiffHunk {
            header_text: String::new(),
            old_start: 1,
            old_line_count: u32::MAX,
            new_start: 1,
            new_line_count: 1,
            body: HunkBody::Deferred(0..0),
        };
        assert_eq!(estimate_cost(&h), (u32::MAX as usize + 1) * AVERAGE_LINE_LENGTH);
    }

    #[test]
    fn byte_budget_evicts_once() {
        let c = cache(100, 100);
        for i in 0..3 {
            c.set(HunkKey::new("a.rs", i, false), sized("a.rs", 40));
        }
        let s = c.stats();
        assert_eq!(s.evictions, 1);
        assert_eq!(s.entries, 2);
        assert_eq!(s.total_bytes, 80);
        assert!(c.get(&HunkKey::new("a.rs", 0, false)).is_none());
    }

    #[test]
    fn entry_budget_evicts_least_recently_used() {
        let c = cache(usize::MAX, 3);
        for i in 0..3 {
            c.set(HunkKey::new("f", i, false), sized("f", 1));
        }
        assert!(c.get(&HunkKey::new("f", 0, false)).is_some());
        c.set(HunkKey::new("f", 3, false), sized("f", 1));
        assert!(c.get(&HunkKey::new("f", 1, false)).is_none());
        assert!(c.get(&HunkKey::new("f", 0, false)).is_some());
        assert_eq!(c.stats().entries, 3);
    }

    #[test]
    fn replacing_key_adjusts_total() {
        let c = cache(1_000, 10);
        let key = HunkKey::new("f", 0, true);
        c.set(key.clone(), sized("f", 300));
        c.set(key.clone(), sized("f", 10));
        let s = c.stats();
        assert_eq!(s.entries, 1);
        assert_eq!(s.total_bytes, 10);
        assert_eq!(s.evictions, 0);
    }

    #[test]
    fn oversized_entry_is_not_retained() {
        let c = cache(50, 10);
        c.set(HunkKey::new("f", 0, false), sized("f", 51));
        let s = c.stats();
        assert_eq!(s.entries, 0);
        assert_eq!(s.total_bytes, 0);
    }

    #[test]
    fn remove_file_drops_both_staging_states() {
        let c = cache(1_000, 10);
        c.set(HunkKey::new("a", 0, false), sized("a", 5));
        c.set(HunkKey::new("a", 0, true), sized("a", 5));
        c.set(HunkKey::new("b", 0, false), sized("b", 5));
        assert_eq!(c.remove_file("a"), 2);
        let s = c.stats();
        assert_eq!(s.entries, 1);
        assert_eq!(s.total_bytes, 5);
        assert_eq!(s.evictions, 0);
    }

    #[test]
    fn remove_and_clear() {
        let c = cache(1_000, 10);
        let key = HunkKey::new("a", 1, false);
        c.set(key.clone(), sized("a", 7));
        assert_eq!(c.remove(&key).map(|e| e.cost), Some(7));
        assert!(c.remove(&key).is_none());
        c.set(key, sized("a", 7));
        c.clear();
        assert_eq!(c.stats().entries, 0);
        assert_eq!(c.stats().total_bytes, 0);
    }

    #[test]
    fn hit_rate() {
        let c = cache(1_000, 10);
        assert_eq!(c.stats().hit_rate, 0.0);
        let key = HunkKey::new("a", 0, false);
        c.set(key.clone(), sized("a", 1));
        c.get(&key);
        c.get(&key);
        c.get(&HunkKey::new("zzz", 0, false));
        let s = c.stats();
        assert_eq!((s.hits, s.misses), (2, 1));
        assert!((s.hit_rate - 2.0 / 3.0).abs() < f64::EPSILON);
    }
}
