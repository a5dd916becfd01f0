//! Diff engine: preflight, parse and cache behind one request API.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{
    analyze, materialize, parse_numstat, parse_patch, CachedHunk, CancelToken, DiffHunk,
    FeatureToggle, HunkCache, HunkKey, ParseMode, ParseStats, PatchProbe, PreferenceStore,
    PreflightDecision, PreflightStats, SourceRequest, TextSource,
};
use crate::metrics;

/// Errors from a diff request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiffError {
    /// Gathering change statistics failed upstream.
    #[error("preflight failed: {0}")]
    PreflightFailed(String),
    /// Producing the diff text failed upstream.
    #[error("diff failed: {0}")]
    DiffFailed(String),
}

/// Per-request settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffOptions {
    /// Lines of context around each change.
    pub context_lines: u32,
    /// Word-level diff requested.
    pub word_diff: bool,
    /// Syntax highlighting requested.
    pub syntax_highlight: bool,
    /// Force large-file mode on or off, or decide from size.
    pub large_file_mode: FeatureToggle,
    /// Force side-by-side on or off, or follow large-file mode.
    pub side_by_side: FeatureToggle,
    /// Disable rename detection upstream.
    pub no_renames: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            word_diff: true,
            syntax_highlight: true,
            large_file_mode: FeatureToggle::Auto,
            side_by_side: FeatureToggle::Auto,
            no_renames: false,
        }
    }
}

/// A request for one file's diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRequest {
    /// Repository-relative path.
    pub path: String,
    /// Staged (index) or unstaged (worktree) changes.
    pub staged: bool,
    /// Settings.
    pub options: DiffOptions,
}

impl DiffRequest {
    /// Request with default options.
    pub fn new(path: impl Into<String>, staged: bool) -> Self {
        Self {
            path: path.into(),
            staged,
            options: DiffOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: DiffOptions) -> Self {
        self.options = options;
        self
    }

    fn source_request(&self) -> SourceRequest {
        SourceRequest {
            path: self.path.clone(),
            staged: self.staged,
            context_lines: self.options.context_lines,
            no_renames: self.options.no_renames,
        }
    }

    fn key(&self) -> FileKey {
        (self.path.clone(), self.staged)
    }
}

/// Features the renderer should use after preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPlan {
    /// Large-file mode is active.
    pub large_file_mode: bool,
    /// Compute word-level highlights.
    pub word_diff: bool,
    /// Syntax highlight lines.
    pub syntax_highlight: bool,
    /// Use the side-by-side layout.
    pub side_by_side: bool,
    /// Soft-wrap long lines.
    pub soft_wrap: bool,
    /// Start with hunks collapsed.
    pub collapse_hunks: bool,
}

impl RenderPlan {
    /// Combine a preflight decision with what the request asked for.
    pub fn resolve(decision: &PreflightDecision, options: &DiffOptions) -> Self {
        let off = &decision.disabled;
        Self {
            large_file_mode: decision.active,
            word_diff: options.word_diff && !off.word_diff,
            syntax_highlight: options.syntax_highlight && !off.syntax_highlight,
            side_by_side: options.side_by_side.resolve(!off.side_by_side),
            soft_wrap: !off.soft_wrap,
            collapse_hunks: off.collapse_hunks,
        }
    }
}

/// Result of a diff request.
#[derive(Debug, Clone)]
pub struct DiffOutcome {
    /// Preflight inputs.
    pub stats: PreflightStats,
    /// Preflight result.
    pub decision: PreflightDecision,
    /// Resolved rendering features.
    pub plan: RenderPlan,
    /// Hunks in source order. Empty for binary files.
    pub hunks: Vec<DiffHunk>,
    /// Parser counters; zero when served from cache.
    pub parse: ParseStats,
    /// Every hunk came from the cache.
    pub from_cache: bool,
    /// The request was cancelled; `hunks` is a prefix.
    pub cancelled: bool,
}

impl DiffOutcome {
    /// The file was reported binary; no hunks were parsed.
    pub fn is_binary(&self) -> bool {
        self.decision.is_binary
    }
}

type FileKey = (String, bool);

/// What the engine remembers about a fully parsed file.
#[derive(Debug)]
struct FileEntry {
    options: DiffOptions,
    hunk_count: usize,
    stats: PreflightStats,
    decision: PreflightDecision,
    /// Raw patch kept while hunks are deferred.
    patch: Option<Arc<str>>,
}

#[derive(Debug, Default)]
struct EngineState {
    files: HashMap<FileKey, FileEntry>,
}

/// Orchestrates preflight, parsing and caching.
///
/// Requests on one engine run one at a time. Cancellation goes through a
/// separate lock so it can reach a request that is in flight.
pub struct DiffEngine {
    source: Arc<dyn TextSource>,
    prefs: Arc<dyn PreferenceStore>,
    cache: Arc<HunkCache>,
    state: Mutex<EngineState>,
    active: Mutex<HashMap<FileKey, CancelToken>>,
}

impl std::fmt::Debug for DiffEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffEngine")
            .field("cache", &self.cache.stats())
            .field("files", &self.state.lock().files.len())
            .finish()
    }
}

impl DiffEngine {
    /// Build an engine over a text source, preferences and a cache.
    pub fn new(
        source: Arc<dyn TextSource>,
        prefs: Arc<dyn PreferenceStore>,
        cache: Arc<HunkCache>,
    ) -> Self {
        Self {
            source,
            prefs,
            cache,
            state: Mutex::new(EngineState::default()),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// The hunk cache.
    pub fn cache(&self) -> &Arc<HunkCache> {
        &self.cache
    }

    /// Run a request and collect its hunks.
    pub fn request(&self, req: &DiffRequest) -> Result<DiffOutcome, DiffError> {
        self.request_with(req, |_, _| {})
    }

    /// Run a request, calling `on_hunk` for each hunk as soon as it is
    /// available.
    pub fn request_with<F>(&self, req: &DiffRequest, on_hunk: F) -> Result<DiffOutcome, DiffError>
    where
        F: FnMut(usize, &DiffHunk),
    {
        self.request_with_token(req, CancelToken::new(), on_hunk)
    }

    /// Like [`DiffEngine::request_with`], stopping early once `token` is
    /// cancelled. The token is also reachable through [`DiffEngine::cancel`]
    /// while the request runs.
    pub fn request_with_token<F>(
        &self,
        req: &DiffRequest,
        token: CancelToken,
        mut on_hunk: F,
    ) -> Result<DiffOutcome, DiffError>
    where
        F: FnMut(usize, &DiffHunk),
    {
        let _timer = metrics::Timer::start("engine.request");
        let key = req.key();

        // Only the request holding the state lock is registered, so a queued
        // request never displaces the running one's token.
        let mut state = self.state.lock();
        self.active.lock().insert(key.clone(), token.clone());

        let result = self.run_request(&mut state, req, &key, &token, &mut on_hunk);

        let mut active = self.active.lock();
        if active.get(&key).is_some_and(|t| t.same(&token)) {
            active.remove(&key);
        }
        result
    }

    fn run_request(
        &self,
        state: &mut EngineState,
        req: &DiffRequest,
        key: &FileKey,
        token: &CancelToken,
        on_hunk: &mut dyn FnMut(usize, &DiffHunk),
    ) -> Result<DiffOutcome, DiffError> {
        if let Some(outcome) = self.lookup_cached(state, req) {
            log::debug!("{}: served {} hunks from cache", req.path, outcome.hunks.len());
            for (i, hunk) in outcome.hunks.iter().enumerate() {
                on_hunk(i, hunk);
            }
            return Ok(outcome);
        }
        self.forget(state, key);

        let sreq = req.source_request();
        let numstat_text = self
            .source
            .numstat(&sreq)
            .map_err(|e| DiffError::PreflightFailed(e.to_string()))?;
        let numstat = parse_numstat(&numstat_text).ok_or_else(|| {
            DiffError::PreflightFailed(format!("unrecognized numstat output: {:?}", numstat_text))
        })?;

        if numstat.is_binary() {
            let stats = PreflightStats::new(numstat, PatchProbe::default());
            let decision = self.preflight(req, &stats);
            return Ok(DiffOutcome {
                plan: RenderPlan::resolve(&decision, &req.options),
                stats,
                decision,
                hunks: Vec::new(),
                parse: ParseStats::default(),
                from_cache: false,
                cancelled: false,
            });
        }

        let patch: Arc<str> = self
            .source
            .patch_text(&sreq)
            .map_err(|e| DiffError::DiffFailed(e.to_string()))?
            .into();
        let stats = PreflightStats::new(numstat, PatchProbe::scan_str(&patch));
        let decision = self.preflight(req, &stats);
        let mode = if decision.disabled.collapse_hunks {
            ParseMode::Defer
        } else {
            ParseMode::Materialize
        };

        let mut parser = parse_patch(&patch, mode).with_cancel(token.clone());
        let mut hunks = Vec::new();
        for (index, hunk) in parser.by_ref().enumerate() {
            on_hunk(index, &hunk);
            self.cache.set(
                HunkKey::new(req.path.as_str(), index, req.staged),
                CachedHunk::new(hunk.clone(), req.path.as_str()),
            );
            hunks.push(hunk);
        }
        let parse = parser.stats();
        let cancelled = token.is_cancelled();

        if cancelled {
            log::debug!("{}: cancelled after {} hunks", req.path, hunks.len());
            for index in 0..hunks.len() {
                self.cache
                    .remove(&HunkKey::new(req.path.as_str(), index, req.staged));
            }
        } else {
            state.files.insert(
                key.clone(),
                FileEntry {
                    options: req.options.clone(),
                    hunk_count: hunks.len(),
                    stats,
                    decision: decision.clone(),
                    patch: (mode == ParseMode::Defer).then(|| patch.clone()),
                },
            );
        }

        Ok(DiffOutcome {
            plan: RenderPlan::resolve(&decision, &req.options),
            stats,
            decision,
            hunks,
            parse,
            from_cache: false,
            cancelled,
        })
    }

    fn preflight(&self, req: &DiffRequest, stats: &PreflightStats) -> PreflightDecision {
        let decision = analyze(
            stats,
            &self.prefs.thresholds(),
            req.options.large_file_mode,
            self.prefs.file_override(&req.path),
            &self.prefs.feature_flags(),
        );
        log::debug!(
            "{}: preflight active={} source={:?} reasons={:?}",
            req.path,
            decision.active,
            decision.source,
            decision.reasons
        );
        decision
    }

    /// Serve a request from the cache. Preflight runs again so preference
    /// changes apply; a change in hunk collapsing needs a reparse instead.
    fn lookup_cached(&self, state: &mut EngineState, req: &DiffRequest) -> Option<DiffOutcome> {
        let entry = state.files.get_mut(&req.key())?;
        if entry.options != req.options {
            return None;
        }
        let decision = self.preflight(req, &entry.stats);
        if decision.disabled.collapse_hunks != entry.decision.disabled.collapse_hunks {
            return None;
        }
        let hunks = (0..entry.hunk_count)
            .map(|i| {
                self.cache
                    .get(&HunkKey::new(req.path.as_str(), i, req.staged))
                    .map(|c| DiffHunk::clone(&c.hunk))
            })
            .collect::<Option<Vec<_>>>()?;
        entry.decision = decision.clone();
        Some(DiffOutcome {
            stats: entry.stats,
            plan: RenderPlan::resolve(&decision, &req.options),
            decision,
            hunks,
            parse: ParseStats::default(),
            from_cache: true,
            cancelled: false,
        })
    }

    /// Drop remembered state and cache entries for one file in one staging
    /// state.
    fn forget(&self, state: &mut EngineState, key: &FileKey) {
        if let Some(entry) = state.files.remove(key) {
            for i in 0..entry.hunk_count {
                self.cache.remove(&HunkKey::new(key.0.as_str(), i, key.1));
            }
        }
    }

    /// Cancel the in-flight request for a file, if any.
    pub fn cancel(&self, path: &str, staged: bool) -> bool {
        match self.active.lock().get(&(path.to_string(), staged)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request.
    pub fn cancel_all(&self) {
        for token in self.active.lock().values() {
            token.cancel();
        }
    }

    /// Materialize one deferred hunk and cache the result.
    ///
    /// Returns `None` when the file is unknown or `index` is out of range.
    pub fn expand_hunk(&self, path: &str, staged: bool, index: usize) -> Option<DiffHunk> {
        let state = self.state.lock();
        let entry = state.files.get(&(path.to_string(), staged))?;
        if index >= entry.hunk_count {
            return None;
        }
        let key = HunkKey::new(path, index, staged);
        let cached = match self.cache.get(&key) {
            Some(c) => DiffHunk::clone(&c.hunk),
            None => {
                let patch = entry.patch.as_deref()?;
                parse_patch(patch, ParseMode::Defer).nth(index)?
            }
        };
        if cached.is_materialized() {
            return Some(cached);
        }
        let expanded = materialize(&cached, entry.patch.as_deref()?)?;
        self.cache
            .set(key, CachedHunk::new(expanded.clone(), path));
        Some(expanded)
    }

    /// Hunks of a fully parsed file, straight from the cache.
    pub fn cached_hunks(&self, path: &str, staged: bool) -> Option<Vec<DiffHunk>> {
        let state = self.state.lock();
        let entry = state.files.get(&(path.to_string(), staged))?;
        (0..entry.hunk_count)
            .map(|i| {
                self.cache
                    .get(&HunkKey::new(path, i, staged))
                    .map(|c| DiffHunk::clone(&c.hunk))
            })
            .collect()
    }

    /// Forget everything about `path` in both staging states. Call when the
    /// file changed on disk or moved between index and worktree.
    pub fn invalidate_file(&self, path: &str) -> usize {
        let mut state = self.state.lock();
        state.files.retain(|(p, _), _| p != path);
        let removed = self.cache.remove_file(path);
        log::debug!("{}: invalidated {} cached hunks", path, removed);
        removed
    }

    /// Forget everything.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.files.clear();
        self.cache.clear();
    }
}
