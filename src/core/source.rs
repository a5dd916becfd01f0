//! Producers of raw diff text.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// Errors from a text source.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceError {
    /// The external command exited non-zero.
    #[error("{command} failed: {stderr}")]
    CommandFailed {
        /// Command that was run.
        command: String,
        /// Its diagnostic output.
        stderr: String,
    },
    /// I/O error spawning or reading the command.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The source has no diff for this file.
    #[error("no diff available for {0}")]
    NotFound(String),
}

/// What to diff.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRequest {
    /// Repository-relative path.
    pub path: String,
    /// Diff the index instead of the worktree.
    pub staged: bool,
    /// Lines of context around each change.
    pub context_lines: u32,
    /// Disable rename detection.
    pub no_renames: bool,
}

/// Supplies unified-diff text and numstat summaries.
pub trait TextSource: Send + Sync {
    /// The numstat line for the file (`adds\tdels\tpath`).
    fn numstat(&self, req: &SourceRequest) -> Result<String, SourceError>;

    /// The formatted unified diff for the file.
    fn patch_text(&self, req: &SourceRequest) -> Result<String, SourceError>;
}

/// Text source backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitSource {
    root: PathBuf,
}

impl GitSource {
    /// Run git commands inside `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Working directory for git.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn diff_args(req: &SourceRequest) -> Vec<String> {
        let mut args = vec![
            "diff".to_string(),
            "--no-color".to_string(),
            "--no-ext-diff".to_string(),
        ];
        if req.staged {
            args.push("--cached".to_string());
        }
        if req.no_renames {
            args.push("--no-renames".to_string());
        }
        args
    }

    fn run(&self, args: &[String]) -> Result<String, SourceError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;
        if !output.status.success() {
            return Err(SourceError::CommandFailed {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(match String::from_utf8(output.stdout) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }
}

impl TextSource for GitSource {
    fn numstat(&self, req: &SourceRequest) -> Result<String, SourceError> {
        let mut args = Self::diff_args(req);
        args.push("--numstat".to_string());
        args.push("--".to_string());
        args.push(req.path.clone());
        self.run(&args)
    }

    fn patch_text(&self, req: &SourceRequest) -> Result<String, SourceError> {
        let mut args = Self::diff_args(req);
        args.push(format!("-U{}", req.context_lines));
        args.push("--".to_string());
        args.push(req.path.clone());
        self.run(&args)
    }
}

#[derive(Debug, Clone)]
struct StoredDiff {
    numstat: String,
    patch: String,
}

/// Fixed in-memory diffs keyed by path and staging state.
///
/// Context-line and rename settings are ignored.
#[derive(Debug, Default)]
pub struct MemorySource {
    diffs: RwLock<HashMap<(String, bool), StoredDiff>>,
    patch_reads: AtomicUsize,
}

impl MemorySource {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a patch, deriving its numstat from the `+`/`-` lines.
    pub fn insert_patch(&self, path: impl Into<String>, staged: bool, patch: impl Into<String>) {
        let patch = patch.into();
        let path = path.into();
        let (adds, dels) = count_changes(&patch);
        let numstat = format!("{}\t{}\t{}", adds, dels, path);
        self.insert(path, staged, numstat, patch);
    }

    /// Store a patch with an explicit numstat line.
    pub fn insert(
        &self,
        path: impl Into<String>,
        staged: bool,
        numstat: impl Into<String>,
        patch: impl Into<String>,
    ) {
        self.diffs.write().insert(
            (path.into(), staged),
            StoredDiff {
                numstat: numstat.into(),
                patch: patch.into(),
            },
        );
    }

    /// How many times patch text was requested.
    pub fn patch_reads(&self) -> usize {
        self.patch_reads.load(Ordering::Relaxed)
    }

    fn get(&self, req: &SourceRequest) -> Result<StoredDiff, SourceError> {
        self.diffs
            .read()
            .get(&(req.path.clone(), req.staged))
            .cloned()
            .ok_or_else(|| SourceError::NotFound(req.path.clone()))
    }
}

impl TextSource for MemorySource {
    fn numstat(&self, req: &SourceRequest) -> Result<String, SourceError> {
        self.get(req).map(|d| d.numstat)
    }

    fn patch_text(&self, req: &SourceRequest) -> Result<String, SourceError> {
        self.patch_reads.fetch_add(1, Ordering::Relaxed);
        self.get(req).map(|d| d.patch)
    }
}

/// Source whose patch reads block until [`GatedSource::open`] is called.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct GatedSource {
    inner: MemorySource,
    open: std::sync::atomic::AtomicBool,
    readers: AtomicUsize,
}

#[cfg(test)]
impl GatedSource {
    pub(crate) fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Block until `n` patch reads have started.
    pub(crate) fn wait_for_readers(&self, n: usize) {
        while self.readers.load(Ordering::SeqCst) < n {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    pub(crate) fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TextSource for GatedSource {
    fn numstat(&self, req: &SourceRequest) -> Result<String, SourceError> {
        self.inner.numstat(req)
    }

    fn patch_text(&self, req: &SourceRequest) -> Result<String, SourceError> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        while !self.open.load(Ordering::SeqCst) {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        self.inner.patch_text(req)
    }
}

/// Count `+`/`-` body lines, skipping `+++`/`---` file headers.
fn count_changes(patch: &str) -> (usize, usize) {
    let mut in_hunk = false;
    patch.lines().fold((0, 0), |(adds, dels), line| {
        if line.starts_with("@@") {
            in_hunk = true;
        } else if line.starts_with("diff --git ") {
            in_hunk = false;
        } else if in_hunk && line.starts_with('+') && !line.starts_with("+++") {
            return (adds + 1, dels);
        } else if in_hunk && line.starts_with('-') && !line.starts_with("---") {
            return (adds, dels + 1);
        }
        (adds, dels)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(path: &str) -> SourceRequest {
        SourceRequest {
            path: path.to_string(),
            staged: false,
            context_lines: 3,
            no_renames: false,
        }
    }

    #[test]
    fn memory_source_derives_numstat() {
        let src = MemorySource::new();
        src.insert_patch("a.rs", false, "--- a/a.rs\n+++ b/a.rs\n@@ -1 +1,2 @@\n-x\n+y\n+z\n");
        assert_eq!(src.numstat(&req("a.rs")).unwrap(), "2\t1\ta.rs");
        assert!(src.patch_text(&req("a.rs")).unwrap().contains("+z"));
        assert_eq!(src.patch_reads(), 1);
    }

    #[test]
    fn memory_source_separates_staged() {
        let src = MemorySource::new();
        src.insert_patch("a.rs", true, "@@ -1 +1 @@\n-x\n+y\n");
        assert!(matches!(
            src.patch_text(&req("a.rs")),
            Err(SourceError::NotFound(_))
        ));
    }

    #[test]
    fn git_args() {
        let mut r = req("x");
        r.staged = true;
        r.no_renames = true;
        let args = GitSource::diff_args(&r);
        assert!(args.contains(&"--cached".to_string()));
        assert!(args.contains(&"--no-renames".to_string()));
    }
}
