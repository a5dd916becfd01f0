//! File system watching for cache invalidation.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};

/// Watches a repository and reports which files changed.
pub struct RepoWatcher {
    rx: Receiver<Vec<String>>,
    /// Keep watcher alive. Dropping this stops watching.
    _watcher: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

impl std::fmt::Debug for RepoWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoWatcher").finish_non_exhaustive()
    }
}

impl RepoWatcher {
    /// Watch `root` recursively, ignoring `.git/` and `.jj/`.
    /// Events are debounced over a 200ms window.
    pub fn new(root: &Path) -> Result<Self, notify::Error> {
        let (tx, rx) = mpsc::channel();
        let repo_path = root.to_path_buf();

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |res: DebounceEventResult| match res {
                Ok(events) => {
                    let changed: Vec<String> = events
                        .iter()
                        .filter_map(|e| relative_path(&e.path, &repo_path))
                        .collect();
                    if !changed.is_empty() {
                        let _ = tx.send(changed);
                    }
                }
                Err(e) => log::warn!("file watcher error: {}", e),
            },
        )?;

        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        Ok(Self {
            rx,
            _watcher: debouncer,
        })
    }

    /// Drain pending events without blocking.
    ///
    /// Returns the deduplicated, sorted repository-relative paths that
    /// changed since the last poll.
    pub fn poll(&self) -> Vec<String> {
        let mut changed = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(batch) => changed.extend(batch),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        changed.sort();
        changed.dedup();
        changed
    }
}

/// Repository-relative, `/`-separated path, or `None` when the path lies
/// outside the repository or inside VCS metadata.
pub fn relative_path(path: &Path, repo_root: &Path) -> Option<String> {
    let rel = path.strip_prefix(repo_root).ok()?;
    let mut parts: Vec<String> = Vec::new();
    for component in rel.components() {
        if let std::path::Component::Normal(name) = component {
            let name = name.to_string_lossy();
            if name == ".git" || name == ".jj" {
                return None;
            }
            parts.push(name.into_owned());
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn relative_paths() {
        let root = PathBuf::from("/repo");
        assert_eq!(
            relative_path(Path::new("/repo/src/main.rs"), &root).as_deref(),
            Some("src/main.rs")
        );
        assert_eq!(
            relative_path(Path::new("/repo/some/.gitignore"), &root).as_deref(),
            Some("some/.gitignore")
        );
        assert_eq!(relative_path(Path::new("/repo/.git/HEAD"), &root), None);
        assert_eq!(relative_path(Path::new("/repo/.jj/store/abc"), &root), None);
        assert_eq!(relative_path(Path::new("/elsewhere/x"), &root), None);
        assert_eq!(relative_path(Path::new("/repo"), &root), None);
    }
}
