//! Read-side access to user preferences that steer preflight.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{CacheConfig, LfmFeatureFlags, LfmThresholds};

/// Cached config directory path.
static CONFIG_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Get the diffcore config directory (cached).
fn config_dir() -> &'static Path {
    CONFIG_DIR.get_or_init(|| {
        directories::ProjectDirs::from("", "", "diffcore")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(dirs_fallback)
    })
}

/// Fallback config directory if `directories` fails.
fn dirs_fallback() -> PathBuf {
    std::env::var("HOME")
        .map(|h| Path::new(&h).join(".config").join("diffcore"))
        .unwrap_or_else(|_| PathBuf::from(".diffcore"))
}

/// Errors loading or saving preferences.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PrefsError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed JSON.
    #[error("invalid preferences file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the engine reads from the preference store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Large-file-mode thresholds.
    pub thresholds: LfmThresholds,
    /// Default feature degradations.
    pub features: LfmFeatureFlags,
    /// Per-file large-file-mode overrides, keyed by path.
    pub overrides: HashMap<String, bool>,
    /// Hunk cache budgets.
    pub cache: CacheConfig,
}

/// Source of preflight preferences.
pub trait PreferenceStore: Send + Sync {
    /// Current thresholds.
    fn thresholds(&self) -> LfmThresholds;

    /// Current feature toggles.
    fn feature_flags(&self) -> LfmFeatureFlags;

    /// Manual large-file-mode choice for `path`, if any.
    fn file_override(&self, path: &str) -> Option<bool>;
}

impl PreferenceStore for Preferences {
    fn thresholds(&self) -> LfmThresholds {
        self.thresholds
    }

    fn feature_flags(&self) -> LfmFeatureFlags {
        self.features
    }

    fn file_override(&self, path: &str) -> Option<bool> {
        self.overrides.get(path).copied()
    }
}

/// Preferences backed by a JSON file.
#[derive(Debug)]
pub struct JsonPreferences {
    path: PathBuf,
    prefs: RwLock<Preferences>,
}

impl JsonPreferences {
    /// Load from `$DIFFCORE_CONFIG` or the platform config directory.
    pub fn load_default() -> Result<Self, PrefsError> {
        let path = std::env::var_os("DIFFCORE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| config_dir().join("preferences.json"));
        Self::with_path(path)
    }

    /// Load from a specific file. A missing file yields defaults.
    pub fn with_path(path: PathBuf) -> Result<Self, PrefsError> {
        let prefs = read_prefs(&path)?;
        Ok(Self {
            path,
            prefs: RwLock::new(prefs),
        })
    }

    /// Re-read the file.
    pub fn reload(&self) -> Result<(), PrefsError> {
        *self.prefs.write() = read_prefs(&self.path)?;
        Ok(())
    }

    /// Snapshot of the loaded values.
    pub fn snapshot(&self) -> Preferences {
        self.prefs.read().clone()
    }

    /// Set or clear a per-file override in memory.
    pub fn set_override(&self, path: &str, value: Option<bool>) {
        let mut prefs = self.prefs.write();
        match value {
            Some(v) => prefs.overrides.insert(path.to_string(), v),
            None => prefs.overrides.remove(path),
        };
    }

    /// Save to disk (atomic write).
    pub fn save(&self) -> Result<(), PrefsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&*self.prefs.read())?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn read_prefs(path: &Path) -> Result<Preferences, PrefsError> {
    if !path.exists() {
        return Ok(Preferences::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

impl PreferenceStore for JsonPreferences {
    fn thresholds(&self) -> LfmThresholds {
        self.prefs.read().thresholds
    }

    fn feature_flags(&self) -> LfmFeatureFlags {
        self.prefs.read().features
    }

    fn file_override(&self, path: &str) -> Option<bool> {
        self.prefs.read().file_override(path)
    }
}
