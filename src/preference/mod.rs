//! Persisted cost/delay preference of the user.
//!
//! The store is an injected dependency: [`FileStore`] for the binary,
//! [`MemoryStore`] for tests. Loading never fails; unreadable or malformed
//! state yields the default preference.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;


/// Direction on one weighting axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pref {
    Least,
    Most,
}

impl Pref {
    pub fn as_str(self) -> &'static str {
        match self {
            Pref::Least => "least",
            Pref::Most => "most",
        }
    }
}

impl fmt::Display for Pref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one direction per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    #[serde(rename = "CostPref")]
    pub cost: Pref,
    #[serde(rename = "DelayPref")]
    pub delay: Pref,
}

impl Preference {
    pub fn new(cost: Pref, delay: Pref) -> Self {
        Self { cost, delay }
    }
}

impl Default for Preference {
    fn default() -> Self {
        Self {
            cost: Pref::Most,
            delay: Pref::Least,
        }
    }
}

impl fmt::Display for Preference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cost={} delay={}", self.cost, self.delay)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("failed to encode preference: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to persist preference to {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Process-local persisted preference.
pub trait PreferenceStore: Send + Sync {
    /// Last persisted preference, or the default when none exists or it is malformed.
    fn load(&self) -> Preference;

    /// Persists synchronously, overwriting the previous value.
    fn save(&self, preference: &Preference) -> Result<(), PreferenceError>;
}

fn decode(raw: &str, origin: &str) -> Preference {
    match serde_json::from_str::<Preference>(raw) {
        Ok(p) => p,
        Err(e) => {
            warn!(
                component = "preference",
                event = "malformed",
                origin = %origin,
                error = %e,
                "ignoring malformed stored preference, using default"
            );
            Preference::default()
        }
    }
}

/// JSON file backed store.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FileStore {
    fn load(&self) -> Preference {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw, &self.path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Preference::default(),
            Err(e) => {
                warn!(
                    component = "preference",
                    event = "read_failed",
                    path = %self.path.display(),
                    error = %e,
                    "cannot read stored preference, using default"
                );
                Preference::default()
            }
        }
    }

    fn save(&self, preference: &Preference) -> Result<(), PreferenceError> {
        let encoded = serde_json::to_string_pretty(preference)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| PreferenceError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, encoded).map_err(|source| PreferenceError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store holding the raw serialized value.
#[derive(Default)]
pub struct MemoryStore {
    raw: Mutex<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an arbitrary (possibly corrupt) raw value.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.raw.lock().clone()
    }
}

impl PreferenceStore for MemoryStore {
    fn load(&self) -> Preference {
        match self.raw.lock().as_deref() {
            Some(raw) => decode(raw, "memory"),
            None => Preference::default(),
        }
    }

    fn save(&self, preference: &Preference) -> Result<(), PreferenceError> {
        *self.raw.lock() = Some(serde_json::to_string(preference)?);
        Ok(())
    }
}
