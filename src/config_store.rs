//! Durable key -> signed-integer store (C1).
//!
//! Backed by a single JSON file under the OS-appropriate config directory,
//! guarded by a mutex so concurrent `save`/`load` calls from multiple
//! threads serialize rather than corrupt the file. Writes are atomic via
//! write-to-temp-then-rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    value: i64,
    updated_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(flatten)]
    records: HashMap<String, Record>,
}

/// A durable key -> signed-integer mapping.
pub struct ConfigStore {
    path: PathBuf,
    document: Mutex<Document>,
}

impl ConfigStore {
    /// Open (or create) a store at `path`, loading any existing records.
    pub fn open(path: PathBuf) -> Result<Self, PersistenceError> {
        let document = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            Document::default()
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// Open the store at the OS-appropriate default location.
    pub fn open_default() -> Result<Self, PersistenceError> {
        let dir = default_config_dir().ok_or(PersistenceError::NoConfigDir)?;
        std::fs::create_dir_all(&dir)?;
        Self::open(dir.join("config.json"))
    }

    /// Return the stored value for `key`, or `default` if absent or
    /// unparseable (the record exists but failed to deserialize on load,
    /// which already degrades to an empty document above).
    pub fn load(&self, key: &str, default: i64) -> i64 {
        let document = self.document.lock().unwrap_or_else(|e| e.into_inner());
        document.records.get(key).map(|r| r.value).unwrap_or(default)
    }

    /// Atomic upsert. On success, subsequent `load` calls observe `value`.
    pub fn save(&self, key: &str, value: i64) -> Result<(), PersistenceError> {
        let mut document = self.document.lock().unwrap_or_else(|e| e.into_inner());
        document.records.insert(
            key.to_string(),
            Record {
                value,
                updated_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        write_atomic(&self.path, &*document)
    }
}

fn write_atomic(path: &Path, document: &Document) -> Result<(), PersistenceError> {
    let json = serde_json::to_string_pretty(document)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Get the application config directory.
fn default_config_dir() -> Option<PathBuf> {
    // macOS:   ~/Library/Application Support/bhaptics-controller/
    // Linux:   ~/.config/bhaptics-controller/
    // Windows: %APPDATA%/bhaptics-controller/

    #[cfg(target_os = "macos")]
    {
        let home = std::env::var("HOME").ok()?;
        Some(
            PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("bhaptics-controller"),
        )
    }

    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").ok()?;
        Some(PathBuf::from(appdata).join("bhaptics-controller"))
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let home = std::env::var("HOME").ok()?;
        Some(PathBuf::from(home).join(".config").join("bhaptics-controller"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_returns_default_when_absent() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        assert_eq!(store.load("phase_shift_ms", 0), 0);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        store.save("phase_shift_ms", 250).unwrap();
        assert_eq!(store.load("phase_shift_ms", 0), 250);
    }

    #[test]
    fn reopening_the_same_path_observes_prior_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        {
            let store = ConfigStore::open(path.clone()).unwrap();
            store.save("phase_shift_ms", -300).unwrap();
        }
        let store = ConfigStore::open(path).unwrap();
        assert_eq!(store.load("phase_shift_ms", 0), -300);
    }

    #[test]
    fn unrelated_key_keeps_its_own_default() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.json")).unwrap();
        store.save("phase_shift_ms", 100).unwrap();
        assert_eq!(store.load("some_other_key", 42), 42);
    }
}
