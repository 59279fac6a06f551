//! Persisted key/value preferences.
//!
//! The relay service reads the same preferences at start-up, so key names
//! follow its conventions.
//!
//! Two stores are provided:
//!
//! - [`MemoryPreferences`]: process-local, never fails
//! - [`FilePreferences`]: a JSON object on disk, rewritten on every put

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// DNS port the relay service listens on
pub const PREF_DNS_PORT: &str = "pref_dns_port";
/// `|`-joined routing list
pub const PREF_TORIFIED_APPS: &str = "pref_torified_apps";
/// Wrapped exit country, e.g. `{DE}`
pub const PREF_EXIT_NODES: &str = "pref_exit_nodes";
/// Route device traffic through the tunnel
pub const PREF_USE_VPN: &str = "pref_vpn";
/// Start the service at boot
pub const PREF_START_ON_BOOT: &str = "pref_start_boot";

/// Preference store errors
#[derive(Debug, thiserror::Error)]
pub enum PreferenceError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Preference store lock poisoned")]
    Poisoned,
}

/// Injected persisted key/value store
///
/// Writes are synchronous: a successful `put_*` is visible to the next
/// `get_*` on any thread.
pub trait PreferenceStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
    fn put_string(&self, key: &str, value: &str) -> Result<(), PreferenceError>;

    fn get_bool(&self, key: &str) -> Option<bool>;
    fn put_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError>;

    fn get_int(&self, key: &str) -> Option<i32>;
    fn put_int(&self, key: &str, value: i32) -> Result<(), PreferenceError>;
}

/// In-memory preferences
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn put(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        self.values
            .lock()
            .map_err(|_| PreferenceError::Poisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.put(key, Value::from(value))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.put(key, Value::from(value))
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| as_i32(&v))
    }

    fn put_int(&self, key: &str, value: i32) -> Result<(), PreferenceError> {
        self.put(key, Value::from(value))
    }
}

/// JSON-file backed preferences
///
/// The whole object is held in memory and written back to disk through a
/// temporary file and a rename on each put.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl FilePreferences {
    /// Open a preference file, starting empty if it does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PreferenceError> {
        let path = path.as_ref().to_path_buf();

        let values = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Map::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|source| {
                PreferenceError::Json {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preference file at {}, starting empty", path.display());
                Map::new()
            }
            Err(source) => return Err(PreferenceError::Io { path, source }),
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Map<String, Value>>, PreferenceError> {
        self.values.lock().map_err(|_| PreferenceError::Poisoned)
    }

    fn get(&self, key: &str) -> Option<Value> {
        match self.lock() {
            Ok(values) => values.get(key).cloned(),
            Err(e) => {
                warn!("Preference read of {} failed: {}", key, e);
                None
            }
        }
    }

    fn put(&self, key: &str, value: Value) -> Result<(), PreferenceError> {
        let mut values = self.lock()?;
        values.insert(key.to_string(), value);
        self.write(&values)
    }

    fn write(&self, values: &Map<String, Value>) -> Result<(), PreferenceError> {
        let io_err = |source: std::io::Error| PreferenceError::Io {
            path: self.path.clone(),
            source,
        };

        let content = serde_json::to_string_pretty(values).map_err(|source| {
            PreferenceError::Json {
                path: self.path.clone(),
                source,
            }
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl PreferenceStore for FilePreferences {
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), PreferenceError> {
        self.put(key, Value::from(value))
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), PreferenceError> {
        self.put(key, Value::from(value))
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| as_i32(&v))
    }

    fn put_int(&self, key: &str, value: i32) -> Result<(), PreferenceError> {
        self.put(key, Value::from(value))
    }
}

fn as_i32(value: &Value) -> Option<i32> {
    value.as_i64().and_then(|n| i32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static NEXT_FILE: AtomicU32 = AtomicU32::new(0);

    fn temp_path() -> PathBuf {
        std::env::temp_dir().join(format!(
            "ipscrambler-prefs-{}-{}.json",
            std::process::id(),
            NEXT_FILE.fetch_add(1, Ordering::Relaxed)
        ))
    }

    #[test]
    fn test_memory_read_after_write() {
        let prefs = MemoryPreferences::new();
        assert_eq!(prefs.get_string(PREF_TORIFIED_APPS), None);

        prefs.put_string(PREF_TORIFIED_APPS, "a|b").unwrap();
        prefs.put_bool(PREF_USE_VPN, true).unwrap();
        prefs.put_int(PREF_DNS_PORT, 5400).unwrap();

        assert_eq!(prefs.get_string(PREF_TORIFIED_APPS).as_deref(), Some("a|b"));
        assert_eq!(prefs.get_bool(PREF_USE_VPN), Some(true));
        assert_eq!(prefs.get_int(PREF_DNS_PORT), Some(5400));
    }

    #[test]
    fn test_memory_type_mismatch() {
        let prefs = MemoryPreferences::new();
        prefs.put_int(PREF_USE_VPN, 1).unwrap();
        assert_eq!(prefs.get_bool(PREF_USE_VPN), None);
        assert_eq!(prefs.get_string(PREF_USE_VPN), None);
    }

    #[test]
    fn test_file_persists_across_open() {
        let path = temp_path();
        {
            let prefs = FilePreferences::open(&path).unwrap();
            prefs.put_string(PREF_EXIT_NODES, "{DE}").unwrap();
            prefs.put_bool(PREF_START_ON_BOOT, false).unwrap();
        }

        let reopened = FilePreferences::open(&path).unwrap();
        assert_eq!(reopened.get_string(PREF_EXIT_NODES).as_deref(), Some("{DE}"));
        assert_eq!(reopened.get_bool(PREF_START_ON_BOOT), Some(false));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_file_missing_starts_empty() {
        let path = temp_path();
        let prefs = FilePreferences::open(&path).unwrap();
        assert_eq!(prefs.get_int(PREF_DNS_PORT), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_file_invalid_json() {
        let path = temp_path();
        std::fs::write(&path, "not json").unwrap();

        let result = FilePreferences::open(&path);
        assert!(matches!(result, Err(PreferenceError::Json { .. })));

        std::fs::remove_file(&path).unwrap();
    }
}
