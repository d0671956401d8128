//! Persisted key-value storage for client preferences.
//!
//! One JSON file holding a flat `key -> value` map. No versioning, no
//! migration: suitable for the server list and UI preferences, nothing more
//! durable than that. Corrupt or missing files are tolerated by starting
//! empty (a lost server list is an annoyance, not data loss).

use std::collections::HashMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub struct Storage {
    /// `None` for in-memory stores (tests).
    path: Option<PathBuf>,
    map: HashMap<String, Value>,
}

impl Storage {
    /// Open (or create) the store backed by the given file.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "bad storage file, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            path: Some(path),
            map,
        }
    }

    /// Store at the platform default location:
    /// `<config dir>/polychat/storage.json`.
    pub fn open_default() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("polychat");
        Self::open(dir.join("storage.json"))
    }

    /// A store that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            map: HashMap::new(),
        }
    }

    /// Serialize and store a value under `key`; `None` deletes the key.
    /// The backing file is rewritten on every call.
    pub fn save<T: Serialize>(&mut self, key: &str, value: Option<&T>) {
        match value {
            Some(value) => match serde_json::to_value(value) {
                Ok(value) => {
                    self.map.insert(key.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "can't serialize value");
                    return;
                }
            },
            None => {
                self.map.remove(key);
            }
        }
        self.flush();
    }

    /// Load the value stored under `key`, or `default` when absent or
    /// unparseable.
    pub fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let Some(value) = self.map.get(key) else {
            return default;
        };
        match serde_json::from_value(value.clone()) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "unparseable stored value");
                default
            }
        }
    }

    fn flush(&self) {
        let Some(path) = &self.path else { return };
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_string_pretty(&self.map) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(path, raw) {
                    tracing::warn!(path = %path.display(), error = %e, "can't write storage file");
                }
            }
            Err(e) => tracing::warn!(error = %e, "can't serialize storage map"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("polychat-storage-{tag}-{nanos}.json"))
    }

    #[test]
    fn save_load_roundtrip() {
        let mut store = Storage::in_memory();
        store.save("hosts", Some(&vec!["a.example".to_string(), "b.example".to_string()]));
        let hosts: Vec<String> = store.load("hosts", Vec::new());
        assert_eq!(hosts, vec!["a.example", "b.example"]);
    }

    #[test]
    fn missing_key_returns_default() {
        let store = Storage::in_memory();
        assert_eq!(store.load("nope", 42i64), 42);
    }

    #[test]
    fn saving_none_deletes() {
        let mut store = Storage::in_memory();
        store.save("k", Some(&1i64));
        store.save::<i64>("k", None);
        assert_eq!(store.load("k", -1i64), -1);
    }

    #[test]
    fn wrong_type_falls_back_to_default() {
        let mut store = Storage::in_memory();
        store.save("k", Some(&"text"));
        assert_eq!(store.load("k", 7i64), 7);
    }

    #[test]
    fn persists_across_reopen() {
        let path = temp_path("reopen");
        {
            let mut store = Storage::open(&path);
            store.save("launch-count", Some(&1i64));
        }
        let store = Storage::open(&path);
        assert_eq!(store.load("launch-count", -1i64), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let path = temp_path("corrupt");
        std::fs::write(&path, "{not json").unwrap();
        let store = Storage::open(&path);
        assert_eq!(store.load("k", 0i64), 0);
        let _ = std::fs::remove_file(&path);
    }
}
