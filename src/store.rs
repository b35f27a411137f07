//! Durable key-value storage shared by the timer and the popup manager.
//!
//! Values are plain strings; callers serialize structured values (lists,
//! records) to JSON text before storing them. A missing key is a valid state.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_START_TIME: &str = "startTime";
pub const KEY_EMAIL_INDEX: &str = "currentEmailIndex";
pub const KEY_ACTIVE_POPUPS: &str = "activePopups";
pub const KEY_SHOWN_THRESHOLDS: &str = "shownThresholds";
pub const KEY_SPAWN_COUNTER: &str = "spawnCounter";

pub trait KvStore {
  fn get(&self, key: &str) -> Option<String>;
  fn set(&mut self, key: &str, value: String);
  fn remove(&mut self, key: &str);
}

/// Store backed by a JSON object on disk, rewritten on every mutation.
#[derive(Debug)]
pub struct FileStore {
  path: PathBuf,
  values: BTreeMap<String, String>,
}

impl FileStore {
  pub fn open(path: impl AsRef<Path>) -> Self {
    let path = path.as_ref().to_path_buf();
    let values = match fs::read_to_string(&path) {
      Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
        warn!("State file {} is malformed ({}), starting empty", path.display(), e);
        BTreeMap::new()
      }),
      Err(e) => {
        info!("No state loaded from {}: {}", path.display(), e);
        BTreeMap::new()
      }
    };
    info!("Opened state file {} with {} keys", path.display(), values.len());
    Self { path, values }
  }

  /// Writes a sibling temp file and renames it over the state file. A crash
  /// mid-write leaves the previous state in place.
  fn flush(&self) {
    let tmp_path = self.path.with_extension("json.tmp");
    let result = serde_json::to_string_pretty(&self.values)
      .map_err(std::io::Error::from)
      .and_then(|json| fs::write(&tmp_path, json))
      .and_then(|_| fs::rename(&tmp_path, &self.path));
    if let Err(e) = result {
      error!("Failed to write state file {}: {}", self.path.display(), e);
      let _ = fs::remove_file(&tmp_path);
    }
  }
}

impl KvStore for FileStore {
  fn get(&self, key: &str) -> Option<String> {
    self.values.get(key).cloned()
  }

  fn set(&mut self, key: &str, value: String) {
    self.values.insert(key.to_string(), value);
    self.flush();
  }

  fn remove(&mut self, key: &str) {
    if self.values.remove(key).is_some() {
      self.flush();
    }
  }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
  values: BTreeMap<String, String>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KvStore for MemoryStore {
  fn get(&self, key: &str) -> Option<String> {
    self.values.get(key).cloned()
  }

  fn set(&mut self, key: &str, value: String) {
    self.values.insert(key.to_string(), value);
  }

  fn remove(&mut self, key: &str) {
    self.values.remove(key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::{SystemTime, UNIX_EPOCH};

  fn scratch_path(tag: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
    std::env::temp_dir().join(format!("inbox-panic-{}-{}-{}.json", tag, std::process::id(), nanos))
  }

  #[test]
  fn test_memory_store_get_set_remove() {
    let mut store = MemoryStore::new();
    assert_eq!(store.get(KEY_START_TIME), None);
    store.set(KEY_START_TIME, "42".to_string());
    assert_eq!(store.get(KEY_START_TIME).as_deref(), Some("42"));
    store.remove(KEY_START_TIME);
    assert_eq!(store.get(KEY_START_TIME), None);
  }

  #[test]
  fn test_file_store_survives_reopen() {
    let path = scratch_path("reopen");
    {
      let mut store = FileStore::open(&path);
      store.set(KEY_EMAIL_INDEX, "3".to_string());
      store.set(KEY_START_TIME, "1000".to_string());
      store.remove(KEY_START_TIME);
    }
    let store = FileStore::open(&path);
    assert_eq!(store.get(KEY_EMAIL_INDEX).as_deref(), Some("3"));
    assert_eq!(store.get(KEY_START_TIME), None);
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn test_file_store_malformed_file_is_empty() {
    let path = scratch_path("malformed");
    fs::write(&path, "{ not json").unwrap();
    let store = FileStore::open(&path);
    assert_eq!(store.get(KEY_ACTIVE_POPUPS), None);
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn test_file_store_replaces_file_without_leaving_temp() {
    let path = scratch_path("replace");
    fs::write(&path, "{\"currentEmailIndex\":\"1\"}").unwrap();
    let mut store = FileStore::open(&path);
    store.set(KEY_SPAWN_COUNTER, "7".to_string());
    assert!(!path.with_extension("json.tmp").exists());
    let written: BTreeMap<String, String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.get(KEY_EMAIL_INDEX).map(String::as_str), Some("1"));
    assert_eq!(written.get(KEY_SPAWN_COUNTER).map(String::as_str), Some("7"));
    let _ = fs::remove_file(&path);
  }

  #[test]
  fn test_file_store_missing_file_is_empty() {
    let store = FileStore::open(scratch_path("missing"));
    assert_eq!(store.get(KEY_SHOWN_THRESHOLDS), None);
  }
}
