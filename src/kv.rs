use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use log::{debug, warn};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::KvError;

/// String key/value persistence that outlives a single process run.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
    fn remove(&self, key: &str) -> Result<(), KvError>;
}

pub fn get_bool(kv: &dyn KeyValueStore, key: &str) -> bool {
    kv.get(key).as_deref() == Some("true")
}

pub fn get_u32(kv: &dyn KeyValueStore, key: &str) -> Option<u32> {
    kv.get(key).and_then(|raw| raw.trim().parse().ok())
}

pub fn get_json<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = kv.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!("Ignoring unreadable state {}: {}", key, err);
            None
        }
    }
}

pub fn set_json<T: Serialize>(kv: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), KvError> {
    kv.set(key, &serde_json::to_string(value)?)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> MemoryKv {
        MemoryKv::default()
    }
}

impl KeyValueStore for MemoryKv {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// JSON object on disk, rewritten on every mutation.
#[derive(Debug)]
pub struct FileKv {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileKv {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<FileKv, KvError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            match serde_json::from_str(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    if !raw.trim().is_empty() {
                        warn!("Ignoring unreadable state file {}: {}", path.display(), err);
                    }
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(FileKv {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Writes a sibling file and renames it over the old one, so a crash
    /// never leaves a half-written state file behind.
    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), KvError> {
        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        fs::write(&tmp_path, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileKv {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        let mut entries = lock(&self.entries);
        entries.insert(key.to_string(), value.to_string());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), KvError> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}
