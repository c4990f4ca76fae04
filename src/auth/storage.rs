//! Persisted key-value storage with change notifications
//!
//! A [`Store`] is the shared backing map (optionally mirrored to a JSON
//! file). Each [`StorageHandle`] plays the part of one independent client of
//! that store: writes made through a handle notify the listeners registered
//! by every *other* handle, never its own.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::{Listeners, Subscription, lock};
use crate::error::StorageError;

const STORAGE_FILE: &str = "storage.json";

/// A single key changed; `new_value: None` means it was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StorageEvent {
    pub(crate) key: String,
    pub(crate) old_value: Option<String>,
    pub(crate) new_value: Option<String>,
    origin: u64,
}

struct StoreInner {
    path: Option<PathBuf>,
    entries: Mutex<BTreeMap<String, String>>,
    listeners: Arc<Listeners<StorageEvent>>,
    next_origin: AtomicU64,
}

#[derive(Clone)]
pub(crate) struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    fn with_entries(path: Option<PathBuf>, entries: BTreeMap<String, String>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                path,
                entries: Mutex::new(entries),
                listeners: Arc::new(Listeners::default()),
                next_origin: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn in_memory() -> Self {
        Self::with_entries(None, BTreeMap::new())
    }

    /// Open a file-backed store. A missing or unreadable file starts empty.
    pub(crate) fn open(path: PathBuf) -> Self {
        let entries = match File::open(&path) {
            Ok(file) => match serde_json::from_reader(file) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring corrupt session storage");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        tracing::debug!(path = %path.display(), keys = entries.len(), "opened session storage");
        Self::with_entries(Some(path), entries)
    }

    /// `$RIEGO_HOME/storage.json`, else `<data dir>/riego/storage.json`
    pub(crate) fn default_path() -> Option<PathBuf> {
        if let Some(home) = std::env::var_os("RIEGO_HOME")
            && !home.is_empty()
        {
            return Some(PathBuf::from(home).join(STORAGE_FILE));
        }
        let data_dir = dirs::data_dir()?;
        Some(data_dir.join("riego").join(STORAGE_FILE))
    }

    /// A new independent client of this store.
    pub(crate) fn handle(&self) -> StorageHandle {
        StorageHandle {
            inner: Arc::clone(&self.inner),
            origin: self.inner.next_origin.fetch_add(1, Ordering::Relaxed),
        }
    }
}

#[derive(Clone)]
pub(crate) struct StorageHandle {
    inner: Arc<StoreInner>,
    origin: u64,
}

impl StorageHandle {
    pub(crate) fn get(&self, key: &str) -> Option<String> {
        lock(&self.inner.entries).get(key).cloned()
    }

    pub(crate) fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(key, Some(value))
    }

    pub(crate) fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.write(key, None)
    }

    /// Listen for changes made through other handles.
    pub(crate) fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let own = self.origin;
        self.inner.listeners.subscribe(move |event: &StorageEvent| {
            if event.origin != own {
                callback(event);
            }
        })
    }

    fn write(&self, key: &str, value: Option<&str>) -> Result<(), StorageError> {
        let old_value = {
            let mut entries = lock(&self.inner.entries);
            let old_value = entries.get(key).cloned();
            if old_value.as_deref() == value {
                return Ok(());
            }

            let mut next = entries.clone();
            match value {
                Some(value) => next.insert(key.to_string(), value.to_string()),
                None => next.remove(key),
            };
            persist(self.inner.path.as_deref(), &next)?;
            *entries = next;
            old_value
        };

        self.inner.listeners.emit(&StorageEvent {
            key: key.to_string(),
            old_value,
            new_value: value.map(str::to_string),
            origin: self.origin,
        });
        Ok(())
    }
}

fn persist(path: Option<&Path>, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
    let Some(path) = path else {
        return Ok(());
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let file = File::create(&tmp)?;
    serde_json::to_writer_pretty(file, entries)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
