// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External stores for coordinated values.
//!
//! The store owns durable persistence; the coordinator only holds the
//! in-flight future and the last value it read. [`FileStore`] re-reads
//! the backing file on every `get` so sibling processes observe each
//! other's refreshes, which the denial-reconciliation path relies on.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::SessionError;

/// Keyed store of coordinated values. Object-safe.
pub trait ValueStore<V>: Send + Sync {
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<V>, SessionError>>;
    fn set<'a>(&'a self, id: &'a str, value: V) -> BoxFuture<'a, Result<(), SessionError>>;
    fn del<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), SessionError>>;
}

/// In-memory store. Single-process only; mainly useful for tests and
/// short-lived tools that do not persist sessions.
pub struct MemoryStore<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> ValueStore<V> for MemoryStore<V> {
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<V>, SessionError>> {
        Box::pin(async move { Ok(self.entries.read().await.get(id).cloned()) })
    }

    fn set<'a>(&'a self, id: &'a str, value: V) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            self.entries.write().await.insert(id.to_owned(), value);
            Ok(())
        })
    }

    fn del<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move {
            self.entries.write().await.remove(id);
            Ok(())
        })
    }
}

/// JSON file store with atomic writes (write tmp + rename).
///
/// The whole file is one `{identity: value}` map. Reads always go to
/// disk; writes are serialized within the process by `io_lock` so
/// read-modify-write cycles do not lose entries.
pub struct FileStore<V> {
    path: PathBuf,
    io_lock: Mutex<()>,
    _marker: PhantomData<fn() -> V>,
}

impl<V> FileStore<V> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), io_lock: Mutex::new(()), _marker: PhantomData }
    }
}

impl<V> FileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn read_entry(&self, id: &str) -> Result<Option<V>, SessionError> {
        let _io = self.io_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let map = load(&self.path).map_err(|e| SessionError::store(e.to_string()))?;
        Ok(map.get(id).cloned())
    }

    fn write_entry(&self, id: &str, value: Option<V>) -> Result<(), SessionError> {
        let _io = self.io_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut map: HashMap<String, V> = match load(&self.path) {
            Ok(m) => m,
            Err(e) => {
                // A corrupt file must not wedge the store permanently.
                tracing::warn!(path = %self.path.display(), err = %e, "resetting unreadable store file");
                HashMap::new()
            }
        };
        match value {
            Some(v) => {
                map.insert(id.to_owned(), v);
            }
            None => {
                if map.remove(id).is_none() {
                    return Ok(());
                }
            }
        }
        save(&self.path, &map).map_err(|e| SessionError::store(e.to_string()))
    }
}

impl<V> ValueStore<V> for FileStore<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn get<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<V>, SessionError>> {
        Box::pin(async move { self.read_entry(id) })
    }

    fn set<'a>(&'a self, id: &'a str, value: V) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move { self.write_entry(id, Some(value)) })
    }

    fn del<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<(), SessionError>> {
        Box::pin(async move { self.write_entry(id, None) })
    }
}

/// Load a store file. A missing file is an empty map.
fn load<V: DeserializeOwned>(path: &Path) -> anyhow::Result<HashMap<String, V>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(e.into()),
    };
    let map = serde_json::from_str(&contents)?;
    Ok(map)
}

/// Save a store file atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) to avoid corruption when
/// concurrent saves race on the same `.tmp` file; a shorter write can
/// leave trailing bytes from a longer previous write.
fn save<V: Serialize>(path: &Path, map: &HashMap<String, V>) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(map)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
