// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable last-visit markers for group chats.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;

/// Key-value storage for marker strings.
pub trait MarkerStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Storage key of a group's last-visit marker.
pub fn group_last_visit_key(group_id: &str) -> String {
    format!("group_chat_{group_id}_last_visit")
}

/// Last visit to `group_id`, or the Unix epoch when absent or unparsable.
pub fn read_last_visit(store: &dyn MarkerStore, group_id: &str) -> DateTime<Utc> {
    store
        .get(&group_last_visit_key(group_id))
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map_or(DateTime::UNIX_EPOCH, |at| at.with_timezone(&Utc))
}

pub fn write_last_visit(
    store: &dyn MarkerStore,
    group_id: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    store.set(&group_last_visit_key(group_id), &at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[derive(Default)]
pub struct MemoryMarkerStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MarkerStore for MemoryMarkerStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Marker store backed by a JSON object file, rewritten atomically on every set.
pub struct FileMarkerStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileMarkerStore {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MarkerStore for FileMarkerStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.insert(key.to_owned(), value.to_owned());
        if let Err(e) = save(&self.path, &entries) {
            // Keep memory consistent with disk.
            match previous {
                Some(v) => entries.insert(key.to_owned(), v),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// Write tmp + rename. The temp name is unique per process and call so
/// concurrent writers never share a partially written file.
fn save(path: &Path, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let json = serde_json::to_string_pretty(entries)?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    let result = std::fs::write(&tmp_path, json).and_then(|()| std::fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    Ok(result?)
}

#[cfg(test)]
#[path = "marker_tests.rs"]
mod tests;
