//! File-backed state: four independent JSON tables under the data dir.
//!
//! Every table is read and written whole. A missing or unreadable file loads
//! as the table's default value; only writes can fail. Each table carries its
//! own mutex so a read-modify-write never interleaves with another writer in
//! this process.

use std::collections::BTreeMap;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{CachedReport, Result, Subscriber, SubscriberMeta};

pub const SUBSCRIBERS_FILE: &str = "subscribers.json";
pub const REPORT_CACHE_FILE: &str = "report_cache.json";
pub const DEDUP_HISTORY_FILE: &str = "prev_titles.json";
pub const VERSION_MARKER_FILE: &str = "last_version.json";

pub struct JsonTable<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonTable<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> T {
        let _guard = self.guard();
        self.read_file()
    }

    pub fn save(&self, value: &T) -> Result<()> {
        let _guard = self.guard();
        self.write_file(value)
    }

    /// Loads, applies `f`, and writes the table back while holding the lock.
    /// Nothing is written when `f` reports that it changed nothing.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> (R, bool)) -> Result<R> {
        let _guard = self.guard();
        let mut value = self.read_file();
        let (result, changed) = f(&mut value);
        if changed {
            self.write_file(&value)?;
        }
        Ok(result)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_file(&self) -> T {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return T::default(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return T::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Failed to parse {}, treating as empty: {}", self.path.display(), e);
            T::default()
        })
    }

    fn write_file(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(value)?;
        // Write-then-rename so a crash never leaves a half-written table.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Saved {}", self.path.display());
        Ok(())
    }
}

pub struct SubscriberRegistry {
    table: JsonTable<BTreeMap<String, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { table: JsonTable::new(path) }
    }

    /// Returns true when `id` was not subscribed before.
    pub fn subscribe(&self, id: &str, meta: SubscriberMeta) -> Result<bool> {
        self.table.update(|subscribers| {
            if subscribers.contains_key(id) {
                return (false, false);
            }
            subscribers.insert(
                id.to_string(),
                Subscriber {
                    id: id.to_string(),
                    display_name: meta.display_name,
                    username: meta.username,
                    joined_at: Utc::now(),
                },
            );
            (true, true)
        })
    }

    /// Returns true when `id` was present and has been removed.
    pub fn unsubscribe(&self, id: &str) -> Result<bool> {
        self.table.update(|subscribers| {
            let removed = subscribers.remove(id).is_some();
            (removed, removed)
        })
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.table.load().contains_key(id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.table.load().into_keys().collect()
    }

    pub fn count(&self) -> usize {
        self.table.load().len()
    }

    pub fn all(&self) -> Vec<Subscriber> {
        self.table.load().into_values().collect()
    }
}

pub struct ReportCache {
    table: JsonTable<Option<CachedReport>>,
}

impl ReportCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { table: JsonTable::new(path) }
    }

    pub fn load(&self) -> Option<CachedReport> {
        self.table.load()
    }

    pub fn store(&self, body: &str, generated_at: DateTime<Utc>) -> Result<CachedReport> {
        let report = CachedReport {
            generated_at,
            body: body.to_string(),
        };
        self.table.save(&Some(report.clone()))?;
        Ok(report)
    }
}

/// Titles reported in the most recent period, newest period only.
pub struct DedupHistory {
    table: JsonTable<Vec<String>>,
    cap: usize,
}

impl DedupHistory {
    pub fn new(path: impl Into<PathBuf>, cap: usize) -> Self {
        Self {
            table: JsonTable::new(path),
            cap,
        }
    }

    pub fn load(&self) -> Vec<String> {
        let mut titles = self.table.load();
        titles.truncate(self.cap);
        titles
    }

    /// Replaces the whole history with this period's titles, capped.
    pub fn replace(&self, titles: &[String]) -> Result<usize> {
        let kept: Vec<String> = titles.iter().take(self.cap).cloned().collect();
        self.table.save(&kept)?;
        Ok(kept.len())
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

pub struct VersionMarker {
    table: JsonTable<Option<String>>,
}

impl VersionMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { table: JsonTable::new(path) }
    }

    pub fn load(&self) -> Option<String> {
        self.table.load()
    }

    pub fn save(&self, version: &str) -> Result<()> {
        self.table.save(&Some(version.to_string()))
    }

    pub fn path(&self) -> &Path {
        self.table.path()
    }
}

/// All persisted state of the process.
pub struct Store {
    pub data_dir: PathBuf,
    pub subscribers: SubscriberRegistry,
    pub reports: ReportCache,
    pub dedup: DedupHistory,
    pub version: VersionMarker,
}

impl Store {
    pub fn open(data_dir: impl Into<PathBuf>, dedup_cap: usize) -> Self {
        let data_dir = data_dir.into();
        Self {
            subscribers: SubscriberRegistry::new(data_dir.join(SUBSCRIBERS_FILE)),
            reports: ReportCache::new(data_dir.join(REPORT_CACHE_FILE)),
            dedup: DedupHistory::new(data_dir.join(DEDUP_HISTORY_FILE), dedup_cap),
            version: VersionMarker::new(data_dir.join(VERSION_MARKER_FILE)),
            data_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("weekly-digest-store-{}", Uuid::new_v4()))
    }

    #[test]
    fn missing_files_load_as_defaults() {
        let dir = temp_dir();
        let store = Store::open(&dir, 80);
        assert_eq!(store.subscribers.count(), 0);
        assert!(store.reports.load().is_none());
        assert!(store.dedup.load().is_empty());
        assert!(store.version.load().is_none());
        assert!(!dir.exists(), "loading must not create the data dir");
    }

    #[test]
    fn corrupt_file_loads_as_default() {
        let dir = temp_dir();
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SUBSCRIBERS_FILE), "{ not json").unwrap();
        fs::write(dir.join(REPORT_CACHE_FILE), "[1, 2").unwrap();
        let store = Store::open(&dir, 80);
        assert_eq!(store.subscribers.count(), 0);
        assert!(store.reports.load().is_none());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn subscribe_is_idempotent_and_persists() {
        let dir = temp_dir();
        let store = Store::open(&dir, 80);
        assert!(store.subscribers.subscribe("42", SubscriberMeta::default()).unwrap());
        assert!(!store.subscribers.subscribe("42", SubscriberMeta::default()).unwrap());

        let reopened = Store::open(&dir, 80);
        assert!(reopened.subscribers.is_subscribed("42"));
        assert!(reopened.subscribers.unsubscribe("42").unwrap());
        assert!(!reopened.subscribers.unsubscribe("42").unwrap());
        assert_eq!(reopened.subscribers.count(), 0);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn dedup_history_is_capped() {
        let dir = temp_dir();
        let store = Store::open(&dir, 3);
        let titles: Vec<String> = (0..10).map(|i| format!("title {}", i)).collect();
        assert_eq!(store.dedup.replace(&titles).unwrap(), 3);
        assert_eq!(store.dedup.load(), vec!["title 0", "title 1", "title 2"]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn report_cache_overwrites() {
        let dir = temp_dir();
        let store = Store::open(&dir, 80);
        store.reports.store("first", Utc::now()).unwrap();
        store.reports.store("second", Utc::now()).unwrap();
        assert_eq!(store.reports.load().unwrap().body, "second");
        fs::remove_dir_all(&dir).ok();
    }
}
