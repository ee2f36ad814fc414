//! Device Hierarchy Cache
//!
//! Process-local map from device path to the last record observed for it.
//! Used during reconciliation to find a partition's parent disk and to see
//! which devices carry holders. Rebuilt wholesale on every full scan and
//! edited in place for single events between scans.

use crate::domain::DeviceRecord;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct CacheEntry {
    record: DeviceRecord,
    last_seen: DateTime<Utc>,
}

impl CacheEntry {
    fn new(record: DeviceRecord) -> Self {
        Self {
            record,
            last_seen: Utc::now(),
        }
    }
}

/// Path-keyed cache of device records
#[derive(Debug, Default)]
pub struct HierarchyCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl HierarchyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the record under its path; returns true if the path was known
    pub fn add_or_update(&self, record: DeviceRecord) -> bool {
        let path = record.dev_path.clone();
        let existed = self
            .entries
            .write()
            .insert(path.clone(), CacheEntry::new(record))
            .is_some();
        debug!(device = %path, existed, "hierarchy cache updated");
        existed
    }

    /// Drop a path; returns true if it was present
    pub fn remove(&self, path: &str) -> bool {
        self.entries.write().remove(path).is_some()
    }

    pub fn lookup(&self, path: &str) -> Option<DeviceRecord> {
        self.entries.read().get(path).map(|e| e.record.clone())
    }

    /// Record of a device's parent disk
    pub fn parent_of(&self, record: &DeviceRecord) -> Option<DeviceRecord> {
        if record.dependents.parent.is_empty() {
            return None;
        }
        self.lookup(&record.dependents.parent)
    }

    /// Replace the whole cache with a fresh scan
    pub fn rebuild(&self, records: impl IntoIterator<Item = DeviceRecord>) {
        let fresh: HashMap<String, CacheEntry> = records
            .into_iter()
            .map(|r| (r.dev_path.clone(), CacheEntry::new(r)))
            .collect();
        debug!("hierarchy cache rebuilt with {} devices", fresh.len());
        *self.entries.write() = fresh;
    }

    /// Copy of every cached record
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.entries.read().values().map(|e| e.record.clone()).collect()
    }

    /// When a path was last added or updated
    pub fn last_seen(&self, path: &str) -> Option<DateTime<Utc>> {
        self.entries.read().get(path).map(|e| e.last_seen)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
