//! [`FleetStateStore`] – latest snapshot per vehicle serial.
//!
//! Written by the connection worker, read by any number of callers.  Every
//! [`upsert`][FleetStateStore::upsert] runs under the write lock, so a reader
//! sees either the whole update or none of it.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use fleetdash_types::AgvSnapshot;

#[derive(Debug, Default)]
pub struct FleetStateStore {
    entries: RwLock<HashMap<String, AgvSnapshot>>,
}

impl FleetStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `update` to the snapshot for `serial`, creating a zero-valued
    /// one first if the serial is new.  Returns a copy of the result.
    pub fn upsert<F>(&self, serial: &str, update: F) -> AgvSnapshot
    where
        F: FnOnce(&mut AgvSnapshot),
    {
        let mut entries = self.write();
        let snapshot = entries
            .entry(serial.to_string())
            .or_insert_with(|| AgvSnapshot::new(serial));
        update(snapshot);
        snapshot.clone()
    }

    pub fn get(&self, serial: &str) -> Option<AgvSnapshot> {
        self.read().get(serial).cloned()
    }

    pub fn contains(&self, serial: &str) -> bool {
        self.read().contains_key(serial)
    }

    /// Copy of every snapshot, oldest first by `connect_timestamp`
    /// (serial breaks ties).
    pub fn all(&self) -> Vec<AgvSnapshot> {
        let mut snapshots: Vec<AgvSnapshot> = self.read().values().cloned().collect();
        snapshots.sort_by(|a, b| {
            a.connect_timestamp
                .cmp(&b.connect_timestamp)
                .then_with(|| a.serial.cmp(&b.serial))
        });
        snapshots
    }

    /// Serials currently known, in the same order as [`all`][Self::all].
    pub fn serials(&self) -> Vec<String> {
        self.all().into_iter().map(|s| s.serial).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drop every snapshot.  Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    // A panic inside an update closure poisons the lock; the map itself is
    // still structurally valid, so keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, AgvSnapshot>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, AgvSnapshot>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}
