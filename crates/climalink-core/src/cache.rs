// ── Discovery cache ──
//
// Shared table of peripherals seen by the last discovery scan, keyed by
// normalized address. Written only by a scan, read by resolution.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::{DeviceAddress, DeviceIdentity};

/// Process-wide cache of discovered peripherals.
///
/// Uses `DashMap` for concurrent lookups from many sessions. Every scan
/// bumps a generation counter that observers can watch. Sessions only
/// ever read from it.
pub struct DeviceCache {
    /// Normalized address -> identity. An address appears at most once.
    by_address: DashMap<DeviceAddress, Arc<DeviceIdentity>>,

    /// Scan generation, bumped every time a scan repopulates the cache.
    generation: watch::Sender<u64>,

    last_scan: watch::Sender<Option<DateTime<Utc>>>,
}

impl DeviceCache {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0u64);
        let (last_scan, _) = watch::channel(None);

        Self {
            by_address: DashMap::new(),
            generation,
            last_scan,
        }
    }

    /// Replace the cache contents with the results of a fresh scan.
    ///
    /// When a scan reports the same address twice, the later entry wins.
    /// Returns the number of distinct peripherals now cached.
    pub fn apply_scan(&self, found: impl IntoIterator<Item = DeviceIdentity>) -> usize {
        self.by_address.clear();
        for identity in found {
            self.by_address
                .insert(identity.address.clone(), Arc::new(identity));
        }

        self.last_scan.send_replace(Some(Utc::now()));
        self.generation.send_modify(|g| *g += 1);

        self.by_address.len()
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<Arc<DeviceIdentity>> {
        self.by_address.get(address).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.by_address.contains_key(address)
    }

    /// All cached identities, ordered by address.
    pub fn snapshot(&self) -> Vec<Arc<DeviceIdentity>> {
        let mut all: Vec<Arc<DeviceIdentity>> = self
            .by_address
            .iter()
            .map(|r| Arc::clone(r.value()))
            .collect();
        all.sort_by(|a, b| a.address.cmp(&b.address));
        all
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// Number of scans applied so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Watch scan generations.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        *self.last_scan.borrow()
    }
}

impl Default for DeviceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCache")
            .field("len", &self.len())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}
