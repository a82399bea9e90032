// ── Address resolution ──
//
// Maps a configured address to a cached identity. Pure cache lookup: no
// scan, no direct lookup on the radio, no writes to the cache.

use std::sync::Arc;

use crate::cache::DeviceCache;
use crate::error::CoreError;
use crate::model::{DeviceAddress, DeviceIdentity};

/// Resolves addresses against a shared [`DeviceCache`].
#[derive(Debug, Clone)]
pub struct AddressResolver {
    cache: Arc<DeviceCache>,
}

impl AddressResolver {
    pub fn new(cache: Arc<DeviceCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.cache
    }

    /// Look up `address` (any case) in the cache.
    ///
    /// Fails with [`CoreError::DeviceNotFound`] when the device was never
    /// discovered; the fix for that is pairing and rescanning, not retrying.
    pub fn resolve(&self, address: &DeviceAddress) -> Result<Arc<DeviceIdentity>, CoreError> {
        self.cache
            .get(address)
            .ok_or_else(|| CoreError::DeviceNotFound {
                address: address.clone(),
            })
    }
}
