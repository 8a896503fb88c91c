use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use lattice_model::{Device, PublicKey};

use crate::methods::PeeringMethod;

/// Everything the agent tracks about one peer between reconcile cycles.
///
/// The cache is authoritative for peering-method state; `device` is merely
/// the last inventory snapshot we saw.
#[derive(Debug, Clone)]
pub struct DeviceCacheEntry {
    pub device: Device,
    pub method: PeeringMethod,
    /// Position of `method` in the ladder; `None` means fully reset,
    /// reconsider all methods.
    pub method_index: Option<usize>,
    /// When the current method was chosen.
    pub peering_time: Option<Instant>,
    pub peer_healthy: bool,
    /// When liveness was last observed under the current method.
    pub peer_healthy_time: Option<Instant>,
    pub last_handshake_time: Option<DateTime<Utc>>,
    pub last_handshake: String,
    pub last_tx_bytes: u64,
    pub last_rx_bytes: u64,
    pub last_refresh: Option<Instant>,
}

impl DeviceCacheEntry {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            method: PeeringMethod::None,
            method_index: None,
            peering_time: None,
            peer_healthy: false,
            peer_healthy_time: None,
            last_handshake_time: None,
            last_handshake: String::new(),
            last_tx_bytes: 0,
            last_rx_bytes: 0,
            last_refresh: None,
        }
    }

    /// Starts the method ladder over from the top.
    ///
    /// All timing and liveness state belongs to the abandoned method and is
    /// invalid afterwards.
    pub fn reset(&mut self) {
        self.method = PeeringMethod::None;
        self.method_index = None;
        self.peering_time = None;
        self.peer_healthy = false;
        self.peer_healthy_time = None;
        self.last_handshake_time = None;
        self.last_handshake = String::new();
        self.last_tx_bytes = 0;
        self.last_rx_bytes = 0;
        self.last_refresh = None;
    }
}

/// Per-peer state between reconcile cycles, keyed by public key.
///
/// Iteration is ordered by public key so whole-cache scans are
/// deterministic.
#[derive(Debug, Default)]
pub struct DeviceCache {
    entries: BTreeMap<PublicKey, DeviceCacheEntry>,
}

impl DeviceCache {
    pub fn upsert(&mut self, device: Device) {
        match self.entries.entry(device.public_key.clone()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().device = device;
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(DeviceCacheEntry::new(device));
            }
        }
    }

    pub fn remove(&mut self, public_key: &PublicKey) -> Option<DeviceCacheEntry> {
        self.entries.remove(public_key)
    }

    pub fn get(&self, public_key: &PublicKey) -> Option<&DeviceCacheEntry> {
        self.entries.get(public_key)
    }

    pub fn get_mut(&mut self, public_key: &PublicKey) -> Option<&mut DeviceCacheEntry> {
        self.entries.get_mut(public_key)
    }

    pub fn contains(&self, public_key: &PublicKey) -> bool {
        self.entries.contains_key(public_key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PublicKey, &DeviceCacheEntry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PublicKey, &mut DeviceCacheEntry)> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::device;

    #[test]
    fn upsert_keeps_peering_state() {
        let mut cache = DeviceCache::default();
        let mut d = device("key-a");

        cache.upsert(d.clone());
        let entry = cache.get_mut(&d.public_key).unwrap();
        entry.method = PeeringMethod::Reflexive;
        entry.method_index = Some(5);
        entry.peering_time = Some(Instant::now());

        d.hostname = "renamed".to_owned();
        cache.upsert(d.clone());

        let entry = cache.get(&d.public_key).unwrap();
        assert_eq!(entry.device.hostname, "renamed");
        assert_eq!(entry.method, PeeringMethod::Reflexive);
        assert_eq!(entry.method_index, Some(5));
    }

    #[test]
    fn reset_clears_method_and_stats() {
        let mut entry = DeviceCacheEntry::new(device("key-a"));
        entry.method = PeeringMethod::ViaRelay;
        entry.method_index = Some(6);
        entry.peering_time = Some(Instant::now());
        entry.peer_healthy = true;
        entry.peer_healthy_time = Some(Instant::now());
        entry.last_tx_bytes = 42;

        entry.reset();

        assert_eq!(entry.method, PeeringMethod::None);
        assert_eq!(entry.method_index, None);
        assert_eq!(entry.peering_time, None);
        assert!(!entry.peer_healthy);
        assert_eq!(entry.peer_healthy_time, None);
        assert_eq!(entry.last_tx_bytes, 0);
    }

    #[test]
    fn removed_entries_are_gone() {
        let mut cache = DeviceCache::default();
        cache.upsert(device("key-a"));

        assert!(cache.remove(&PublicKey::from("key-a")).is_some());
        assert!(!cache.contains(&PublicKey::from("key-a")));
        assert!(cache.remove(&PublicKey::from("key-a")).is_none());
    }
}
