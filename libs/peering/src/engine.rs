use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ip_network::IpNetwork;
use lattice_model::{Device, PublicKey, Vpc};

use crate::cache::{DeviceCache, DeviceCacheEntry};
use crate::config::{InterfaceConfig, PeerConfig, TunnelConfig};
use crate::driver::TunnelDriver;
use crate::methods::{BuildInput, METHODS, PeeringMethod};

/// How long to wait for successful peering after choosing a new method.
pub(crate) const PEERING_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for peering to restore itself after it worked under the
/// current method and then went down.
pub(crate) const PEERING_RESTORE_TIMEOUT: Duration = Duration::from_secs(180);

/// Identity and locally observed network conditions of this node.
#[derive(Debug, Clone)]
pub struct LocalNode {
    pub public_key: PublicKey,
    pub private_key: String,
    pub listen_port: u16,
    pub relay: bool,
    pub symmetric_nat: bool,
    /// Our address as the STUN server saw it.
    pub reflexive_ipv4: Option<Ipv4Addr>,
    pub tunnel_iface: String,
}

/// The per-peer decision state machine.
///
/// Owns the device cache and the tunnel configuration; the caller holds the
/// engine behind a single lock for the whole reconcile cycle.
pub struct Engine {
    local: LocalNode,
    vpc: Vpc,
    driver: Arc<dyn TunnelDriver>,
    cache: DeviceCache,
    config: TunnelConfig,
    tunnel_ipv4: Option<Ipv4Addr>,
    tunnel_ipv6: Option<Ipv6Addr>,
    public_key_in_config: bool,
}

impl Engine {
    pub fn new(local: LocalNode, vpc: Vpc, driver: Arc<dyn TunnelDriver>) -> Self {
        Self {
            local,
            vpc,
            driver,
            cache: DeviceCache::default(),
            config: TunnelConfig::default(),
            tunnel_ipv4: None,
            tunnel_ipv6: None,
            public_key_in_config: false,
        }
    }

    /// Feeds one inventory row into the cache.
    ///
    /// Soft-deleted devices leave the cache; everything else updates the
    /// last-seen snapshot without touching peering state.
    pub fn upsert_device(&mut self, device: Device) {
        if device.deleted_at.is_some() {
            self.cache.remove(&device.public_key);
            return;
        }

        self.cache.upsert(device);
    }

    pub fn remove_device(&mut self, public_key: &PublicKey) {
        self.cache.remove(public_key);
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Whether the local device has shown up in the inventory yet.
    ///
    /// Until it has, the interface config is incomplete and nothing should
    /// be handed to the driver.
    pub fn interface_configured(&self) -> bool {
        self.public_key_in_config
    }

    pub(crate) fn cache(&self) -> &DeviceCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut DeviceCache {
        &mut self.cache
    }

    /// One reconcile cycle: walks the whole cache, re-decides every peer's
    /// method and rewrites the tunnel config accordingly.
    ///
    /// Returns the peers whose applied configuration changed this cycle.
    pub fn build_peers_config(&mut self, now: Instant) -> BTreeMap<PublicKey, Device> {
        let mut updated = BTreeMap::new();
        let mut allowed_ips_for_relay: Vec<IpNetwork> = Vec::new();

        self.public_key_in_config = self.cache.contains(&self.local.public_key);
        self.build_local_config();

        let healthy_relay = self
            .cache
            .iter()
            .find(|(_, entry)| entry.device.relay && entry.peer_healthy)
            .map(|(_, entry)| entry.device.clone());

        let Engine {
            local,
            vpc,
            driver,
            cache,
            config,
            ..
        } = self;
        let vpc_prefixes = [
            IpNetwork::from(vpc.ipv4_cidr),
            IpNetwork::from(vpc.ipv6_cidr),
        ];

        for (public_key, entry) in cache.iter_mut() {
            if *public_key == local.public_key {
                continue;
            }

            let (peer, method, method_index) = rebuild_peer_config(
                local,
                &vpc_prefixes,
                config,
                entry,
                healthy_relay.is_some(),
                now,
            );

            allowed_ips_for_relay.extend(peer.allowed_ips_for_relay.iter().cloned());

            if method == PeeringMethod::None {
                // No method is available for this peer; there is nothing to
                // apply and nothing to record.
                continue;
            }

            let changed = match config.peers.get(public_key) {
                Some(existing) => !existing.same_applied(&peer),
                // Absence is the applied state for a peer parked on the
                // relay; picking via-relay again is not a change.
                None => !(method == PeeringMethod::ViaRelay && entry.method == PeeringMethod::ViaRelay),
            };
            if !changed {
                continue;
            }

            updated.insert(public_key.clone(), entry.device.clone());

            if method == PeeringMethod::ViaRelay {
                if config.peers.remove(public_key).is_some() {
                    if let Err(e) = driver.peer_cleanup(&entry.device) {
                        tracing::warn!(peer = %public_key, "Failed to clean up peer state: {e:#}");
                    }
                }
            } else {
                config.peers.insert(public_key.clone(), peer.clone());
            }

            entry.method = method;
            entry.method_index = method_index;
            entry.peering_time = Some(now);

            tracing::debug!(peer = %public_key, %method, endpoint = ?peer.endpoint, "Updated peer configuration");
        }

        if let Some(relay_device) = healthy_relay {
            if !allowed_ips_for_relay.is_empty() {
                // Route prefixes of relay-only peers through the relay, on
                // top of the VPC-wide routes it already carries.
                let relay_config = config
                    .peers
                    .entry(relay_device.public_key.clone())
                    .or_insert_with(|| PeerConfig {
                        public_key: relay_device.public_key,
                        ..PeerConfig::default()
                    });

                let mut allowed = vec![
                    IpNetwork::from(vpc.ipv4_cidr),
                    IpNetwork::from(vpc.ipv4_cidr),
                ];
                allowed.extend(allowed_ips_for_relay);
                relay_config.allowed_ips = allowed;
            }
        }

        updated
    }

    /// Rebuilds the local interface config from our own inventory row.
    fn build_local_config(&mut self) {
        let Some(entry) = self.cache.get(&self.local.public_key) else {
            return;
        };

        if self.tunnel_ipv4 != entry.device.tunnel_ipv4 {
            tracing::info!(
                ipv4 = ?entry.device.tunnel_ipv4,
                ipv6 = ?entry.device.tunnel_ipv6,
                "New tunnel interface addresses assigned"
            );

            // The link carries the old address; removing it lets the caller
            // recreate it with the new one.
            #[cfg(target_os = "linux")]
            crate::link::delete_link(self.local.tunnel_iface.clone());
        }

        self.tunnel_ipv4 = entry.device.tunnel_ipv4;
        self.tunnel_ipv6 = entry.device.tunnel_ipv6;
        self.config.interface = InterfaceConfig {
            private_key: self.local.private_key.clone(),
            listen_port: self.local.listen_port,
        };
    }
}

/// Decides the peering method for one peer and builds its tunnel config.
///
/// May reset the entry's ladder position when every downstream method is
/// exhausted.
fn rebuild_peer_config(
    local: &LocalNode,
    vpc_prefixes: &[IpNetwork; 2],
    config: &TunnelConfig,
    entry: &mut DeviceCacheEntry,
    healthy_relay: bool,
    now: Instant,
) -> (PeerConfig, PeeringMethod, Option<usize>) {
    let (local_endpoint, reflexive_endpoint) = extract_local_and_reflexive(&entry.device);

    let mut try_next_method = peering_failed(entry, healthy_relay, now);
    if try_next_method {
        tracing::debug!(
            peer = %entry.device.public_key,
            method = %entry.method,
            "Peering failed, trying the next method"
        );

        if should_reset_peering(local, entry, reflexive_endpoint.as_deref(), healthy_relay) {
            tracing::debug!(peer = %entry.device.public_key, "No methods remain, starting over");
            entry.reset();
            try_next_method = false;
        }
    }

    let mut peer = config
        .peers
        .get(&entry.device.public_key)
        .cloned()
        .unwrap_or_default();
    let mut chosen_method = entry.method;
    let mut chosen_index = entry.method_index;

    for (i, method) in METHODS.iter().enumerate() {
        if let Some(current) = entry.method_index {
            if i < current {
                continue;
            }
            if i == current && try_next_method {
                continue;
            }
        }
        if !(method.prereqs)(
            local,
            &entry.device,
            reflexive_endpoint.as_deref(),
            healthy_relay,
        ) {
            continue;
        }
        if method.name == PeeringMethod::ViaRelay && entry.method == PeeringMethod::ViaRelay {
            // Already going through the relay, nothing to rebuild.
            break;
        }

        peer = (method.build)(&BuildInput {
            device: &entry.device,
            local_endpoint: local_endpoint.as_deref(),
            reflexive_endpoint: reflexive_endpoint.as_deref(),
            vpc_prefixes,
        });
        chosen_method = method.name;
        chosen_index = Some(i);
        break;
    }

    (peer, chosen_method, chosen_index)
}

/// Whether the current method looks dead and should be abandoned.
fn peering_failed(entry: &DeviceCacheEntry, healthy_relay: bool, now: Instant) -> bool {
    if entry.peer_healthy {
        return false;
    }

    if entry.method_index == Some(METHODS.len() - 1) {
        // Don't bail out of the last fallback while it is at least
        // theoretically viable.
        return !healthy_relay;
    }

    let Some(peering_time) = entry.peering_time else {
        return false;
    };

    match entry.peer_healthy_time {
        // Never worked under this method; time out quickly.
        None if now.duration_since(peering_time) < PEERING_TIMEOUT => false,
        // Worked and went down; give it a few minutes to come back.
        Some(healthy_time) if now.duration_since(healthy_time) < PEERING_RESTORE_TIMEOUT => false,
        _ => true,
    }
}

/// Whether advancing down the ladder would change nothing, so the peer
/// should loop back to the top instead.
fn should_reset_peering(
    local: &LocalNode,
    entry: &DeviceCacheEntry,
    reflexive_endpoint: Option<&str>,
    healthy_relay: bool,
) -> bool {
    let Some(current) = entry.method_index else {
        return false;
    };

    if current == METHODS.len() - 1 {
        return true;
    }

    !METHODS[current + 1..]
        .iter()
        .any(|method| (method.prereqs)(local, &entry.device, reflexive_endpoint, healthy_relay))
}

/// The last-listed local and reflexive endpoint addresses of a device.
fn extract_local_and_reflexive(device: &Device) -> (Option<String>, Option<String>) {
    let mut local = None;
    let mut reflexive = None;

    for endpoint in &device.endpoints {
        if endpoint.is_local() {
            local = Some(endpoint.address.clone());
        } else {
            reflexive = Some(endpoint.address.clone());
        }
    }

    (local, reflexive)
}
