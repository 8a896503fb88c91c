//! The peer-connectivity engine of the lattice agent.
//!
//! Given the device inventory and locally observed network conditions, the
//! engine decides per peer how its encrypted tunnel should be reached:
//! directly over the LAN, via the peer's reflexive address, or through a
//! relay node. Decisions walk an ordered method ladder with hysteresis and
//! end up as a declarative [`TunnelConfig`] for the tunnel driver.

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod cache;
mod config;
mod driver;
mod engine;
mod health;
#[cfg(target_os = "linux")]
mod link;
mod methods;

pub use cache::{DeviceCache, DeviceCacheEntry};
pub use config::{InterfaceConfig, PERSISTENT_KEEPALIVE, PeerConfig, TunnelConfig};
pub use driver::{PeerStats, TunnelDriver};
pub use engine::{Engine, LocalNode};
pub use methods::PeeringMethod;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lattice_model::{Device, PublicKey, Vpc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared handle to the engine and its driver.
///
/// One clone runs the reconcile loop, one the health sampler; both go
/// through the same lock, held for a whole cycle at a time.
#[derive(Clone)]
pub struct Peering {
    engine: Arc<Mutex<Engine>>,
    driver: Arc<dyn TunnelDriver>,
}

impl Peering {
    pub fn new(local: LocalNode, vpc: Vpc, driver: Arc<dyn TunnelDriver>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(Engine::new(local, vpc, driver.clone()))),
            driver,
        }
    }

    /// Feeds one inventory row into the cache, typically from a device
    /// watch stream.
    pub fn apply_device(&self, device: Device) {
        self.engine.lock().upsert_device(device);
    }

    pub fn forget_device(&self, public_key: &PublicKey) {
        self.engine.lock().remove_device(public_key);
    }

    pub fn config_snapshot(&self) -> TunnelConfig {
        self.engine.lock().config().clone()
    }

    /// Runs one reconcile cycle and hands the resulting config snapshot to
    /// the driver.
    pub fn reconcile_now(&self) -> BTreeMap<PublicKey, Device> {
        let mut engine = self.engine.lock();
        let updated = engine.build_peers_config(Instant::now());

        if !engine.interface_configured() {
            // Our own device row hasn't arrived yet; there is no interface
            // key to configure the tunnel with.
            return updated;
        }

        let snapshot = engine.config().clone();
        drop(engine);

        if let Err(e) = self.driver.apply_config(&snapshot) {
            tracing::warn!("Failed to apply tunnel config: {e:#}");
        }

        updated
    }

    /// Samples driver stats into the cache and re-derives per-peer liveness.
    pub fn sample_stats_now(&self) {
        let stats = match self.driver.peer_stats() {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!("Failed to read peer stats: {e:#}");
                return;
            }
        };

        health::apply_stats(
            self.engine.lock().cache_mut(),
            &stats,
            Instant::now(),
            chrono::Utc::now(),
        );
    }

    /// Spawns the reconcile loop and the health sampler until `cancel`
    /// fires.
    pub fn start(
        &self,
        reconcile_every: Duration,
        sample_every: Duration,
        cancel: CancellationToken,
    ) {
        let this = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reconcile_every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        this.reconcile_now();
                    }
                }
            }
        });

        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sample_every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        this.sample_stats_now();
                    }
                }
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use anyhow::Result;
    use lattice_model::{
        Device, DeviceId, OrganizationId, PublicKey, SecurityGroupId, Vpc, VpcId,
    };
    use parking_lot::Mutex;

    use crate::config::TunnelConfig;
    use crate::driver::{PeerStats, TunnelDriver};

    pub(crate) fn device(key: &str) -> Device {
        Device {
            id: DeviceId::from_u128(1),
            organization_id: OrganizationId::from_u128(2),
            vpc_id: VpcId::from_u128(3),
            security_group_id: SecurityGroupId::from_u128(4),
            public_key: PublicKey::from(key),
            hostname: format!("host-{key}"),
            os: "linux".to_owned(),
            endpoints: Vec::new(),
            tunnel_ipv4: None,
            tunnel_ipv6: None,
            allowed_ips: Vec::new(),
            advertise_cidrs: Vec::new(),
            relay: false,
            symmetric_nat: false,
            revision: 0,
            deleted_at: None,
        }
    }

    pub(crate) fn vpc() -> Vpc {
        Vpc {
            id: VpcId::from_u128(3),
            organization_id: OrganizationId::from_u128(2),
            description: "test vpc".to_owned(),
            private_cidr: false,
            ipv4_cidr: "172.16.42.0/24".parse().unwrap(),
            ipv6_cidr: "0200::/64".parse().unwrap(),
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingDriver {
        pub applied: Mutex<Vec<TunnelConfig>>,
        pub cleanups: Mutex<Vec<PublicKey>>,
        pub stats: Mutex<BTreeMap<PublicKey, PeerStats>>,
    }

    impl TunnelDriver for RecordingDriver {
        fn apply_config(&self, config: &TunnelConfig) -> Result<()> {
            self.applied.lock().push(config.clone());
            Ok(())
        }

        fn peer_stats(&self) -> Result<BTreeMap<PublicKey, PeerStats>> {
            Ok(self.stats.lock().clone())
        }

        fn peer_cleanup(&self, device: &Device) -> Result<()> {
            self.cleanups.lock().push(device.public_key.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    use super::*;
    use crate::testing::{RecordingDriver, device, vpc};

    fn local_node() -> LocalNode {
        LocalNode {
            public_key: PublicKey::from("local-key"),
            private_key: "local-private-key".to_owned(),
            listen_port: 51820,
            relay: false,
            symmetric_nat: false,
            reflexive_ipv4: Some(Ipv4Addr::new(198, 51, 100, 1)),
            tunnel_iface: "tun-lattice".to_owned(),
        }
    }

    #[test]
    fn reconcile_hands_a_snapshot_to_the_driver() {
        let driver = Arc::new(RecordingDriver::default());
        let peering = Peering::new(local_node(), vpc(), driver.clone());

        // Nothing to configure before our own row arrives.
        peering.reconcile_now();
        assert!(driver.applied.lock().is_empty());

        let mut local_device = device("local-key");
        local_device.tunnel_ipv4 = Some(Ipv4Addr::new(172, 16, 42, 2));
        peering.apply_device(local_device);

        let mut peer = device("peer-key");
        peer.endpoints
            .push(lattice_model::Endpoint::reflexive("203.0.113.77:51820"));
        peering.apply_device(peer);

        let updated = peering.reconcile_now();

        assert_eq!(updated.len(), 1);
        let applied = driver.applied.lock();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0], peering.config_snapshot());
        assert!(applied[0].peers.contains_key(&PublicKey::from("peer-key")));
    }

    #[test]
    fn stats_feed_back_into_liveness() {
        let driver = Arc::new(RecordingDriver::default());
        let peering = Peering::new(local_node(), vpc(), driver.clone());

        let mut peer = device("peer-key");
        peer.endpoints
            .push(lattice_model::Endpoint::reflexive("203.0.113.77:51820"));
        peering.apply_device(peer);
        peering.reconcile_now();

        driver.stats.lock().insert(
            PublicKey::from("peer-key"),
            PeerStats {
                tx_bytes: 1024,
                ..PeerStats::default()
            },
        );
        peering.sample_stats_now();

        let engine = peering.engine.lock();
        let entry = engine_entry(&engine, "peer-key");
        assert!(entry.peer_healthy);
    }

    fn engine_entry<'e>(engine: &'e Engine, key: &str) -> &'e DeviceCacheEntry {
        engine
            .cache()
            .get(&PublicKey::from(key))
            .expect("entry exists")
    }
}
