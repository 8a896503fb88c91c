use std::collections::BTreeMap;

use ip_network::IpNetwork;
use lattice_model::PublicKey;

/// Keepalive interval for every peer we hold a direct tunnel entry for.
pub const PERSISTENT_KEEPALIVE: u16 = 20;

/// The declarative configuration handed to the tunnel driver.
///
/// The engine owns this; the driver receives snapshots and is expected to
/// converge the actual tunnel device towards it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TunnelConfig {
    pub interface: InterfaceConfig,
    pub peers: BTreeMap<PublicKey, PeerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub private_key: String,
    pub listen_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: PublicKey,
    pub endpoint: Option<String>,
    pub allowed_ips: Vec<IpNetwork>,
    pub persistent_keepalive: Option<u16>,
    /// Prefixes to route through the relay instead of this peer.
    ///
    /// Only populated while a cycle constructs the config; never part of the
    /// applied peer entry.
    pub allowed_ips_for_relay: Vec<IpNetwork>,
}

impl PeerConfig {
    /// Whether two configs describe the same applied state.
    ///
    /// Only the endpoint and the allowed-IPs sequence matter; everything else
    /// is construction-time bookkeeping.
    pub fn same_applied(&self, other: &Self) -> bool {
        self.endpoint == other.endpoint && self.allowed_ips == other.allowed_ips
    }
}
