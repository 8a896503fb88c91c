use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use lattice_model::{Device, PublicKey};

use crate::config::TunnelConfig;

/// One liveness sample for a peer, as reported by the tunnel device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStats {
    pub last_handshake_time: Option<DateTime<Utc>>,
    pub last_handshake: String,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// The boundary to the actual tunnel device.
///
/// Implementations must not block: the reconcile cycle calls into this while
/// holding the engine lock, and a stalled driver stalls every peer decision.
pub trait TunnelDriver: Send + Sync {
    /// Converges the tunnel device towards `config`.
    ///
    /// Errors are logged and retried implicitly; the next cycle hands over
    /// the full desired state again.
    fn apply_config(&self, config: &TunnelConfig) -> Result<()>;

    fn peer_stats(&self) -> Result<BTreeMap<PublicKey, PeerStats>>;

    /// Called when a peer's direct tunnel entry is dropped in favour of the
    /// relay, so the driver can tear down per-peer state (routes, proxies).
    fn peer_cleanup(&self, device: &Device) -> Result<()>;
}
