use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, TimeDelta, Utc};
use lattice_model::PublicKey;

use crate::cache::DeviceCache;
use crate::config::PERSISTENT_KEEPALIVE;
use crate::driver::PeerStats;
use crate::methods::PeeringMethod;

/// A handshake older than this no longer counts as proof of life.
fn handshake_window() -> TimeDelta {
    TimeDelta::seconds(PERSISTENT_KEEPALIVE as i64 * 3)
}

/// Folds one round of driver stats into the cache.
///
/// A peer is healthy when its current method produced a recent handshake or
/// traffic kept flowing since the previous sample. Peers without a chosen
/// method are never healthy; there is nothing the sample could be evidence
/// for.
pub(crate) fn apply_stats(
    cache: &mut DeviceCache,
    stats: &BTreeMap<PublicKey, PeerStats>,
    now: Instant,
    wall_now: DateTime<Utc>,
) {
    for (public_key, sample) in stats {
        let Some(entry) = cache.get_mut(public_key) else {
            continue;
        };

        let handshake_fresh = sample
            .last_handshake_time
            .is_some_and(|at| wall_now.signed_duration_since(at) < handshake_window());
        let traffic_flowing = sample.tx_bytes > entry.last_tx_bytes;

        let healthy =
            entry.method != PeeringMethod::None && (handshake_fresh || traffic_flowing);

        if healthy != entry.peer_healthy {
            tracing::debug!(peer = %public_key, healthy, method = %entry.method, "Peer liveness changed");
        }

        entry.peer_healthy = healthy;
        if healthy {
            entry.peer_healthy_time = Some(now);
        }
        entry.last_handshake_time = sample.last_handshake_time;
        entry.last_handshake = sample.last_handshake.clone();
        entry.last_tx_bytes = sample.tx_bytes;
        entry.last_rx_bytes = sample.rx_bytes;
        entry.last_refresh = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::DeviceCacheEntry;
    use crate::testing::device;

    fn cache_with_method(method: PeeringMethod) -> DeviceCache {
        let mut cache = DeviceCache::default();
        let mut entry = DeviceCacheEntry::new(device("peer-key"));
        entry.method = method;
        if method != PeeringMethod::None {
            entry.method_index = Some(5);
            entry.peering_time = Some(Instant::now());
        }
        cache.upsert(entry.device.clone());
        let key = entry.device.public_key.clone();
        *cache.get_mut(&key).unwrap() = entry;
        cache
    }

    fn stats(sample: PeerStats) -> BTreeMap<PublicKey, PeerStats> {
        BTreeMap::from([(PublicKey::from("peer-key"), sample)])
    }

    #[test]
    fn fresh_handshake_marks_the_peer_healthy() {
        let mut cache = cache_with_method(PeeringMethod::Reflexive);
        let wall_now = Utc::now();

        apply_stats(
            &mut cache,
            &stats(PeerStats {
                last_handshake_time: Some(wall_now - TimeDelta::seconds(10)),
                ..PeerStats::default()
            }),
            Instant::now(),
            wall_now,
        );

        let entry = cache.get(&PublicKey::from("peer-key")).unwrap();
        assert!(entry.peer_healthy);
        assert!(entry.peer_healthy_time.is_some());
    }

    #[test]
    fn traffic_counts_as_proof_of_life() {
        let mut cache = cache_with_method(PeeringMethod::Reflexive);

        apply_stats(
            &mut cache,
            &stats(PeerStats {
                tx_bytes: 512,
                ..PeerStats::default()
            }),
            Instant::now(),
            Utc::now(),
        );

        assert!(cache.get(&PublicKey::from("peer-key")).unwrap().peer_healthy);
    }

    #[test]
    fn stale_handshake_and_idle_traffic_is_unhealthy() {
        let mut cache = cache_with_method(PeeringMethod::Reflexive);
        let wall_now = Utc::now();
        let now = Instant::now();

        apply_stats(
            &mut cache,
            &stats(PeerStats {
                last_handshake_time: Some(wall_now - TimeDelta::seconds(10)),
                tx_bytes: 512,
                ..PeerStats::default()
            }),
            now,
            wall_now,
        );

        // Next sample: handshake has aged past the window, no new bytes.
        let later = wall_now + TimeDelta::seconds(120);
        apply_stats(
            &mut cache,
            &stats(PeerStats {
                last_handshake_time: Some(wall_now - TimeDelta::seconds(10)),
                tx_bytes: 512,
                ..PeerStats::default()
            }),
            now + Duration::from_secs(120),
            later,
        );

        let entry = cache.get(&PublicKey::from("peer-key")).unwrap();
        assert!(!entry.peer_healthy);
        // The healthy timestamp survives for the restore timeout to work
        // from.
        assert_eq!(entry.peer_healthy_time, Some(now));
    }

    #[test]
    fn peers_without_a_method_are_never_healthy() {
        let mut cache = cache_with_method(PeeringMethod::None);

        apply_stats(
            &mut cache,
            &stats(PeerStats {
                tx_bytes: 512,
                ..PeerStats::default()
            }),
            Instant::now(),
            Utc::now(),
        );

        assert!(!cache.get(&PublicKey::from("peer-key")).unwrap().peer_healthy);
    }

    #[test]
    fn unknown_peers_are_ignored() {
        let mut cache = DeviceCache::default();

        apply_stats(
            &mut cache,
            &stats(PeerStats::default()),
            Instant::now(),
            Utc::now(),
        );

        assert!(cache.is_empty());
    }
}
