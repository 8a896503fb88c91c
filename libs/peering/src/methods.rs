use ip_network::IpNetwork;
use lattice_model::Device;

use crate::config::{PERSISTENT_KEEPALIVE, PeerConfig};
use crate::engine::LocalNode;

/// How a remote peer is reached, in order of preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PeeringMethod {
    RelaySelfDirectLocal,
    RelaySelf,
    RelayPeerDirectLocal,
    RelayPeer,
    DirectLocal,
    Reflexive,
    ViaRelay,
    #[default]
    None,
}

pub(crate) struct BuildInput<'a> {
    pub device: &'a Device,
    pub local_endpoint: Option<&'a str>,
    pub reflexive_endpoint: Option<&'a str>,
    /// The VPC IPv4 and IPv6 prefixes, in that order.
    pub vpc_prefixes: &'a [IpNetwork; 2],
}

pub(crate) struct PeerMethod {
    pub name: PeeringMethod,
    /// Whether this method is available for the given peer.
    pub prereqs: fn(&LocalNode, &Device, Option<&str>, bool) -> bool,
    pub build: fn(&BuildInput<'_>) -> PeerConfig,
}

/// The method ladder.
///
/// Every peer walks this list from the top; the engine only ever moves a
/// peer downwards until a reset sends it back to the start.
pub(crate) const METHODS: [PeerMethod; 7] = [
    PeerMethod {
        // We are the relay and share a reflexive address with the peer.
        name: PeeringMethod::RelaySelfDirectLocal,
        prereqs: |local, _, reflexive, _| local.relay && same_reflexive(local, reflexive),
        build: |input| direct_peer(input.device, input.local_endpoint),
    },
    PeerMethod {
        // We are the relay.
        name: PeeringMethod::RelaySelf,
        prereqs: |local, _, _, _| local.relay,
        build: |input| direct_peer(input.device, input.reflexive_endpoint),
    },
    PeerMethod {
        // The peer is the relay and we share a reflexive address with it.
        name: PeeringMethod::RelayPeerDirectLocal,
        prereqs: |local, device, reflexive, _| {
            !local.relay && device.relay && same_reflexive(local, reflexive)
        },
        build: |input| relay_peer(input.device, input.local_endpoint, input.vpc_prefixes),
    },
    PeerMethod {
        // The peer is the relay.
        name: PeeringMethod::RelayPeer,
        prereqs: |local, device, _, _| !local.relay && device.relay,
        build: |input| relay_peer(input.device, input.reflexive_endpoint, input.vpc_prefixes),
    },
    PeerMethod {
        // Both sides sit behind the same reflexive address, try the LAN.
        name: PeeringMethod::DirectLocal,
        prereqs: |local, device, reflexive, _| {
            !local.relay && !device.relay && same_reflexive(local, reflexive)
        },
        build: |input| direct_peer(input.device, input.local_endpoint),
    },
    PeerMethod {
        // Neither side is behind symmetric NAT, so the hole punched towards
        // the STUN server is usable.
        name: PeeringMethod::Reflexive,
        prereqs: |local, device, _, _| {
            !local.relay && !device.relay && !device.symmetric_nat && !local.symmetric_nat
        },
        build: |input| direct_peer(input.device, input.reflexive_endpoint),
    },
    PeerMethod {
        // Last resort, reach the peer through the relay.
        name: PeeringMethod::ViaRelay,
        prereqs: |local, device, _, healthy_relay| !local.relay && !device.relay && healthy_relay,
        build: |input| PeerConfig {
            allowed_ips_for_relay: input.device.advertise_cidrs.clone(),
            ..PeerConfig::default()
        },
    },
];

fn same_reflexive(local: &LocalNode, peer_reflexive: Option<&str>) -> bool {
    match (local.reflexive_ipv4, peer_reflexive.and_then(endpoint_host)) {
        (Some(ip), Some(host)) => ip.to_string() == host,
        _ => false,
    }
}

/// The host part of a `host:port` endpoint address, brackets removed.
pub(crate) fn endpoint_host(address: &str) -> Option<&str> {
    let (host, _port) = address.rsplit_once(':')?;

    Some(
        host.strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host),
    )
}

fn direct_peer(device: &Device, endpoint: Option<&str>) -> PeerConfig {
    PeerConfig {
        public_key: device.public_key.clone(),
        endpoint: endpoint.map(ToOwned::to_owned),
        allowed_ips: allowed_ips_with_advertised(device),
        persistent_keepalive: Some(PERSISTENT_KEEPALIVE),
        allowed_ips_for_relay: Vec::new(),
    }
}

/// A relay gets the whole VPC routed through it instead of host routes.
fn relay_peer(device: &Device, endpoint: Option<&str>, vpc_prefixes: &[IpNetwork; 2]) -> PeerConfig {
    PeerConfig {
        public_key: device.public_key.clone(),
        endpoint: endpoint.map(ToOwned::to_owned),
        allowed_ips: vpc_prefixes.to_vec(),
        persistent_keepalive: Some(PERSISTENT_KEEPALIVE),
        allowed_ips_for_relay: Vec::new(),
    }
}

fn allowed_ips_with_advertised(device: &Device) -> Vec<IpNetwork> {
    device
        .allowed_ips
        .iter()
        .chain(device.advertise_cidrs.iter())
        .cloned()
        .collect()
}
