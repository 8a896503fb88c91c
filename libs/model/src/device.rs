use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, Utc};
use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::{DeviceId, OrganizationId, SecurityGroupId, VpcId};

/// A wireguard public key, kept in its string encoding.
///
/// Keys are opaque to us; they identify a device and become the map key for
/// everything the agent tracks about a peer.
#[derive(Clone, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PublicKey(String);

impl PublicKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PublicKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One reachable address of a device.
///
/// `source` is `"local"` for the address seen from inside the device's LAN;
/// any other source (typically `"stun"`) is the reflexive address observed
/// from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub source: String,
    pub address: String,
}

impl Endpoint {
    pub const LOCAL: &'static str = "local";

    pub fn local(address: impl Into<String>) -> Self {
        Self {
            source: Self::LOCAL.to_owned(),
            address: address.into(),
        }
    }

    pub fn reflexive(address: impl Into<String>) -> Self {
        Self {
            source: "stun".to_owned(),
            address: address.into(),
        }
    }

    pub fn is_local(&self) -> bool {
        self.source == Self::LOCAL
    }
}

/// A device row as the control plane stores and streams it.
///
/// `revision` increases on every mutation of the device table, including the
/// soft delete that sets `deleted_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub organization_id: OrganizationId,
    pub vpc_id: VpcId,
    pub security_group_id: SecurityGroupId,
    pub public_key: PublicKey,
    pub hostname: String,
    pub os: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    pub tunnel_ipv4: Option<Ipv4Addr>,
    pub tunnel_ipv6: Option<Ipv6Addr>,
    #[serde(default)]
    pub allowed_ips: Vec<IpNetwork>,
    #[serde(default)]
    pub advertise_cidrs: Vec<IpNetwork>,
    #[serde(default)]
    pub relay: bool,
    #[serde(default)]
    pub symmetric_nat: bool,
    pub revision: u64,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_source_is_exact() {
        assert!(Endpoint::local("192.168.1.10:51820").is_local());
        assert!(!Endpoint::reflexive("203.0.113.9:51820").is_local());
        assert!(
            !Endpoint {
                source: "Local".to_owned(),
                address: String::new(),
            }
            .is_local()
        );
    }
}
