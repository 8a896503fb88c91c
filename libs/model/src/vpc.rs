use ip_network::{Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};

use crate::{OrganizationId, VpcId};

/// The prefixes tunnel addresses are allocated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: VpcId,
    pub organization_id: OrganizationId,
    pub description: String,
    #[serde(default)]
    pub private_cidr: bool,
    pub ipv4_cidr: Ipv4Network,
    pub ipv6_cidr: Ipv6Network,
}
