use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrganizationId, SecurityGroupId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub ip_protocol: String,
    pub from_port: u32,
    pub to_port: u32,
    #[serde(default)]
    pub ip_ranges: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: SecurityGroupId,
    pub organization_id: OrganizationId,
    pub description: String,
    #[serde(default)]
    pub inbound_rules: Vec<SecurityRule>,
    #[serde(default)]
    pub outbound_rules: Vec<SecurityRule>,
    pub revision: u64,
    pub deleted_at: Option<DateTime<Utc>>,
}
