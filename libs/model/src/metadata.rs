use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceId;

/// A single key/value pair attached to a device.
///
/// Keys are namespaced by convention (`"proxy.443"`, `"dns.zone"`, ...) which
/// is what the prefix filter on metadata watches cuts across.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub device_id: DeviceId,
    pub key: String,
    pub value: serde_json::Value,
    pub revision: u64,
    pub deleted_at: Option<DateTime<Utc>>,
}
