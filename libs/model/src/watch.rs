use serde::{Deserialize, Serialize};

use crate::BaseError;

/// The tables a client can watch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WatchKind {
    Device,
    SecurityGroup,
    DeviceMetadata,
}

/// One element of the `POST .../events` request body.
///
/// `kind` stays a raw string here so an unknown kind can be rejected with a
/// field error naming the offending index instead of failing the whole
/// deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchRequest {
    pub kind: String,
    #[serde(default)]
    pub gt_revision: u64,
    #[serde(default)]
    pub at_tail: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

/// Options understood by `device-metadata` watches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOptions {
    #[serde(default)]
    pub prefixes: Vec<String>,
}

/// One record of the event stream, encoded as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Change {
        kind: WatchKind,
        value: serde_json::Value,
    },
    Delete {
        kind: WatchKind,
        value: serde_json::Value,
    },
    Tail {
        kind: WatchKind,
    },
    Error {
        value: BaseError,
    },
    Close,
}

impl WatchEvent {
    pub fn is_close(&self) -> bool {
        matches!(self, WatchEvent::Close)
    }
}
