//! Shared data model for the lattice control plane and agent.
//!
//! Everything that crosses the wire between the server and the agent lives
//! here: device inventory rows, watch requests and events, and the API error
//! envelope.

#![cfg_attr(test, allow(clippy::unwrap_used))]

#[macro_use]
mod make_id;

mod device;
mod error;
mod metadata;
mod security_group;
mod vpc;
mod watch;

pub use device::{Device, Endpoint, PublicKey};
pub use error::BaseError;
pub use metadata::DeviceMetadata;
pub use security_group::{SecurityGroup, SecurityRule};
pub use vpc::Vpc;
pub use watch::{WatchEvent, WatchKind, WatchOptions, WatchRequest};

make_id!(OrganizationId);
make_id!(VpcId);
make_id!(DeviceId);
make_id!(SecurityGroupId);
