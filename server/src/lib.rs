//! The organization event watcher of the lattice control plane.
//!
//! Serves `POST /api/organizations/{organization_id}/events`: a single
//! streaming response multiplexing any number of change watches (devices,
//! security groups, device metadata) over one connection, driven by
//! revision cursors and signal-bus wake-ups.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod events;
pub mod mem;
pub mod signalbus;
pub mod store;
mod watch;
