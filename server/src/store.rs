use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lattice_model::{OrganizationId, WatchKind, WatchOptions};

use crate::signalbus::SignalBus;

/// Upper bound on rows returned by a single fetch.
pub const FETCH_LIMIT: usize = 100;

/// One row of a watchable table, ready to stream.
///
/// `value` is the row as it goes on the wire; `revision` and `deleted_at`
/// are duplicated out of it so the multiplexer doesn't have to understand
/// the row shape.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchRow {
    pub value: serde_json::Value,
    pub revision: u64,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to fetch watch rows: {0}")]
pub struct FetchError(#[from] anyhow::Error);

/// An incremental read of one watchable table.
#[async_trait]
pub trait WatchSource: Send + Sync {
    /// At most [`FETCH_LIMIT`] rows with revision greater than
    /// `gt_revision`, in ascending revision order. Soft-deleted rows are
    /// included; as the cursor advances, results are disjoint.
    async fn fetch(&self, gt_revision: u64) -> Result<Vec<WatchRow>, FetchError>;
}

/// The storage backend of the events endpoint.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Whether the organization exists and the caller may read it.
    async fn organization_readable(&self, org: OrganizationId) -> Result<bool, FetchError>;

    fn watch_source(
        &self,
        org: OrganizationId,
        kind: WatchKind,
        options: WatchOptions,
    ) -> Arc<dyn WatchSource>;

    fn bus(&self) -> &SignalBus;
}

/// The signal-bus topic mutators of `kind` notify after commit.
pub fn topic(kind: WatchKind, org: OrganizationId) -> String {
    match kind {
        WatchKind::Device => format!("/devices/org={org}"),
        WatchKind::SecurityGroup => format!("/security-groups/org={org}"),
        WatchKind::DeviceMetadata => format!("/metadata/org={org}"),
    }
}
