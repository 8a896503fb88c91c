use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lattice_model::{
    Device, DeviceId, DeviceMetadata, OrganizationId, SecurityGroup, SecurityGroupId, WatchKind,
    WatchOptions,
};
use parking_lot::Mutex;

use crate::signalbus::SignalBus;
use crate::store::{EventStore, FETCH_LIMIT, FetchError, WatchRow, WatchSource, topic};

/// In-memory realization of the revision contract.
///
/// Backs the dev server and the test-suite. Every table carries its own
/// monotonically increasing revision counter; mutators bump it, store the
/// row and notify the table's topic after the table lock is released.
#[derive(Default)]
pub struct MemStore {
    tables: Arc<Mutex<Tables>>,
    bus: SignalBus,
}

#[derive(Default)]
struct Tables {
    organizations: BTreeSet<OrganizationId>,
    devices: BTreeMap<DeviceId, Device>,
    device_revision: u64,
    security_groups: BTreeMap<SecurityGroupId, SecurityGroup>,
    security_group_revision: u64,
    metadata: BTreeMap<(DeviceId, String), DeviceMetadata>,
    metadata_revision: u64,
}

impl MemStore {
    pub fn add_organization(&self, org: OrganizationId) {
        self.tables.lock().organizations.insert(org);
    }

    pub fn upsert_device(&self, mut device: Device) -> u64 {
        let org = device.organization_id;
        let revision = {
            let mut tables = self.tables.lock();
            tables.device_revision += 1;
            device.revision = tables.device_revision;
            let revision = device.revision;
            tables.devices.insert(device.id, device);
            revision
        };

        self.bus.notify(&topic(WatchKind::Device, org));

        revision
    }

    /// Soft-deletes a device; the row keeps streaming as a `delete` event.
    pub fn remove_device(&self, id: DeviceId) {
        let org = {
            let mut tables = self.tables.lock();
            if !tables.devices.contains_key(&id) {
                return;
            }

            tables.device_revision += 1;
            let revision = tables.device_revision;
            let device = tables.devices.get_mut(&id).expect("checked above");
            device.revision = revision;
            device.deleted_at = Some(Utc::now());
            device.organization_id
        };

        self.bus.notify(&topic(WatchKind::Device, org));
    }

    pub fn upsert_security_group(&self, mut group: SecurityGroup) -> u64 {
        let org = group.organization_id;
        let revision = {
            let mut tables = self.tables.lock();
            tables.security_group_revision += 1;
            group.revision = tables.security_group_revision;
            let revision = group.revision;
            tables.security_groups.insert(group.id, group);
            revision
        };

        self.bus.notify(&topic(WatchKind::SecurityGroup, org));

        revision
    }

    pub fn remove_security_group(&self, id: SecurityGroupId) {
        let org = {
            let mut tables = self.tables.lock();
            if !tables.security_groups.contains_key(&id) {
                return;
            }

            tables.security_group_revision += 1;
            let revision = tables.security_group_revision;
            let group = tables.security_groups.get_mut(&id).expect("checked above");
            group.revision = revision;
            group.deleted_at = Some(Utc::now());
            group.organization_id
        };

        self.bus.notify(&topic(WatchKind::SecurityGroup, org));
    }

    pub fn put_metadata(&self, device_id: DeviceId, key: &str, value: serde_json::Value) {
        let mut tables = self.tables.lock();
        let Some(org) = tables
            .devices
            .get(&device_id)
            .map(|device| device.organization_id)
        else {
            return;
        };

        tables.metadata_revision += 1;
        let row = DeviceMetadata {
            device_id,
            key: key.to_owned(),
            value,
            revision: tables.metadata_revision,
            deleted_at: None,
        };
        tables.metadata.insert((device_id, key.to_owned()), row);
        drop(tables);

        self.bus.notify(&topic(WatchKind::DeviceMetadata, org));
    }

    pub fn delete_metadata(&self, device_id: DeviceId, key: &str) {
        let mut tables = self.tables.lock();
        let Some(org) = tables
            .devices
            .get(&device_id)
            .map(|device| device.organization_id)
        else {
            return;
        };
        if !tables.metadata.contains_key(&(device_id, key.to_owned())) {
            return;
        }

        tables.metadata_revision += 1;
        let revision = tables.metadata_revision;
        let row = tables
            .metadata
            .get_mut(&(device_id, key.to_owned()))
            .expect("checked above");
        row.revision = revision;
        row.deleted_at = Some(Utc::now());
        drop(tables);

        self.bus.notify(&topic(WatchKind::DeviceMetadata, org));
    }
}

#[async_trait]
impl EventStore for MemStore {
    async fn organization_readable(&self, org: OrganizationId) -> Result<bool, FetchError> {
        Ok(self.tables.lock().organizations.contains(&org))
    }

    fn watch_source(
        &self,
        org: OrganizationId,
        kind: WatchKind,
        options: WatchOptions,
    ) -> Arc<dyn WatchSource> {
        Arc::new(MemSource {
            tables: self.tables.clone(),
            org,
            kind,
            prefixes: options.prefixes,
        })
    }

    fn bus(&self) -> &SignalBus {
        &self.bus
    }
}

struct MemSource {
    tables: Arc<Mutex<Tables>>,
    org: OrganizationId,
    kind: WatchKind,
    prefixes: Vec<String>,
}

#[async_trait]
impl WatchSource for MemSource {
    async fn fetch(&self, gt_revision: u64) -> Result<Vec<WatchRow>, FetchError> {
        let tables = self.tables.lock();

        let mut rows = match self.kind {
            WatchKind::Device => tables
                .devices
                .values()
                .filter(|d| d.organization_id == self.org && d.revision > gt_revision)
                .map(|d| row(d, d.revision, d.deleted_at))
                .collect::<Result<Vec<_>, _>>()?,
            WatchKind::SecurityGroup => tables
                .security_groups
                .values()
                .filter(|g| g.organization_id == self.org && g.revision > gt_revision)
                .map(|g| row(g, g.revision, g.deleted_at))
                .collect::<Result<Vec<_>, _>>()?,
            WatchKind::DeviceMetadata => {
                // Metadata rows join to the device table for their
                // organization scope.
                let org_devices = tables
                    .devices
                    .values()
                    .filter(|d| d.organization_id == self.org)
                    .map(|d| d.id)
                    .collect::<BTreeSet<_>>();

                tables
                    .metadata
                    .values()
                    .filter(|m| org_devices.contains(&m.device_id))
                    .filter(|m| {
                        self.prefixes.is_empty()
                            || self.prefixes.iter().any(|p| m.key.starts_with(p))
                    })
                    .filter(|m| m.revision > gt_revision)
                    .map(|m| row(m, m.revision, m.deleted_at))
                    .collect::<Result<Vec<_>, _>>()?
            }
        };

        rows.sort_by_key(|r| r.revision);
        rows.truncate(FETCH_LIMIT);

        Ok(rows)
    }
}

fn row<T: serde::Serialize>(
    value: &T,
    revision: u64,
    deleted_at: Option<DateTime<Utc>>,
) -> Result<WatchRow, FetchError> {
    Ok(WatchRow {
        value: serde_json::to_value(value).map_err(anyhow::Error::new)?,
        revision,
        deleted_at,
    })
}
