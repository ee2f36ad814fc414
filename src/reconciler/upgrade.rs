//! Legacy identity upgrade
//!
//! Devices already in use by cstor or local PV may still be published under
//! the legacy identity. Those resources are kept and annotated instead of
//! being recreated under the current scheme.

use crate::crd::{FS_UUID_ANNOTATION, LEGACY_UUID_SCHEME, PARTITION_UUID_ANNOTATION, UUID_SCHEME_ANNOTATION};
use crate::domain::{DeviceRecord, UsedBy};
use crate::error::Result;
use crate::reconciler::Controller;
use tracing::{debug, info};

/// Outcome of the upgrade check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upgrade {
    /// Nothing to migrate, continue with the regular add flow
    Continue,
    /// The device was dealt with here
    Handled,
}

impl Controller {
    pub(crate) async fn upgrade_check(&self, record: &DeviceRecord) -> Result<Upgrade> {
        if record.is_partition() {
            if let Some(parent) = self.hierarchy.parent_of(record) {
                if parent.dev_use.in_use {
                    debug!(device = %record.dev_path, parent = %parent.dev_path, "parent in use, ignoring partition");
                    return Ok(Upgrade::Handled);
                }
            }
        }

        if !record.dev_use.in_use {
            return Ok(Upgrade::Continue);
        }

        let legacy = self.resolver.resolve_legacy(record);
        debug!(device = %record.dev_path, legacy_uuid = %legacy.uuid, "device in use, checking legacy identity");

        if let Some(existing) = self.inventory.get(&legacy.uuid).await? {
            let mut legacy_record = record.clone();
            legacy_record.uuid = legacy.uuid.clone();
            let mut device = self.resource_for(&legacy_record);
            device.set_annotation(UUID_SCHEME_ANNOTATION, LEGACY_UUID_SCHEME);
            match record.dev_use.used_by {
                Some(UsedBy::LocalPv) if !record.filesystem.uuid.is_empty() => {
                    device.set_annotation(FS_UUID_ANNOTATION, &record.filesystem.uuid);
                }
                Some(UsedBy::Cstor) if !record.partition.entry_uuid.is_empty() => {
                    device.set_annotation(PARTITION_UUID_ANNOTATION, &record.partition.entry_uuid);
                }
                _ => {}
            }
            info!(device = %record.dev_path, uuid = %legacy.uuid, "keeping legacy identity for device in use");
            self.inventory.push(&device, Some(existing)).await?;
            return Ok(Upgrade::Handled);
        }

        if let Some(uuid) = self.resolver.resolve(record) {
            if self.inventory.get(&uuid).await?.is_some() {
                debug!(device = %record.dev_path, uuid = %uuid, "device uses the current identity scheme");
                return Ok(Upgrade::Continue);
            }
            // In use, but neither identity is published: not ours to create
            debug!(device = %record.dev_path, "in-use device has no resource, skipping");
            return Ok(Upgrade::Handled);
        }

        if legacy.uses_path {
            info!(device = %record.dev_path, uuid = %legacy.uuid, "publishing virtual device under legacy identity");
            let mut legacy_record = record.clone();
            legacy_record.uuid = legacy.uuid;
            let mut device = self.resource_for(&legacy_record);
            device.set_annotation(UUID_SCHEME_ANNOTATION, LEGACY_UUID_SCHEME);
            self.inventory.create(&device).await?;
        }
        Ok(Upgrade::Handled)
    }
}
