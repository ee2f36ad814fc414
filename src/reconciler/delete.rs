//! Remove handler
//!
//! Detached devices are never deleted from the store, only deactivated, so
//! a claim survives the device being unplugged and plugged back in.

use crate::crd::{BlockDevice, FS_UUID_ANNOTATION, PARTITION_UUID_ANNOTATION};
use crate::domain::DeviceRecord;
use crate::error::Result;
use crate::reconciler::Controller;
use tracing::{debug, error, info, instrument, warn};

impl Controller {
    #[instrument(skip(self, devices), fields(devices = devices.len()))]
    pub async fn handle_remove_event(&self, devices: Vec<DeviceRecord>) {
        let gpt_based_uuid = self.gpt_based_uuid();
        let mut need_rescan = false;

        for device in devices {
            // The cache holds the enriched record; the event may only carry a path
            let record = self.hierarchy.lookup(&device.dev_path).unwrap_or(device);
            self.hierarchy.remove(&record.dev_path);

            let outcome = if gpt_based_uuid {
                self.deactivate_removed(&record).await
            } else if record.is_partition() {
                debug!(device = %record.dev_path, "GPTBasedUUID disabled, skipping partition");
                continue;
            } else {
                let uuid = self.resolver.resolve_legacy(&record).uuid;
                self.inventory.deactivate_by_uuid(&uuid).await
            };

            match outcome {
                Ok(true) => {}
                Ok(false) => {
                    warn!(device = %record.dev_path, "no resource found for removed device");
                    if !gpt_based_uuid {
                        need_rescan = true;
                    }
                }
                Err(e) => {
                    error!(device = %record.dev_path, "unable to deactivate removed device: {}", e);
                    need_rescan = true;
                }
            }
        }

        if need_rescan {
            self.request_rescan();
        }
    }

    /// Deactivate the first resource found under any identity the device may
    /// have been published with
    async fn deactivate_removed(&self, record: &DeviceRecord) -> Result<bool> {
        let Some(device) = self.find_removed(record).await? else {
            return Ok(false);
        };
        info!(device = %record.dev_path, uuid = %device.uuid(), "deactivating removed device");
        self.inventory.deactivate(&device).await;
        Ok(true)
    }

    async fn find_removed(&self, record: &DeviceRecord) -> Result<Option<BlockDevice>> {
        if let Some(uuid) = self.resolver.resolve(record) {
            if let Some(device) = self.inventory.get(&uuid).await? {
                return Ok(Some(device));
            }
        }
        if let Some(uuid) = self.resolver.resolve_from_partition_table(record) {
            if let Some(device) = self.inventory.get(&uuid).await? {
                return Ok(Some(device));
            }
        }
        if let Some(device) = self
            .inventory
            .find_by_annotation(FS_UUID_ANNOTATION, &record.filesystem.uuid)
            .await?
        {
            return Ok(Some(device));
        }
        if !record.is_partition() {
            if let Some(device) = self
                .inventory
                .find_by_annotation(PARTITION_UUID_ANNOTATION, &record.partition.entry_uuid)
                .await?
            {
                return Ok(Some(device));
            }
        }
        let legacy = self.resolver.resolve_legacy(record).uuid;
        self.inventory.get(&legacy).await
    }
}
