//! Change handler
//!
//! Re-probes devices whose attributes may have changed (resize, new
//! filesystem, mount/umount) and refreshes their resources.

use crate::domain::DeviceRecord;
use crate::error::{Error, Result};
use crate::reconciler::Controller;
use std::collections::BTreeSet;
use tracing::{debug, error, info, instrument};

impl Controller {
    #[instrument(skip(self, devices, probes), fields(devices = devices.len()))]
    pub async fn handle_change_event(
        &self,
        devices: Vec<DeviceRecord>,
        probes: &[String],
        all_devices: bool,
    ) {
        let targets: Vec<DeviceRecord> = if all_devices {
            self.hierarchy.snapshot()
        } else {
            devices
                .into_iter()
                .filter_map(|device| {
                    let cached = self.hierarchy.lookup(&device.dev_path);
                    if cached.is_none() {
                        debug!(device = %device.dev_path, "changed device not in cache, skipping");
                    }
                    cached
                })
                .collect()
        };

        let subset = if probes.is_empty() { None } else { Some(probes) };
        for cached in targets {
            let path = cached.dev_path.clone();
            if let Err(e) = self.change_device(cached, subset).await {
                error!(device = %path, "unable to apply change: {}", e);
            }
        }
    }

    /// Refresh one cached device; untouched when nothing visible changed
    async fn change_device(&self, cached: DeviceRecord, subset: Option<&[String]>) -> Result<()> {
        let mut record = cached.clone();
        self.probes.fill_details(&mut record, subset);

        if record.uuid.is_empty() {
            record.uuid = self.resolver.resolve(&record).ok_or_else(|| Error::Unidentifiable {
                device: record.dev_path.clone(),
            })?;
        }

        if !has_changed(&cached, &record) {
            debug!(device = %record.dev_path, "no change in device details");
            return Ok(());
        }

        self.hierarchy.add_or_update(record.clone());
        if !self.filters.apply_filters(&record) {
            return Ok(());
        }

        info!(device = %record.dev_path, uuid = %record.uuid, "device details changed, updating");
        self.inventory.update(&self.resource_for(&record), None).await?;
        Ok(())
    }
}

fn has_changed(old: &DeviceRecord, new: &DeviceRecord) -> bool {
    let mounts = |r: &DeviceRecord| r.filesystem.mount_points.iter().cloned().collect::<BTreeSet<_>>();
    old.attributes.capacity != new.attributes.capacity
        || old.filesystem.fs_type != new.filesystem.fs_type
        || mounts(old) != mounts(new)
}
