//! Add handler
//!
//! Handles attach events and the add event queued by every full scan.

use crate::crd::ClaimState;
use crate::domain::{DeviceRecord, Disk, UsedBy};
use crate::error::{Error, Result};
use crate::reconciler::upgrade::Upgrade;
use crate::reconciler::Controller;
use tracing::{debug, error, info, instrument, warn};

impl Controller {
    /// Enrich, cache, filter and publish every device of an add event
    #[instrument(skip(self, devices, probes), fields(devices = devices.len()))]
    pub async fn handle_add_event(&self, devices: Vec<DeviceRecord>, probes: &[String]) {
        // The store must be reachable before anything is written
        if let Err(e) = self.inventory.list(true).await {
            error!("unable to list BlockDevices: {}", e);
            self.request_rescan();
            return;
        }

        let subset = if probes.is_empty() { None } else { Some(probes) };
        let gpt_based_uuid = self.gpt_based_uuid();
        let mut errored: Vec<String> = Vec::new();
        let mut need_rescan = false;

        for mut record in devices {
            info!(device = %record.dev_path, "processing device details");
            self.probes.fill_details(&mut record, subset);

            // Cache every device, filtered or not, so the hierarchy stays whole
            self.hierarchy.add_or_update(record.clone());

            if !self.filters.apply_filters(&record) {
                continue;
            }

            if !gpt_based_uuid {
                if record.is_partition() {
                    debug!(device = %record.dev_path, "GPTBasedUUID disabled, skipping partition");
                    continue;
                }
                if let Err(e) = self.push_legacy(record).await {
                    error!("unable to publish device: {}", e);
                    need_rescan = true;
                }
                continue;
            }

            if errored.contains(&record.dependents.parent)
                || record.dependents.slaves.iter().any(|s| errored.contains(s))
            {
                warn!(device = %record.dev_path, "skipped, a parent or slave device has errored");
                continue;
            }

            let path = record.dev_path.clone();
            if let Err(e) = self.add_block_device(record).await {
                error!(device = %path, "unable to add device: {}", e);
                errored.push(path);
                if e.is_retryable() {
                    need_rescan = true;
                }
            }
        }

        if need_rescan {
            self.request_rescan();
        }
    }

    /// Publish a device under the legacy identity only
    async fn push_legacy(&self, mut record: DeviceRecord) -> Result<()> {
        record.uuid = self.resolver.resolve_legacy(&record).uuid;
        let old = self.inventory.get(&record.uuid).await?;
        self.inventory.push(&self.resource_for(&record), old).await
    }

    /// Reconcile one filtered device under the current identity scheme
    #[instrument(skip(self, record), fields(device = %record.dev_path))]
    pub async fn add_block_device(&self, mut record: DeviceRecord) -> Result<()> {
        if record.dev_use.in_use {
            match record.dev_use.used_by {
                Some(UsedBy::ZfsLocalPv) => return self.push_zfs_localpv(record).await,
                Some(UsedBy::Mayastor) => return self.refresh_in_use(record).await,
                _ => {}
            }
        }

        if self.upgrade_check(&record).await? == Upgrade::Handled {
            debug!("device handled by the upgrade check");
            return Ok(());
        }

        let Some(uuid) = self.resolver.resolve(&record) else {
            debug!("device cannot be uniquely identified");
            if record.has_partitions() || record.has_holders() {
                debug!(
                    partitions = ?record.dependents.partitions,
                    holders = ?record.dependents.holders,
                    "device has partitions or holders, waiting for them"
                );
                return Ok(());
            }
            info!("creating partition on device");
            self.partitioner.create_single_partition(&Disk::from_record(&record))?;
            info!("created new partition");
            return Ok(());
        };
        record.uuid = uuid;

        match self.inventory.get(&record.uuid).await? {
            Some(existing) => {
                if existing.is_claimed() {
                    debug!(uuid = %record.uuid, "device is claimed, updating details only");
                }
                self.inventory.push(&self.resource_for(&record), Some(existing)).await
            }
            None if record.is_partition() => self.add_partition(record).await,
            None if record.has_partitions() => {
                debug!(partitions = ?record.dependents.partitions, "device has partitions, not publishing");
                Ok(())
            }
            None => self.create_if_no_holders(record).await,
        }
    }

    /// New partition: ownership moves down from an unclaimed parent
    async fn add_partition(&self, record: DeviceRecord) -> Result<()> {
        let parent = self
            .hierarchy
            .parent_of(&record)
            .ok_or_else(|| Error::ParentNotFound {
                device: record.dev_path.clone(),
            })?;

        let Some(parent_uuid) = self.resolver.resolve(&parent) else {
            debug!(parent = %parent.dev_path, "parent cannot be identified");
            return self.create_if_no_holders(record).await;
        };
        let Some(parent_device) = self.inventory.get(&parent_uuid).await? else {
            debug!(parent = %parent.dev_path, uuid = %parent_uuid, "parent is not published");
            return self.create_if_no_holders(record).await;
        };

        if parent_device.claim_state() != ClaimState::Unclaimed {
            debug!(parent = %parent.dev_path, "parent is claimed, ignoring partition");
            return Ok(());
        }

        info!(parent = %parent_uuid, uuid = %record.uuid, "moving ownership from disk to partition");
        self.inventory.deactivate(&parent_device).await;
        let old = self.inventory.get(&record.uuid).await?;
        self.inventory.push(&self.resource_for(&record), old).await
    }

    async fn create_if_no_holders(&self, record: DeviceRecord) -> Result<()> {
        if record.has_holders() {
            debug!(holders = ?record.dependents.holders, "device has holders, not publishing");
            return Ok(());
        }
        info!(uuid = %record.uuid, "publishing device");
        let old = self.inventory.get(&record.uuid).await?;
        self.inventory.push(&self.resource_for(&record), old).await
    }

    /// zfs-localpv disks are published under their partition table identity
    async fn push_zfs_localpv(&self, mut record: DeviceRecord) -> Result<()> {
        if record.is_partition() {
            let parent_in_zfs = self
                .hierarchy
                .parent_of(&record)
                .map_or(false, |p| p.dev_use.used_by == Some(UsedBy::ZfsLocalPv));
            if parent_in_zfs {
                debug!("partition of a zfs-localpv disk, skipping");
                return Ok(());
            }
        }
        let Some(uuid) = self.resolver.resolve_from_partition_table(&record) else {
            warn!("zfs-localpv device without partition table UUID");
            return Ok(());
        };
        record.uuid = uuid;
        let old = self.inventory.get(&record.uuid).await?;
        self.inventory.push(&self.resource_for(&record), old).await
    }

    /// Devices owned by mayastor are only refreshed, never created
    async fn refresh_in_use(&self, mut record: DeviceRecord) -> Result<()> {
        let Some(uuid) = self.resolver.resolve(&record) else {
            return Ok(());
        };
        record.uuid = uuid;
        if let Some(existing) = self.inventory.get(&record.uuid).await? {
            self.inventory.update(&self.resource_for(&record), Some(existing)).await?;
        }
        Ok(())
    }
}
