//! sysfs probe: sector sizes, rotational flag and capacity.
//!
//! Capacity is always refreshed so resized devices are picked up by change
//! events. Queue attributes of a partition are read from its parent disk.

use crate::domain::{DeviceRecord, DriveType};
use crate::hardware::discovery::{read_sysfs_attr, read_sysfs_u32, HostPaths};
use crate::probe::Probe;
use std::path::PathBuf;
use tracing::debug;

pub const KEY: &str = "sysfs-probe";

/// sysfs `size` is always in 512-byte units
const SYSFS_SECTOR_SIZE: u64 = 512;

pub struct SysfsProbe {
    paths: HostPaths,
}

impl SysfsProbe {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }

    fn sys_path(&self, record: &DeviceRecord) -> PathBuf {
        if record.sys_path.is_empty() {
            self.paths.block_device(record.name())
        } else {
            PathBuf::from(&record.sys_path)
        }
    }

    fn queue_path(&self, record: &DeviceRecord) -> PathBuf {
        if record.is_partition() && !record.dependents.parent.is_empty() {
            let parent = record
                .dependents
                .parent
                .rsplit('/')
                .next()
                .unwrap_or(&record.dependents.parent);
            self.paths.block_device(parent).join("queue")
        } else {
            self.sys_path(record).join("queue")
        }
    }
}

impl Probe for SysfsProbe {
    fn fill_details(&self, record: &mut DeviceRecord) {
        let sys_path = self.sys_path(record);
        match read_sysfs_attr(&sys_path, "size") {
            Ok(size) => match size.trim().parse::<u64>() {
                Ok(sectors) => record.attributes.capacity = sectors * SYSFS_SECTOR_SIZE,
                Err(e) => debug!(device = %record.dev_path, "invalid size {:?}: {}", size.trim(), e),
            },
            Err(e) => debug!(device = %record.dev_path, "{}", e),
        }

        let queue = self.queue_path(record);
        let attrs = &mut record.attributes;
        if attrs.logical_block_size == 0 {
            attrs.logical_block_size = read_sysfs_u32(&queue, "logical_block_size").unwrap_or(0);
        }
        if attrs.physical_block_size == 0 {
            attrs.physical_block_size = read_sysfs_u32(&queue, "physical_block_size").unwrap_or(0);
        }
        if attrs.hardware_sector_size == 0 {
            attrs.hardware_sector_size = read_sysfs_u32(&queue, "hw_sector_size").unwrap_or(0);
        }
        if attrs.drive_type == DriveType::Unknown {
            if let Ok(rotational) = read_sysfs_attr(&queue, "rotational") {
                attrs.drive_type = DriveType::from_rotational(&rotational);
            }
        }
    }
}
