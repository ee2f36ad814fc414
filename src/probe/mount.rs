//! mount probe: mount points and filesystem type from the host mount table.
//!
//! Mount points are replaced on every run; a device may have been unmounted
//! since the previous pass.

use crate::domain::{fill_if_empty, DeviceRecord};
use crate::hardware::discovery::{HostPaths, MountTable};
use crate::probe::Probe;
use tracing::debug;

pub const KEY: &str = "mount-probe";

pub struct MountProbe {
    paths: HostPaths,
}

impl MountProbe {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }

    /// Apply a mount table snapshot to a record
    pub fn apply(table: &MountTable, record: &mut DeviceRecord) {
        let mut mount_points = table.mount_points(&record.dev_path);
        let mapper_path = record.device_mapper.mapper_path.clone();
        if !mapper_path.is_empty() {
            mount_points.extend(table.mount_points(&mapper_path));
        }
        record.filesystem.mount_points = mount_points;

        let fs_type = table
            .fs_type(&record.dev_path)
            .or_else(|| table.fs_type(&mapper_path))
            .unwrap_or("");
        fill_if_empty(&mut record.filesystem.fs_type, fs_type);
    }
}

impl Probe for MountProbe {
    fn fill_details(&self, record: &mut DeviceRecord) {
        match MountTable::read_host(&self.paths) {
            Ok(table) => Self::apply(&table, record),
            Err(e) => debug!(device = %record.dev_path, "mount table unavailable: {}", e),
        }
    }
}
