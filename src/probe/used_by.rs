//! used-by probe: detects devices already owned by a known storage engine.
//!
//! Checked in order, first match wins:
//! 1. mounted under a Kubernetes local volume path: localpv
//! 2. ZFS member label on the device (or on the data partition of a disk
//!    laid out by zpool): zfs-localpv when the kernel holds the device
//!    exclusively, cstor otherwise
//! 3. SPDK blobstore superblock: mayastor

use crate::domain::{DeviceRecord, DeviceUsage, UsedBy};
use crate::hardware::discovery::{has_spdk_signature, is_in_use_by_kernel, SysfsScanner};
use crate::probe::Probe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error};

pub const KEY: &str = "used-by-probe";

const LOCAL_VOLUME_PATHS: &[&str] = &["kubernetes.io/local-volume", "kubernetes.io~local-volume"];
const ZFS_FS_TYPE: &str = "zfs_member";

pub struct UsedByProbe {
    scanner: Arc<SysfsScanner>,
}

/// Data partition of a zpool-labelled disk
struct ZfsPartition {
    fs_type: String,
    entry_uuid: String,
}

impl UsedByProbe {
    pub fn new(scanner: Arc<SysfsScanner>) -> Self {
        Self { scanner }
    }

    /// Kernel names of the data and metadata partitions zpool creates
    pub fn zfs_partition_names(name: &str) -> (String, String) {
        let infix = if name.ends_with(|c: char| c.is_ascii_digit()) {
            "p"
        } else {
            ""
        };
        (format!("{}{}1", name, infix), format!("{}{}9", name, infix))
    }

    fn zfs_data_partition(&self, record: &DeviceRecord) -> Option<ZfsPartition> {
        if record.dependents.partitions.len() != 2 {
            return None;
        }
        let (data, meta) = Self::zfs_partition_names(record.name());
        let dir = record
            .dev_path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .unwrap_or("");
        let data_path = format!("{}/{}", dir, data);
        let meta_path = format!("{}/{}", dir, meta);
        if record.dependents.partitions[0] != data_path || record.dependents.partitions[1] != meta_path {
            return None;
        }

        match self.scanner.scan_device(&data) {
            Ok(part) => Some(ZfsPartition {
                fs_type: part.filesystem.fs_type,
                entry_uuid: part.partition.entry_uuid,
            }),
            Err(e) => {
                debug!(device = %data_path, "unable to read zfs data partition: {}", e);
                None
            }
        }
    }

    fn zfs_usage(&self, record: &mut DeviceRecord) -> Option<UsedBy> {
        let fs_type = if record.is_partition() {
            record.filesystem.fs_type.clone()
        } else {
            let partition = self.zfs_data_partition(record)?;
            if partition.fs_type == ZFS_FS_TYPE {
                // Keeps the data partition's identity reachable from the disk
                record.partition.entry_uuid = partition.entry_uuid;
            }
            partition.fs_type
        };
        if fs_type != ZFS_FS_TYPE {
            return None;
        }

        let exclusive = is_in_use_by_kernel(Path::new(&record.dev_path)).unwrap_or_else(|e| {
            error!(device = %record.dev_path, "exclusive open check failed: {}", e);
            false
        });
        Some(if exclusive {
            UsedBy::ZfsLocalPv
        } else {
            UsedBy::Cstor
        })
    }
}

impl Probe for UsedByProbe {
    fn fill_details(&self, record: &mut DeviceRecord) {
        if record.dev_path.is_empty() {
            error!("device path is empty, used-by probe skipped");
            return;
        }
        record.dev_use = DeviceUsage::default();

        let used_by = if record
            .filesystem
            .mount_points
            .iter()
            .any(|mp| LOCAL_VOLUME_PATHS.iter().any(|p| mp.contains(p)))
        {
            Some(UsedBy::LocalPv)
        } else if let Some(zfs) = self.zfs_usage(record) {
            Some(zfs)
        } else {
            match has_spdk_signature(Path::new(&record.dev_path)) {
                Ok(true) => Some(UsedBy::Mayastor),
                Ok(false) => None,
                Err(e) => {
                    debug!(device = %record.dev_path, "spdk signature unreadable: {}", e);
                    None
                }
            }
        };

        if let Some(used_by) = used_by {
            debug!(device = %record.dev_path, used_by = %used_by, "device in use");
            record.dev_use = DeviceUsage {
                in_use: true,
                used_by: Some(used_by),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeviceType;
    use crate::hardware::discovery::scanner::testutil::FakeHost;
    use std::io::Write;

    fn probe(host: &FakeHost) -> UsedByProbe {
        UsedByProbe::new(Arc::new(SysfsScanner::with_paths(host.paths.clone())))
    }

    #[test]
    fn test_zfs_partition_names() {
        assert_eq!(
            UsedByProbe::zfs_partition_names("sdb"),
            ("sdb1".to_string(), "sdb9".to_string())
        );
        assert_eq!(
            UsedByProbe::zfs_partition_names("nvme0n1"),
            ("nvme0n1p1".to_string(), "nvme0n1p9".to_string())
        );
    }

    #[test]
    fn test_local_pv_mount() {
        let host = FakeHost::new();
        let mut record = DeviceRecord::new("/dev/sdb");
        record.filesystem.mount_points =
            vec!["/var/lib/kubelet/pods/1/volumes/kubernetes.io~local-volume/pv-1".into()];

        probe(&host).fill_details(&mut record);
        assert!(record.dev_use.in_use);
        assert_eq!(record.dev_use.used_by, Some(UsedBy::LocalPv));
    }

    #[test]
    fn test_zfs_disk_layout_marks_cstor() {
        let host = FakeHost::new();
        host.add_disk("sdb", 4096, (8, 16));
        host.add_partition("sdb", "sdb1", 2048, (8, 17));
        host.add_partition("sdb", "sdb9", 16, (8, 25));
        host.write_udev((8, 17), "E:ID_FS_TYPE=zfs_member\nE:ID_PART_ENTRY_UUID=data-1\n");

        let mut record = DeviceRecord::new("/nonexistent/sdb");
        record.attributes.device_type = DeviceType::Disk;
        record.dependents.partitions = vec!["/nonexistent/sdb1".into(), "/nonexistent/sdb9".into()];

        // The node cannot be opened, so nothing holds it exclusively and the
        // device is attributed to cstor
        probe(&host).fill_details(&mut record);
        assert_eq!(record.dev_use.used_by, Some(UsedBy::Cstor));
        assert_eq!(record.partition.entry_uuid, "data-1");
    }

    #[test]
    fn test_spdk_signature_marks_mayastor() {
        let host = FakeHost::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"SPDKBLOB").unwrap();
        file.flush().unwrap();

        let mut record = DeviceRecord::new(file.path().to_str().unwrap());
        probe(&host).fill_details(&mut record);
        assert_eq!(record.dev_use.used_by, Some(UsedBy::Mayastor));
    }

    #[test]
    fn test_unused_device() {
        let host = FakeHost::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut record = DeviceRecord::new(file.path().to_str().unwrap());
        record.dev_use.in_use = true;

        probe(&host).fill_details(&mut record);
        assert_eq!(record.dev_use, DeviceUsage::default());
    }
}
