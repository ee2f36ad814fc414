//! Block Device Scanner
//!
//! Enumerates block devices from sysfs, works out their place in the
//! disk/partition/holder hierarchy and seeds identity fields from the udev
//! database.

use crate::domain::{DeviceRecord, DeviceSource, DeviceType};
use crate::error::{Error, Result};
use crate::hardware::discovery::{HostPaths, UdevEntry};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

// =============================================================================
// Scanner Configuration
// =============================================================================

/// Configuration for the sysfs scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Include RAM disks
    pub include_ram: bool,
    /// Host locations to read
    pub paths: HostPaths,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            include_ram: false,
            paths: HostPaths::default(),
        }
    }
}

// =============================================================================
// Sysfs Scanner
// =============================================================================

/// Scans `/sys/class/block` for block devices
pub struct SysfsScanner {
    config: ScannerConfig,
}

impl SysfsScanner {
    /// Create a new scanner
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn with_paths(paths: HostPaths) -> Self {
        Self::new(ScannerConfig {
            paths,
            ..Default::default()
        })
    }

    pub fn paths(&self) -> &HostPaths {
        &self.config.paths
    }

    /// Build the raw record of one device by kernel name
    pub fn scan_device(&self, name: &str) -> Result<DeviceRecord> {
        let paths = &self.config.paths;
        let sys_path = paths.block_device(name);
        if !sys_path.exists() {
            return Err(Error::DeviceNotFound {
                device: name.to_string(),
            });
        }

        let mut record = DeviceRecord::new(paths.dev_node(name));
        record.sys_path = sys_path.to_string_lossy().to_string();
        record.attributes.device_type = self.detect_device_type(name, &sys_path);

        if let Ok(size) = read_sysfs_attr(&sys_path, "size") {
            record.attributes.capacity = sectors_to_bytes(&size);
        }

        if record.is_partition() {
            record.dependents.parent = self
                .parent_disk(name)
                .map(|parent| paths.dev_node(&parent))
                .unwrap_or_default();
        } else {
            record.dependents.partitions = self
                .partitions_of(&sys_path, name)
                .iter()
                .map(|p| paths.dev_node(p))
                .collect();
        }
        record.dependents.holders = list_dir_names(&sys_path.join("holders"))
            .iter()
            .map(|h| paths.dev_node(h))
            .collect();
        record.dependents.slaves = list_dir_names(&sys_path.join("slaves"))
            .iter()
            .map(|s| paths.dev_node(s))
            .collect();

        match device_number(&sys_path) {
            Some((major, minor)) => match UdevEntry::read(&paths.udev_data, major, minor) {
                Ok(entry) => entry.apply(&mut record, &paths.dev.to_string_lossy()),
                Err(e) => debug!(device = %record.dev_path, "no udev data: {}", e),
            },
            None => debug!(device = %record.dev_path, "no device number in sysfs"),
        }

        Ok(record)
    }

    /// Kernel name of the disk a partition belongs to
    pub fn parent_disk(&self, name: &str) -> Option<String> {
        let sys_path = self.config.paths.block_device(name);
        if !sys_path.join("partition").exists() {
            return None;
        }
        let resolved = fs::canonicalize(&sys_path).ok()?;
        resolved
            .parent()?
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }

    fn partitions_of(&self, sys_path: &Path, name: &str) -> Vec<String> {
        let mut parts: Vec<String> = list_dir_names(sys_path)
            .into_iter()
            .filter(|entry| entry.starts_with(name) && sys_path.join(entry).join("partition").exists())
            .collect();
        parts.sort();
        parts
    }

    fn detect_device_type(&self, name: &str, sys_path: &Path) -> DeviceType {
        if sys_path.join("partition").exists() {
            return DeviceType::Partition;
        }
        if name.starts_with("loop") {
            return DeviceType::Loop;
        }
        if name.starts_with("dm-") {
            // Refined from the DM UUID once udev data is applied
            return DeviceType::Dm;
        }
        match read_uevent(sys_path, "DEVTYPE") {
            Some(devtype) => DeviceType::from_devtype(&devtype),
            None => DeviceType::Disk,
        }
    }

    /// Check if a device should be included
    fn should_include_device(&self, name: &str) -> bool {
        // Skip RAM disks
        if !self.config.include_ram && name.starts_with("ram") {
            return false;
        }

        // Skip zram and floppies
        !(name.starts_with("zram") || name.starts_with("fd"))
    }
}

impl DeviceSource for SysfsScanner {
    fn enumerate(&self) -> Result<Vec<DeviceRecord>> {
        let block_path = self.config.paths.class_block();
        if !block_path.exists() {
            return Err(Error::HardwareDiscovery(format!(
                "Block device sysfs not found at {}",
                block_path.display()
            )));
        }

        let mut names: Vec<String> = list_dir_names(&block_path)
            .into_iter()
            .filter(|n| self.should_include_device(n))
            .collect();
        names.sort();

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            match self.scan_device(&name) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping block device {}: {}", name, e),
            }
        }

        info!("Found {} block devices in sysfs", records.len());
        Ok(records)
    }
}

// =============================================================================
// Sysfs Helpers
// =============================================================================

/// Read a sysfs attribute
pub fn read_sysfs_attr(base_path: &Path, attr: &str) -> Result<String> {
    let path = base_path.join(attr);
    fs::read_to_string(&path).map_err(|e| {
        Error::HardwareDiscovery(format!("Failed to read {}: {}", path.display(), e))
    })
}

/// Read a numeric sysfs attribute, `None` when missing or unparsable
/// Bytes for a sysfs `size` value, which counts 512-byte sectors
/// regardless of the logical size. Corrupt values saturate instead of wrapping.
pub fn sectors_to_bytes(size: &str) -> u64 {
    size.trim().parse::<u64>().unwrap_or(0).saturating_mul(512)
}

pub fn read_sysfs_u32(base_path: &Path, attr: &str) -> Option<u32> {
    read_sysfs_attr(base_path, attr).ok()?.trim().parse().ok()
}

fn read_uevent(sys_path: &Path, key: &str) -> Option<String> {
    let uevent = read_sysfs_attr(sys_path, "uevent").ok()?;
    uevent.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k == key).then(|| v.to_string())
    })
}

/// Major and minor number from the `dev` attribute, or from uevent
pub fn device_number(sys_path: &Path) -> Option<(u32, u32)> {
    if let Ok(dev) = read_sysfs_attr(sys_path, "dev") {
        let (major, minor) = dev.trim().split_once(':')?;
        return Some((major.parse().ok()?, minor.parse().ok()?));
    }
    let major = read_uevent(sys_path, "MAJOR")?.parse().ok()?;
    let minor = read_uevent(sys_path, "MINOR")?.parse().ok()?;
    Some((major, minor))
}

fn list_dir_names(path: &Path) -> Vec<String> {
    fs::read_dir(path)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::testutil::FakeHost;
    use super::*;

    #[test]
    fn test_enumerate_hierarchy() {
        let host = FakeHost::new();
        host.add_disk("sdb", 2048, (8, 16));
        host.add_partition("sdb", "sdb1", 1024, (8, 17));
        host.add_disk("ram0", 100, (1, 0));
        host.write_udev((8, 16), "E:ID_WWN=0x5000\nE:ID_TYPE=disk\nS:disk/by-id/wwn-0x5000\n");
        host.write_udev((8, 17), "E:ID_PART_ENTRY_UUID=e-1\nE:ID_PART_TABLE_UUID=t-1\n");

        let scanner = SysfsScanner::with_paths(host.paths.clone());
        let records = scanner.enumerate().unwrap();
        assert_eq!(records.len(), 2);

        let disk = &records[0];
        assert_eq!(disk.dev_path, "/dev/sdb");
        assert_eq!(disk.attributes.device_type, DeviceType::Disk);
        assert_eq!(disk.attributes.capacity, 2048 * 512);
        assert_eq!(disk.attributes.wwn, "0x5000");
        assert_eq!(disk.dependents.partitions, vec!["/dev/sdb1".to_string()]);

        let part = &records[1];
        assert_eq!(part.attributes.device_type, DeviceType::Partition);
        assert_eq!(part.dependents.parent, "/dev/sdb");
        assert_eq!(part.partition.entry_uuid, "e-1");
    }

    #[test]
    fn test_holders_and_parent_lookup() {
        let host = FakeHost::new();
        host.add_disk("sdc", 2048, (8, 32));
        host.add_partition("sdc", "sdc1", 1024, (8, 33));
        host.add_holder("sdc", "dm-0");

        let scanner = SysfsScanner::with_paths(host.paths.clone());
        let disk = scanner.scan_device("sdc").unwrap();
        assert_eq!(disk.dependents.holders, vec!["/dev/dm-0".to_string()]);

        assert_eq!(scanner.parent_disk("sdc1").as_deref(), Some("sdc"));
        assert_eq!(scanner.parent_disk("sdc"), None);
        assert!(scanner.scan_device("sdz").is_err());
    }

    #[test]
    fn test_sectors_to_bytes() {
        assert_eq!(sectors_to_bytes("2048\n"), 1024 * 1024);
        assert_eq!(sectors_to_bytes("garbage"), 0);
        assert_eq!(sectors_to_bytes(&u64::MAX.to_string()), u64::MAX);
    }

    #[test]
    fn test_should_include_device() {
        let scanner = SysfsScanner::new(ScannerConfig::default());

        assert!(scanner.should_include_device("sda"));
        assert!(scanner.should_include_device("nvme0n1"));
        assert!(scanner.should_include_device("loop0"));
        assert!(!scanner.should_include_device("ram0"));
        assert!(!scanner.should_include_device("zram0"));
        assert!(!scanner.should_include_device("fd0"));
    }
}
