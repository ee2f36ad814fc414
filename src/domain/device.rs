//! Device Record
//!
//! The unit of observation flowing through the probe and filter pipelines.
//! A record is built fresh for every scan or event and later projected onto
//! a `BlockDevice` resource.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Device Classification
// =============================================================================

/// Kind of block device as reported by the kernel and udev
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Disk,
    Partition,
    Loop,
    Sparse,
    Dm,
    Lvm,
    Crypt,
    #[serde(rename = "mpath")]
    Multipath,
    #[default]
    Unknown,
}

impl DeviceType {
    /// Parse the udev `DEVTYPE` value
    pub fn from_devtype(devtype: &str) -> Self {
        match devtype {
            "disk" => DeviceType::Disk,
            "partition" => DeviceType::Partition,
            _ => DeviceType::Unknown,
        }
    }

    /// Classify a device-mapper device from its DM UUID prefix
    pub fn from_dm_uuid(dm_uuid: &str) -> Self {
        if dm_uuid.starts_with("LVM-") {
            DeviceType::Lvm
        } else if dm_uuid.starts_with("CRYPT-") {
            DeviceType::Crypt
        } else if dm_uuid.starts_with("mpath-") {
            DeviceType::Multipath
        } else {
            DeviceType::Dm
        }
    }

    /// Whether this type is backed by device-mapper
    pub fn is_device_mapper(&self) -> bool {
        matches!(
            self,
            DeviceType::Dm | DeviceType::Lvm | DeviceType::Crypt | DeviceType::Multipath
        )
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Disk => write!(f, "disk"),
            DeviceType::Partition => write!(f, "partition"),
            DeviceType::Loop => write!(f, "loop"),
            DeviceType::Sparse => write!(f, "sparse"),
            DeviceType::Dm => write!(f, "dm"),
            DeviceType::Lvm => write!(f, "lvm"),
            DeviceType::Crypt => write!(f, "crypt"),
            DeviceType::Multipath => write!(f, "mpath"),
            DeviceType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Rotational classification of the backing media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DriveType {
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "SSD")]
    Ssd,
    #[default]
    Unknown,
}

impl DriveType {
    /// Derive from the sysfs `queue/rotational` flag
    pub fn from_rotational(rotational: &str) -> Self {
        match rotational.trim() {
            "1" => DriveType::Hdd,
            "0" => DriveType::Ssd,
            _ => DriveType::Unknown,
        }
    }
}

impl std::fmt::Display for DriveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriveType::Hdd => write!(f, "HDD"),
            DriveType::Ssd => write!(f, "SSD"),
            DriveType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Known storage consumers that leave a signature on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UsedBy {
    #[serde(rename = "localpv")]
    LocalPv,
    Cstor,
    #[serde(rename = "zfs-localpv")]
    ZfsLocalPv,
    Mayastor,
}

impl std::fmt::Display for UsedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsedBy::LocalPv => write!(f, "localpv"),
            UsedBy::Cstor => write!(f, "cstor"),
            UsedBy::ZfsLocalPv => write!(f, "zfs-localpv"),
            UsedBy::Mayastor => write!(f, "mayastor"),
        }
    }
}

// =============================================================================
// Record Sections
// =============================================================================

/// Hardware attributes, filled in by the probe pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAttributes {
    pub model: String,
    pub serial: String,
    pub vendor: String,
    pub wwn: String,
    /// udev `ID_TYPE` hint (disk, cd, ...)
    pub id_type: String,
    pub firmware_revision: String,
    pub compliance: String,
    pub device_type: DeviceType,
    pub drive_type: DriveType,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    pub hardware_sector_size: u32,
    /// Capacity in bytes
    pub capacity: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub table_type: String,
    pub table_uuid: String,
    pub entry_uuid: String,
    pub number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemInfo {
    pub fs_type: String,
    pub uuid: String,
    pub mount_points: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMapperInfo {
    pub uuid: String,
    pub mapper_path: String,
}

/// Devices related to this one in the kernel hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependents {
    /// Parent disk of a partition
    pub parent: String,
    pub partitions: Vec<String>,
    /// Devices layered on top of this one
    pub holders: Vec<String>,
    /// Devices this one is layered on
    pub slaves: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUsage {
    pub in_use: bool,
    pub used_by: Option<UsedBy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DevLinkKind {
    #[serde(rename = "by-id")]
    ById,
    #[serde(rename = "by-path")]
    ByPath,
}

impl std::fmt::Display for DevLinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DevLinkKind::ById => write!(f, "by-id"),
            DevLinkKind::ByPath => write!(f, "by-path"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevLink {
    pub kind: DevLinkKind,
    pub links: Vec<String>,
}

// =============================================================================
// Device Record
// =============================================================================

/// Last observed state of one block device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Resolved identity, empty until resolved
    pub uuid: String,
    /// Device node path (e.g., /dev/sdb)
    pub dev_path: String,
    /// Sysfs directory of the device
    pub sys_path: String,
    pub attributes: DeviceAttributes,
    pub partition: PartitionInfo,
    pub filesystem: FilesystemInfo,
    pub device_mapper: DeviceMapperInfo,
    pub dependents: Dependents,
    pub dev_use: DeviceUsage,
    pub dev_links: Vec<DevLink>,
    pub labels: BTreeMap<String, String>,
}

impl DeviceRecord {
    /// Create a bare record for a device path
    pub fn new(dev_path: impl Into<String>) -> Self {
        Self {
            dev_path: dev_path.into(),
            ..Default::default()
        }
    }

    /// Kernel name of the device (e.g., sdb1)
    pub fn name(&self) -> &str {
        self.dev_path.rsplit('/').next().unwrap_or(&self.dev_path)
    }

    pub fn is_partition(&self) -> bool {
        self.attributes.device_type == DeviceType::Partition
    }

    pub fn has_partitions(&self) -> bool {
        !self.dependents.partitions.is_empty()
    }

    pub fn has_holders(&self) -> bool {
        !self.dependents.holders.is_empty()
    }

    /// Links of the given kind, if any were discovered
    pub fn links(&self, kind: DevLinkKind) -> &[String] {
        self.dev_links
            .iter()
            .find(|l| l.kind == kind)
            .map(|l| l.links.as_slice())
            .unwrap_or(&[])
    }

    /// Replace or insert the link list of a kind; empty lists are dropped
    pub fn set_links(&mut self, kind: DevLinkKind, links: Vec<String>) {
        self.dev_links.retain(|l| l.kind != kind);
        if !links.is_empty() {
            self.dev_links.push(DevLink { kind, links });
        }
    }
}

/// Fill `target` from `value` only when `target` is still empty
pub(crate) fn fill_if_empty(target: &mut String, value: &str) {
    if target.is_empty() && !value.is_empty() {
        *target = value.to_string();
    }
}
