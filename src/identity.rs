//! Device Identity
//!
//! Derives the stable resource name of a block device from whatever
//! hardware attributes the probes managed to collect.
//!
//! Three derivations exist:
//! - the current scheme (`resolve`), used for every new resource
//! - the legacy scheme (`resolve_legacy`), kept to find resources created
//!   by older releases
//! - the partition-table scheme (`resolve_from_partition_table`), used for
//!   disks partitioned by zfs-localpv outside of this daemon

use crate::domain::{DeviceRecord, DeviceType};
use md5::{Digest, Md5};
use std::fs;
use tracing::{debug, info};

/// Prefix of every block device resource name
pub const BLOCK_DEVICE_PREFIX: &str = "blockdevice-";
/// Prefix of sparse file resource names
pub const SPARSE_PREFIX: &str = "sparse-";

/// Models reported by hypervisors that hand out non-unique serials
const VIRTUAL_DISK_MODELS: &[&str] = &["EphemeralDisk", "Virtual_disk", "QEMU_HARDDISK"];

/// Lowercase hex MD5 of a field
pub fn hash(field: &str) -> String {
    let digest = Md5::digest(field.as_bytes());
    hex::encode(digest)
}

/// Read the kernel hostname of this node
pub fn node_hostname() -> String {
    for path in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
        if let Ok(hostname) = fs::read_to_string(path) {
            let hostname = hostname.trim();
            if !hostname.is_empty() {
                return hostname.to_string();
            }
        }
    }
    "unknown".to_string()
}

// =============================================================================
// Identity Resolver
// =============================================================================

/// Result of the legacy derivation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyIdentity {
    pub uuid: String,
    /// Hostname and device path were mixed in, so the name is not portable
    pub uses_path: bool,
}

/// Maps enriched device records to stable identifiers
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    hostname: String,
}

impl IdentityResolver {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
        }
    }

    /// Resolver bound to this node's hostname
    pub fn for_local_node() -> Self {
        Self::new(node_hostname())
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Resolve the current-scheme identity, `None` when the device cannot be
    /// identified uniquely
    pub fn resolve(&self, record: &DeviceRecord) -> Option<String> {
        let attrs = &record.attributes;
        let field = if attrs.device_type == DeviceType::Loop {
            debug!(device = %record.dev_path, "loop device, using hostname and path");
            format!("{}{}", self.hostname, record.dev_path)
        } else if attrs.device_type.is_device_mapper() && !record.device_mapper.uuid.is_empty() {
            debug!(device = %record.dev_path, dm_uuid = %record.device_mapper.uuid, "dm device, using DM UUID");
            record.device_mapper.uuid.clone()
        } else if attrs.device_type == DeviceType::Partition {
            // Partitions share the table UUID, never the entry UUID
            if record.partition.entry_uuid.is_empty() {
                debug!(device = %record.dev_path, "partition has no entry UUID");
                return None;
            }
            record.partition.entry_uuid.clone()
        } else if !attrs.wwn.is_empty() {
            debug!(device = %record.dev_path, wwn = %attrs.wwn, serial = %attrs.serial, "using WWN and serial");
            format!("{}{}", attrs.wwn, attrs.serial)
        } else if !record.filesystem.uuid.is_empty() {
            debug!(device = %record.dev_path, fs_uuid = %record.filesystem.uuid, "using filesystem UUID");
            record.filesystem.uuid.clone()
        } else {
            return None;
        };

        let uuid = format!("{}{}", BLOCK_DEVICE_PREFIX, hash(&field));
        info!(device = %record.dev_path, uuid = %uuid, "generated uuid");
        Some(uuid)
    }

    /// Resolve the legacy identity from WWN, model, serial and vendor
    pub fn resolve_legacy(&self, record: &DeviceRecord) -> LegacyIdentity {
        let attrs = &record.attributes;
        let mut field = format!("{}{}{}{}", attrs.wwn, attrs.model, attrs.serial, attrs.vendor);
        let uses_path =
            attrs.id_type.is_empty() || VIRTUAL_DISK_MODELS.contains(&attrs.model.as_str());
        if uses_path {
            field.push_str(&self.hostname);
            field.push_str(&record.dev_path);
        }
        LegacyIdentity {
            uuid: format!("{}{}", BLOCK_DEVICE_PREFIX, hash(&field)),
            uses_path,
        }
    }

    /// Resolve an identity from the partition table UUID
    pub fn resolve_from_partition_table(&self, record: &DeviceRecord) -> Option<String> {
        if record.partition.table_uuid.is_empty() {
            return None;
        }
        Some(format!(
            "{}{}",
            BLOCK_DEVICE_PREFIX,
            hash(&record.partition.table_uuid)
        ))
    }

    /// Identity of a sparse file on this node
    pub fn sparse_uuid(&self, node_name: &str, file_path: &str) -> String {
        format!("{}{}", SPARSE_PREFIX, hash(&format!("{}{}", node_name, file_path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(path: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(path);
        record.attributes.device_type = DeviceType::Disk;
        record.attributes.id_type = "disk".into();
        record
    }

    #[test]
    fn test_hash_is_lowercase_md5() {
        assert_eq!(hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_resolve_wwn() {
        let resolver = IdentityResolver::new("node-1");
        let mut record = disk("/dev/sdb");
        record.attributes.wwn = "5000C5007".into();

        let uuid = resolver.resolve(&record).unwrap();
        assert_eq!(uuid, format!("blockdevice-{}", hash("5000C5007")));

        // Deterministic across independent resolvers
        assert_eq!(IdentityResolver::new("node-2").resolve(&record).unwrap(), uuid);

        // Serial participates alongside the WWN
        record.attributes.serial = "S2".into();
        let with_serial = resolver.resolve(&record).unwrap();
        assert_ne!(with_serial, uuid);
        assert_eq!(with_serial, format!("blockdevice-{}", hash("5000C5007S2")));
    }

    #[test]
    fn test_resolve_partition_ignores_parent_wwn() {
        let resolver = IdentityResolver::new("node-1");
        let mut part = DeviceRecord::new("/dev/sdb1");
        part.attributes.device_type = DeviceType::Partition;
        part.attributes.wwn = "5000C5007".into();
        part.partition.entry_uuid = "a1b2".into();

        let uuid = resolver.resolve(&part).unwrap();
        assert_eq!(uuid, format!("blockdevice-{}", hash("a1b2")));

        part.attributes.wwn = "other".into();
        assert_eq!(resolver.resolve(&part).unwrap(), uuid);

        part.partition.entry_uuid.clear();
        assert_eq!(resolver.resolve(&part), None);
    }

    #[test]
    fn test_resolve_precedence() {
        let resolver = IdentityResolver::new("node-1");

        let mut lo = DeviceRecord::new("/dev/loop0");
        lo.attributes.device_type = DeviceType::Loop;
        lo.attributes.wwn = "ignored".into();
        assert_eq!(
            resolver.resolve(&lo).unwrap(),
            format!("blockdevice-{}", hash("node-1/dev/loop0"))
        );

        let mut dm = DeviceRecord::new("/dev/dm-0");
        dm.attributes.device_type = DeviceType::Lvm;
        dm.device_mapper.uuid = "LVM-xyz".into();
        assert_eq!(
            resolver.resolve(&dm).unwrap(),
            format!("blockdevice-{}", hash("LVM-xyz"))
        );

        let mut fs_only = disk("/dev/sdc");
        fs_only.filesystem.uuid = "f00d".into();
        assert_eq!(
            resolver.resolve(&fs_only).unwrap(),
            format!("blockdevice-{}", hash("f00d"))
        );

        assert_eq!(resolver.resolve(&disk("/dev/sdd")), None);
    }

    #[test]
    fn test_resolve_legacy() {
        let resolver = IdentityResolver::new("node-1");
        let mut record = disk("/dev/sdb");
        record.attributes.wwn = "w".into();
        record.attributes.model = "m".into();
        record.attributes.serial = "s".into();
        record.attributes.vendor = "v".into();

        let legacy = resolver.resolve_legacy(&record);
        assert_eq!(legacy.uuid, format!("blockdevice-{}", hash("wmsv")));
        assert!(!legacy.uses_path);

        record.attributes.model = "QEMU_HARDDISK".into();
        let legacy = resolver.resolve_legacy(&record);
        assert_eq!(
            legacy.uuid,
            format!("blockdevice-{}", hash("wQEMU_HARDDISKsvnode-1/dev/sdb"))
        );
        assert!(legacy.uses_path);

        let mut no_id_type = disk("/dev/sdc");
        no_id_type.attributes.id_type.clear();
        assert!(resolver.resolve_legacy(&no_id_type).uses_path);
    }

    #[test]
    fn test_resolve_from_partition_table() {
        let resolver = IdentityResolver::new("node-1");
        let mut record = disk("/dev/sdb");
        assert_eq!(resolver.resolve_from_partition_table(&record), None);

        record.partition.table_uuid = "pt-1".into();
        assert_eq!(
            resolver.resolve_from_partition_table(&record).unwrap(),
            format!("blockdevice-{}", hash("pt-1"))
        );
    }
}
