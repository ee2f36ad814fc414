//! BlockDevice CRD
//!
//! The externally visible projection of a device record. One resource per
//! identified device, named by its stable UUID and labelled with the node
//! that owns it.

use crate::config::is_falsy;
use crate::domain::{DevLinkKind, DeviceRecord};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::core::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Well-known Labels and Annotations
// =============================================================================

/// Node that currently hosts the device
pub const HOSTNAME_LABEL: &str = "kubernetes.io/hostname";
/// Set to "false" by an operator to take a resource out of management
pub const MANAGED_LABEL: &str = "ndm.io/managed";
pub const DEVICE_TYPE_LABEL: &str = "ndm.io/blockdevice-type";
pub const DEFAULT_DEVICE_TYPE: &str = "blockdevice";
/// Custom tag applied by the custom-tag probe
pub const BLOCK_DEVICE_TAG_LABEL: &str = "openebs.io/block-device-tag";

/// Reconciliation opt-out
pub const RECONCILE_ANNOTATION: &str = "openebs.io/reconcile";
pub const UUID_SCHEME_ANNOTATION: &str = "internal.openebs.io/uuid-scheme";
pub const LEGACY_UUID_SCHEME: &str = "legacy";
/// Filesystem UUID of a device used by local PV, written on upgrade
pub const FS_UUID_ANNOTATION: &str = "internal.openebs.io/fsuuid";
/// Partition entry UUID of a device used by cStor, written on upgrade
pub const PARTITION_UUID_ANNOTATION: &str = "internal.openebs.io/partition-uuid";

pub const BLOCK_DEVICE_KIND: &str = "BlockDevice";

// =============================================================================
// BlockDevice CRD
// =============================================================================

/// BlockDevice describes one block device found on a node.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "openebs.io",
    version = "v1alpha1",
    kind = "BlockDevice",
    plural = "blockdevices",
    shortname = "bd",
    status = "BlockDeviceStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name": "NodeName", "type": "string", "jsonPath": ".spec.nodeAttributes.nodeName"}"#,
    printcolumn = r#"{"name": "Path", "type": "string", "jsonPath": ".spec.path", "priority": 1}"#,
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.capacity.storage"}"#,
    printcolumn = r#"{"name": "ClaimState", "type": "string", "jsonPath": ".status.claimState"}"#,
    printcolumn = r#"{"name": "Status", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceSpec {
    /// Device node path (e.g., /dev/sdb)
    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub capacity: DeviceCapacity,

    /// Set by the consumer that claimed this device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_ref: Option<ObjectReference>,

    #[serde(default)]
    pub details: DeviceDetails,

    #[serde(default)]
    pub devlinks: Vec<DeviceDevLink>,

    #[serde(default)]
    pub filesystem: FileSystemInfo,

    #[serde(default)]
    pub node_attributes: NodeAttributes,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_device: String,

    /// "Yes" or "No"
    #[serde(default)]
    pub partitioned: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_mapper: Option<DeviceMapperSpec>,
}

// =============================================================================
// Sub-Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapacity {
    /// Capacity in bytes
    #[serde(default)]
    pub storage: u64,
    #[serde(default)]
    pub physical_sector_size: u32,
    #[serde(default)]
    pub logical_sector_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub drive_type: String,
    #[serde(default)]
    pub logical_block_size: u32,
    #[serde(default)]
    pub physical_block_size: u32,
    #[serde(default)]
    pub hardware_sector_size: u32,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub compliance: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub firmware_revision: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceDevLink {
    /// by-id or by-path
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub links: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fs_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mount_point: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeAttributes {
    #[serde(default)]
    pub node_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMapperSpec {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub mapper_path: String,
}

// =============================================================================
// Status
// =============================================================================

/// Lifecycle state of the device on its node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum DeviceState {
    #[default]
    Active,
    Inactive,
    Unknown,
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Active => write!(f, "Active"),
            DeviceState::Inactive => write!(f, "Inactive"),
            DeviceState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Claim state, owned by external consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ClaimState {
    #[default]
    Unclaimed,
    Claimed,
    Released,
}

impl std::fmt::Display for ClaimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClaimState::Unclaimed => write!(f, "Unclaimed"),
            ClaimState::Claimed => write!(f, "Claimed"),
            ClaimState::Released => write!(f, "Released"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceStatus {
    #[serde(default)]
    pub claim_state: ClaimState,
    #[serde(default)]
    pub state: DeviceState,
}

// =============================================================================
// Helper Implementations
// =============================================================================

impl BlockDevice {
    /// Project a device record onto a fresh Active, Unclaimed resource
    pub fn from_record(record: &DeviceRecord, node_name: &str, namespace: &str) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(HOSTNAME_LABEL.to_string(), node_name.to_string());
        labels.insert(DEVICE_TYPE_LABEL.to_string(), DEFAULT_DEVICE_TYPE.to_string());
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        for (k, v) in &record.labels {
            labels.insert(k.clone(), v.clone());
        }

        let attrs = &record.attributes;
        let devlinks = [DevLinkKind::ById, DevLinkKind::ByPath]
            .into_iter()
            .filter(|kind| !record.links(*kind).is_empty())
            .map(|kind| DeviceDevLink {
                kind: kind.to_string(),
                links: record.links(kind).to_vec(),
            })
            .collect();

        let device_mapper = if record.device_mapper.uuid.is_empty() {
            None
        } else {
            Some(DeviceMapperSpec {
                uuid: record.device_mapper.uuid.clone(),
                mapper_path: record.device_mapper.mapper_path.clone(),
            })
        };

        let spec = BlockDeviceSpec {
            path: record.dev_path.clone(),
            capacity: DeviceCapacity {
                storage: attrs.capacity,
                physical_sector_size: attrs.physical_block_size,
                logical_sector_size: attrs.logical_block_size,
            },
            claim_ref: None,
            details: DeviceDetails {
                device_type: attrs.device_type.to_string(),
                drive_type: attrs.drive_type.to_string(),
                logical_block_size: attrs.logical_block_size,
                physical_block_size: attrs.physical_block_size,
                hardware_sector_size: attrs.hardware_sector_size,
                model: attrs.model.clone(),
                compliance: attrs.compliance.clone(),
                serial: attrs.serial.clone(),
                vendor: attrs.vendor.clone(),
                firmware_revision: attrs.firmware_revision.clone(),
            },
            devlinks,
            filesystem: FileSystemInfo {
                fs_type: record.filesystem.fs_type.clone(),
                mount_point: record.filesystem.mount_points.first().cloned().unwrap_or_default(),
            },
            node_attributes: NodeAttributes {
                node_name: node_name.to_string(),
            },
            parent_device: record.dependents.parent.clone(),
            partitioned: if record.has_partitions() { "Yes" } else { "No" }.to_string(),
            device_mapper,
        };

        let mut bd = BlockDevice::new(&record.uuid, spec);
        bd.metadata = ObjectMeta {
            name: Some(record.uuid.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        };
        bd.status = Some(BlockDeviceStatus::default());
        bd
    }

    /// Resource name, which is the device UUID
    pub fn uuid(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn claim_state(&self) -> ClaimState {
        self.status.as_ref().map(|s| s.claim_state).unwrap_or_default()
    }

    pub fn state(&self) -> DeviceState {
        self.status.as_ref().map(|s| s.state).unwrap_or_default()
    }

    pub fn set_state(&mut self, state: DeviceState) {
        self.status.get_or_insert_with(BlockDeviceStatus::default).state = state;
    }

    pub fn is_claimed(&self) -> bool {
        self.claim_state() != ClaimState::Unclaimed
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    pub fn set_annotation(&mut self, key: &str, value: &str) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(key))
            .map(String::as_str)
    }

    /// False when the reconcile annotation holds a falsy value
    pub fn reconcile_enabled(&self) -> bool {
        self.annotation(RECONCILE_ANNOTATION)
            .map_or(true, |value| !is_falsy(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeviceType, DriveType};

    fn sample_record() -> DeviceRecord {
        let mut record = DeviceRecord::new("/dev/sdb");
        record.uuid = "blockdevice-abc".into();
        record.attributes.capacity = 10 * 1024 * 1024 * 1024;
        record.attributes.device_type = DeviceType::Disk;
        record.attributes.drive_type = DriveType::Ssd;
        record.attributes.logical_block_size = 512;
        record.attributes.physical_block_size = 4096;
        record.attributes.serial = "S1".into();
        record.filesystem.mount_points = vec!["/mnt/a".into(), "/mnt/b".into()];
        record.set_links(DevLinkKind::ByPath, vec!["/dev/disk/by-path/pci-0".into()]);
        record
    }

    #[test]
    fn test_from_record() {
        let bd = BlockDevice::from_record(&sample_record(), "node-1", "openebs");

        assert_eq!(bd.uuid(), "blockdevice-abc");
        assert_eq!(bd.metadata.namespace.as_deref(), Some("openebs"));
        assert_eq!(bd.label(HOSTNAME_LABEL), Some("node-1"));
        assert_eq!(bd.label(MANAGED_LABEL), Some("true"));
        assert_eq!(bd.label(DEVICE_TYPE_LABEL), Some(DEFAULT_DEVICE_TYPE));
        assert_eq!(bd.spec.details.device_type, "disk");
        assert_eq!(bd.spec.details.drive_type, "SSD");
        assert_eq!(bd.spec.capacity.physical_sector_size, 4096);
        assert_eq!(bd.spec.filesystem.mount_point, "/mnt/a");
        assert_eq!(bd.spec.partitioned, "No");
        assert_eq!(bd.spec.devlinks.len(), 1);
        assert_eq!(bd.spec.devlinks[0].kind, "by-path");
        assert!(bd.spec.device_mapper.is_none());
        assert_eq!(bd.state(), DeviceState::Active);
        assert_eq!(bd.claim_state(), ClaimState::Unclaimed);
    }

    #[test]
    fn test_reconcile_annotation() {
        let mut bd = BlockDevice::from_record(&sample_record(), "node-1", "openebs");
        assert!(bd.reconcile_enabled());

        bd.set_annotation(RECONCILE_ANNOTATION, "False");
        assert!(!bd.reconcile_enabled());

        bd.set_annotation(RECONCILE_ANNOTATION, "true");
        assert!(bd.reconcile_enabled());
    }

    #[test]
    fn test_status_serialization() {
        let status = BlockDeviceStatus {
            claim_state: ClaimState::Claimed,
            state: DeviceState::Inactive,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["claimState"], "Claimed");
        assert_eq!(json["state"], "Inactive");
    }
}
