//! Domain Ports - Core trait definitions for the device manager
//!
//! These traits define the boundaries between the reconciliation logic and
//! external systems. Adapters implement these traits to provide concrete
//! functionality.

use crate::crd::BlockDevice;
use crate::domain::DeviceRecord;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Label Selection
// =============================================================================

/// A single label requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRequirement {
    Equals(String, String),
    NotEquals(String, String),
}

impl LabelRequirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            LabelRequirement::Equals(k, v) => labels.get(k) == Some(v),
            // A missing label satisfies an inequality
            LabelRequirement::NotEquals(k, v) => labels.get(k) != Some(v),
        }
    }
}

impl std::fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelRequirement::Equals(k, v) => write!(f, "{}={}", k, v),
            LabelRequirement::NotEquals(k, v) => write!(f, "{}!={}", k, v),
        }
    }
}

/// Conjunction of label requirements, rendered in Kubernetes selector syntax
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: &str, value: &str) -> Self {
        self.requirements
            .push(LabelRequirement::Equals(key.to_string(), value.to_string()));
        self
    }

    pub fn not_equals(mut self, key: &str, value: &str) -> Self {
        self.requirements
            .push(LabelRequirement::NotEquals(key.to_string(), value.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Evaluate the selector against a label map
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        let empty = BTreeMap::new();
        let labels = labels.unwrap_or(&empty);
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

// =============================================================================
// Device Store Port
// =============================================================================

/// Port for the BlockDevice record store
///
/// `update` must reject a resource whose version token does not match the
/// stored one with `Error::Conflict`; `create` must reject an existing name
/// with `Error::ResourceExists`.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetch a resource by name
    async fn get(&self, name: &str) -> Result<Option<BlockDevice>>;

    /// List resources matching a label selector
    async fn list(&self, selector: &LabelSelector) -> Result<Vec<BlockDevice>>;

    /// Create a new resource
    async fn create(&self, device: &BlockDevice) -> Result<BlockDevice>;

    /// Replace an existing resource, guarded by its version token
    async fn update(&self, device: &BlockDevice) -> Result<BlockDevice>;

    /// Delete a resource by name
    async fn delete(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Device Source Port
// =============================================================================

/// Port for enumerating the block devices currently present on the node
pub trait DeviceSource: Send + Sync {
    /// Produce one raw record per block device
    fn enumerate(&self) -> Result<Vec<DeviceRecord>>;
}

// =============================================================================
// Partitioner Port
// =============================================================================

/// Target of a partitioning request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disk {
    pub dev_path: String,
    /// Size in bytes
    pub size: u64,
    /// Logical block size in bytes, 0 when unknown
    pub logical_block_size: u64,
}

impl Disk {
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            dev_path: record.dev_path.clone(),
            size: record.attributes.capacity,
            logical_block_size: u64::from(record.attributes.logical_block_size),
        }
    }
}

/// Port for writing a fresh partition table onto a device
pub trait DiskPartitioner: Send + Sync {
    /// Create one partition spanning the whole usable area of the disk
    fn create_single_partition(&self, disk: &Disk) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type DeviceStoreRef = Arc<dyn DeviceStore>;
pub type DeviceSourceRef = Arc<dyn DeviceSource>;
pub type DiskPartitionerRef = Arc<dyn DiskPartitioner>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_selector_display() {
        let selector = LabelSelector::new()
            .not_equals("ndm.io/managed", "false")
            .equals("kubernetes.io/hostname", "node-1");
        assert_eq!(
            selector.to_string(),
            "ndm.io/managed!=false,kubernetes.io/hostname=node-1"
        );
    }

    #[test]
    fn test_label_selector_matches() {
        let selector = LabelSelector::new()
            .not_equals("ndm.io/managed", "false")
            .equals("kubernetes.io/hostname", "node-1");

        let mut labels = BTreeMap::new();
        labels.insert("kubernetes.io/hostname".to_string(), "node-1".to_string());
        assert!(selector.matches(Some(&labels)));

        labels.insert("ndm.io/managed".to_string(), "false".to_string());
        assert!(!selector.matches(Some(&labels)));

        assert!(!selector.matches(None));
        assert!(LabelSelector::new().matches(None));
    }
}
