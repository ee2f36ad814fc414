//! Device Store
//!
//! `Inventory` wraps a `DeviceStore` with the reconciler's write rules:
//! create falls back to update, updates merge into the stored resource and
//! never touch claim fields, version conflicts are retried once, and
//! deactivation is best-effort.

pub mod kubernetes;
pub mod memory;

pub use kubernetes::KubeDeviceStore;
pub use memory::InMemoryDeviceStore;

use crate::crd::{BlockDevice, ClaimState, DeviceState, BLOCK_DEVICE_KIND, HOSTNAME_LABEL, MANAGED_LABEL};
use crate::domain::{DeviceRecord, DeviceStoreRef, LabelSelector};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Event Codes
// =============================================================================

pub const CREATE_SUCCESS: &str = "ndm.blockdevice.create.success";
pub const CREATE_FAILURE: &str = "ndm.blockdevice.create.failure";
pub const UPDATE_SUCCESS: &str = "ndm.blockdevice.update.success";
pub const UPDATE_FAILURE: &str = "ndm.blockdevice.update.failure";
pub const DEACTIVATE_SUCCESS: &str = "ndm.blockdevice.deactivate.success";
pub const DEACTIVATE_FAILURE: &str = "ndm.blockdevice.deactivate.failure";

// =============================================================================
// Inventory
// =============================================================================

/// Node-scoped view of the BlockDevice store
#[derive(Clone)]
pub struct Inventory {
    store: DeviceStoreRef,
    node_name: String,
    namespace: String,
}

impl Inventory {
    pub fn new(store: DeviceStoreRef, node_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            node_name: node_name.into(),
            namespace: namespace.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &DeviceStoreRef {
        &self.store
    }

    /// Project a record onto a resource owned by this node
    pub fn to_resource(&self, record: &DeviceRecord) -> BlockDevice {
        BlockDevice::from_record(record, &self.node_name, &self.namespace)
    }

    pub async fn get(&self, uuid: &str) -> Result<Option<BlockDevice>> {
        self.store.get(uuid).await
    }

    /// Resources of this node (or of every node) that are open to reconciliation
    #[instrument(skip(self))]
    pub async fn list(&self, list_all: bool) -> Result<Vec<BlockDevice>> {
        let mut selector = LabelSelector::new().not_equals(MANAGED_LABEL, "false");
        if !list_all {
            selector = selector.equals(HOSTNAME_LABEL, &self.node_name);
        }
        let devices = self.store.list(&selector).await?;
        Ok(devices
            .into_iter()
            .filter(|device| {
                let enabled = device.reconcile_enabled();
                if !enabled {
                    debug!(name = %device.uuid(), "reconciliation disabled by annotation");
                }
                enabled
            })
            .collect())
    }

    /// First resource whose annotation `key` equals `value`
    pub async fn find_by_annotation(&self, key: &str, value: &str) -> Result<Option<BlockDevice>> {
        if value.is_empty() {
            return Ok(None);
        }
        Ok(self
            .list(true)
            .await?
            .into_iter()
            .find(|device| device.annotation(key) == Some(value)))
    }

    /// Create a resource, updating the stored one when the name is taken
    #[instrument(skip(self, device), fields(name = %device.uuid()))]
    pub async fn create(&self, device: &BlockDevice) -> Result<()> {
        let mut device = device.clone();
        device.metadata.namespace = Some(self.namespace.clone());

        match self.store.create(&device).await {
            Ok(_) => {
                info!(eventcode = CREATE_SUCCESS, name = %device.uuid(), "created BlockDevice");
                return Ok(());
            }
            Err(Error::ResourceExists { .. }) => {
                // Device moved from another node, or a previous run created it
                debug!(name = %device.uuid(), "BlockDevice exists, updating");
            }
            Err(e) => {
                error!(eventcode = CREATE_FAILURE, name = %device.uuid(), "create failed: {}", e);
                return Err(e);
            }
        }

        match self.update(&device, None).await {
            Err(e) if e.is_conflict() => self.update(&device, None).await.map(|_| ()),
            other => other.map(|_| ()),
        }
    }

    /// Merge `device` into the stored resource and write it back
    ///
    /// When `old` is absent the stored resource is fetched first. Labels and
    /// annotations are merged, claim fields always come from the stored copy,
    /// and a claimed resource only takes node, capacity, path, devlinks and
    /// state from `device`.
    #[instrument(skip(self, device, old), fields(name = %device.uuid()))]
    pub async fn update(&self, device: &BlockDevice, old: Option<BlockDevice>) -> Result<BlockDevice> {
        let old = match old {
            Some(old) => old,
            None => match self.store.get(device.uuid()).await {
                Ok(Some(old)) => old,
                Ok(None) => {
                    let e = Error::ResourceNotFound {
                        kind: BLOCK_DEVICE_KIND.into(),
                        name: device.uuid().to_string(),
                    };
                    error!(eventcode = UPDATE_FAILURE, name = %device.uuid(), "update failed: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    error!(eventcode = UPDATE_FAILURE, name = %device.uuid(), "unable to fetch BlockDevice: {}", e);
                    return Err(e);
                }
            },
        };

        let merged = merge_resource(device, old);
        match self.store.update(&merged).await {
            Ok(stored) => {
                info!(eventcode = UPDATE_SUCCESS, name = %stored.uuid(), "updated BlockDevice");
                Ok(stored)
            }
            Err(e) => {
                error!(eventcode = UPDATE_FAILURE, name = %merged.uuid(), "update failed: {}", e);
                Err(e)
            }
        }
    }

    /// Update against `old` when known, otherwise create; retried once on conflict
    pub async fn push(&self, device: &BlockDevice, old: Option<BlockDevice>) -> Result<()> {
        let result = match old {
            Some(old) => self.update(device, Some(old)).await.map(|_| ()),
            None => self.create(device).await,
        };
        match result {
            Err(e) if e.is_conflict() => {
                warn!(name = %device.uuid(), "version conflict, retrying with a fresh read");
                self.update(device, None).await.map(|_| ())
            }
            other => other,
        }
    }

    /// Mark a resource Inactive; failures are logged only
    #[instrument(skip(self, device), fields(name = %device.uuid()))]
    pub async fn deactivate(&self, device: &BlockDevice) {
        let mut device = device.clone();
        device.set_state(DeviceState::Inactive);
        match self.store.update(&device).await {
            Ok(_) => info!(eventcode = DEACTIVATE_SUCCESS, name = %device.uuid(), "deactivated BlockDevice"),
            Err(e) => error!(
                eventcode = DEACTIVATE_FAILURE,
                name = %device.uuid(),
                "unable to deactivate BlockDevice: {}",
                e
            ),
        }
    }

    /// Deactivate the resource named `uuid`, reporting whether it existed
    pub async fn deactivate_by_uuid(&self, uuid: &str) -> Result<bool> {
        match self.store.get(uuid).await? {
            Some(device) => {
                self.deactivate(&device).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deactivate node-local Active resources whose UUID was not observed
    #[instrument(skip(self, observed), fields(observed = observed.len()))]
    pub async fn deactivate_stale(&self, observed: &HashSet<String>) -> Result<usize> {
        let mut count = 0;
        for device in self.list(false).await? {
            if observed.contains(device.uuid()) || device.state() == DeviceState::Inactive {
                continue;
            }
            info!(name = %device.uuid(), path = %device.spec.path, "device no longer present");
            self.deactivate(&device).await;
            count += 1;
        }
        Ok(count)
    }

    /// Set every node-local resource to Unknown, used at shutdown
    pub async fn mark_unknown(&self) -> Result<()> {
        for mut device in self.list(false).await? {
            device.set_state(DeviceState::Unknown);
            match self.store.update(&device).await {
                Ok(_) => info!(name = %device.uuid(), "marked BlockDevice Unknown"),
                Err(e) => warn!(name = %device.uuid(), "unable to mark BlockDevice Unknown: {}", e),
            }
        }
        Ok(())
    }
}

fn merge_map(
    new: Option<&BTreeMap<String, String>>,
    old: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    let mut merged = old.unwrap_or_default();
    if let Some(new) = new {
        merged.extend(new.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if merged.is_empty() {
        None
    } else {
        Some(merged)
    }
}

/// Fold freshly derived device data into the stored resource
pub fn merge_resource(new: &BlockDevice, mut old: BlockDevice) -> BlockDevice {
    old.metadata.labels = merge_map(new.metadata.labels.as_ref(), old.metadata.labels.take());
    old.metadata.annotations = merge_map(new.metadata.annotations.as_ref(), old.metadata.annotations.take());

    let claim_state = old.claim_state();
    if claim_state != ClaimState::Unclaimed {
        debug!(path = %new.spec.path, "device is claimed, updating only node, capacity, path and links");
        old.spec.node_attributes = new.spec.node_attributes.clone();
        old.spec.capacity.storage = new.spec.capacity.storage;
        old.spec.path = new.spec.path.clone();
        old.spec.devlinks = new.spec.devlinks.clone();
        old.set_state(new.state());
    } else {
        let claim_ref = old.spec.claim_ref.take();
        old.spec = new.spec.clone();
        old.spec.claim_ref = claim_ref;
        old.status = new.status.clone();
        old.status.get_or_insert_with(Default::default).claim_state = claim_state;
    }
    old
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BlockDeviceStatus, FS_UUID_ANNOTATION, RECONCILE_ANNOTATION};
    use crate::domain::DeviceStore;
    use k8s_openapi::api::core::v1::ObjectReference;
    use std::sync::Arc;

    fn record(uuid: &str, path: &str, capacity: u64) -> DeviceRecord {
        let mut record = DeviceRecord::new(path);
        record.uuid = uuid.to_string();
        record.attributes.capacity = capacity;
        record.attributes.serial = "S1".into();
        record
    }

    fn inventory() -> (Arc<InMemoryDeviceStore>, Inventory) {
        let store = Arc::new(InMemoryDeviceStore::new());
        let inventory = Inventory::new(store.clone(), "node-1", "openebs");
        (store, inventory)
    }

    async fn claim(store: &InMemoryDeviceStore, uuid: &str) {
        let mut device = store.get(uuid).await.unwrap().unwrap();
        device.spec.claim_ref = Some(ObjectReference {
            name: Some("bdc-1".into()),
            ..Default::default()
        });
        device.status = Some(BlockDeviceStatus {
            claim_state: ClaimState::Claimed,
            state: DeviceState::Active,
        });
        store.update(&device).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_twice_is_idempotent() {
        let (store, inventory) = inventory();
        let device = inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1024));

        inventory.create(&device).await.unwrap();
        let first = store.get("blockdevice-a").await.unwrap().unwrap();
        inventory.create(&device).await.unwrap();
        let second = store.get("blockdevice-a").await.unwrap().unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(first.spec, second.spec);
        assert_eq!(first.status, second.status);
        assert_eq!(first.metadata.labels, second.metadata.labels);
    }

    #[tokio::test]
    async fn test_update_preserves_claim() {
        let (store, inventory) = inventory();
        inventory
            .create(&inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1024)))
            .await
            .unwrap();
        claim(&store, "blockdevice-a").await;

        let mut changed = record("blockdevice-a", "/dev/sdc", 2048);
        changed.attributes.serial = "S2".into();
        let mut device = inventory.to_resource(&changed);
        device.set_annotation(FS_UUID_ANNOTATION, "fs-1");
        inventory.update(&device, None).await.unwrap();

        let stored = store.get("blockdevice-a").await.unwrap().unwrap();
        assert_eq!(stored.claim_state(), ClaimState::Claimed);
        assert!(stored.spec.claim_ref.is_some());
        assert_eq!(stored.spec.path, "/dev/sdc");
        assert_eq!(stored.spec.capacity.storage, 2048);
        // Detail fields are frozen while claimed
        assert_eq!(stored.spec.details.serial, "S1");
        assert_eq!(stored.annotation(FS_UUID_ANNOTATION), Some("fs-1"));
    }

    #[tokio::test]
    async fn test_unclaimed_update_keeps_claim_ref() {
        let (store, inventory) = inventory();
        inventory
            .create(&inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1024)))
            .await
            .unwrap();

        let mut device = store.get("blockdevice-a").await.unwrap().unwrap();
        device.spec.claim_ref = Some(ObjectReference::default());
        store.update(&device).await.unwrap();

        let mut changed = record("blockdevice-a", "/dev/sdb", 1024);
        changed.attributes.serial = "S9".into();
        inventory.update(&inventory.to_resource(&changed), None).await.unwrap();

        let stored = store.get("blockdevice-a").await.unwrap().unwrap();
        assert_eq!(stored.spec.details.serial, "S9");
        assert!(stored.spec.claim_ref.is_some());
        assert_eq!(stored.claim_state(), ClaimState::Unclaimed);
    }

    #[tokio::test]
    async fn test_push_retries_stale_version() {
        let (store, inventory) = inventory();
        let device = inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1024));
        inventory.create(&device).await.unwrap();
        let stale = store.get("blockdevice-a").await.unwrap().unwrap();

        // Someone else writes in between
        store.update(&stale).await.unwrap();

        inventory.push(&device, Some(stale)).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_deactivation_preserves_identity() {
        let (store, inventory) = inventory();
        inventory
            .create(&inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1024)))
            .await
            .unwrap();
        let before = store.get("blockdevice-a").await.unwrap().unwrap();

        assert!(inventory.deactivate_by_uuid("blockdevice-a").await.unwrap());
        assert!(!inventory.deactivate_by_uuid("blockdevice-missing").await.unwrap());

        let after = store.get("blockdevice-a").await.unwrap().unwrap();
        assert_eq!(after.state(), DeviceState::Inactive);
        assert_eq!(after.uuid(), before.uuid());
        assert_eq!(after.spec, before.spec);
        assert_eq!(after.claim_state(), before.claim_state());
    }

    #[tokio::test]
    async fn test_list_scopes_and_opt_out() {
        let (store, inventory) = inventory();
        inventory
            .create(&inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1)))
            .await
            .unwrap();
        let other = Inventory::new(store.clone(), "node-2", "openebs");
        other
            .create(&other.to_resource(&record("blockdevice-b", "/dev/sdb", 1)))
            .await
            .unwrap();
        let mut opted_out = inventory.to_resource(&record("blockdevice-c", "/dev/sdc", 1));
        opted_out.set_annotation(RECONCILE_ANNOTATION, "false");
        inventory.create(&opted_out).await.unwrap();

        let local = inventory.list(false).await.unwrap();
        assert_eq!(local.len(), 1);
        assert_eq!(local[0].uuid(), "blockdevice-a");
        assert_eq!(inventory.list(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deactivate_stale_and_mark_unknown() {
        let (store, inventory) = inventory();
        for uuid in ["blockdevice-a", "blockdevice-b"] {
            inventory
                .create(&inventory.to_resource(&record(uuid, "/dev/sdb", 1)))
                .await
                .unwrap();
        }

        let observed: HashSet<String> = ["blockdevice-a".to_string()].into();
        assert_eq!(inventory.deactivate_stale(&observed).await.unwrap(), 1);
        assert_eq!(
            store.get("blockdevice-a").await.unwrap().unwrap().state(),
            DeviceState::Active
        );
        assert_eq!(
            store.get("blockdevice-b").await.unwrap().unwrap().state(),
            DeviceState::Inactive
        );
        // Already inactive, nothing to do
        assert_eq!(inventory.deactivate_stale(&observed).await.unwrap(), 0);

        inventory.mark_unknown().await.unwrap();
        assert!(store.snapshot().iter().all(|d| d.state() == DeviceState::Unknown));
    }

    #[tokio::test]
    async fn test_find_by_annotation() {
        let (_store, inventory) = inventory();
        let mut device = inventory.to_resource(&record("blockdevice-a", "/dev/sdb", 1));
        device.set_annotation(FS_UUID_ANNOTATION, "fs-1");
        inventory.create(&device).await.unwrap();

        let found = inventory.find_by_annotation(FS_UUID_ANNOTATION, "fs-1").await.unwrap();
        assert_eq!(found.map(|d| d.uuid().to_string()), Some("blockdevice-a".into()));
        assert!(inventory.find_by_annotation(FS_UUID_ANNOTATION, "").await.unwrap().is_none());
    }
}
