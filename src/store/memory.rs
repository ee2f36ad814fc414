//! In-Memory Device Store
//!
//! DashMap-backed `DeviceStore` with the version-token rules of the
//! API server: `create` stamps version 1, `update` must carry the stored
//! version and bumps it. Drives reconciler tests without a cluster.

use crate::crd::{BlockDevice, BLOCK_DEVICE_KIND};
use crate::domain::{DeviceStore, LabelSelector};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Device store held entirely in process memory
#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: DashMap<String, BlockDevice>,
    /// Last version token handed out
    version: AtomicU64,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Snapshot of every stored resource, ordered by name
    pub fn snapshot(&self) -> Vec<BlockDevice> {
        let mut devices: Vec<BlockDevice> = self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by(|a, b| a.uuid().cmp(b.uuid()));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn name_of(device: &BlockDevice) -> Result<String> {
        device
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Internal("BlockDevice without a name".into()))
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn get(&self, name: &str) -> Result<Option<BlockDevice>> {
        Ok(self.devices.get(name).map(|e| e.value().clone()))
    }

    async fn list(&self, selector: &LabelSelector) -> Result<Vec<BlockDevice>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|d| selector.matches(d.metadata.labels.as_ref()))
            .collect())
    }

    async fn create(&self, device: &BlockDevice) -> Result<BlockDevice> {
        let name = Self::name_of(device)?;
        match self.devices.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::ResourceExists {
                kind: BLOCK_DEVICE_KIND.into(),
                name,
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let mut stored = device.clone();
                stored.metadata.resource_version = Some(self.next_version());
                slot.insert(stored.clone());
                Ok(stored)
            }
        }
    }

    async fn update(&self, device: &BlockDevice) -> Result<BlockDevice> {
        let name = Self::name_of(device)?;
        let mut entry = self.devices.get_mut(&name).ok_or_else(|| Error::ResourceNotFound {
            kind: BLOCK_DEVICE_KIND.into(),
            name: name.clone(),
        })?;

        // Test-harness simplification: a missing token writes unconditionally
        if let Some(version) = &device.metadata.resource_version {
            if entry.metadata.resource_version.as_ref() != Some(version) {
                return Err(Error::Conflict {
                    kind: BLOCK_DEVICE_KIND.into(),
                    name,
                });
            }
        }

        let mut stored = device.clone();
        stored.metadata.resource_version = Some(self.next_version());
        *entry = stored.clone();
        Ok(stored)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.devices
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::ResourceNotFound {
                kind: BLOCK_DEVICE_KIND.into(),
                name: name.to_string(),
            })
    }
}
