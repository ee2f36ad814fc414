//! Reconciler
//!
//! Turns device observations into BlockDevice writes. One `Controller`
//! holds the shared context (store, registries, hierarchy cache, identity
//! resolver, partitioner) and exposes:
//!
//! - the per-event handlers in `add`, `change` and `delete`
//! - the legacy-identity upgrade check in `upgrade`
//! - `rescan`, the mutually exclusive full scan
//! - `event_loop`, the serial dispatcher fed by the device watcher

pub mod add;
pub mod change;
pub mod delete;
pub mod event_loop;
pub mod upgrade;

pub use event_loop::EventLoop;

use crate::config::{Feature, FeatureGates};
use crate::crd::BlockDevice;
use crate::domain::{DeviceRecord, DeviceSourceRef, DiskPartitionerRef};
use crate::error::{Error, Result};
use crate::filter::FilterRegistry;
use crate::hardware::registry::{DeviceEvent, HierarchyCache};
use crate::hardware::sparse::{active_sparse_uuids, ensure_sparse_files, sparse_record, SparseFileConfig};
use crate::identity::IdentityResolver;
use crate::probe::ProbeRegistry;
use crate::store::Inventory;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// Controller
// =============================================================================

/// Shared reconciler state; cheap to clone
#[derive(Clone)]
pub struct Controller {
    pub(crate) inventory: Inventory,
    pub(crate) resolver: IdentityResolver,
    pub(crate) probes: Arc<ProbeRegistry>,
    pub(crate) filters: Arc<FilterRegistry>,
    pub(crate) hierarchy: Arc<HierarchyCache>,
    pub(crate) source: DeviceSourceRef,
    pub(crate) partitioner: DiskPartitionerRef,
    pub(crate) features: FeatureGates,
    pub(crate) sparse: SparseFileConfig,
    /// Single permit; a scan that cannot take it fails fast
    scan_permit: Arc<Semaphore>,
    events: mpsc::Sender<DeviceEvent>,
}

/// Everything a controller is built from
pub struct ControllerParts {
    pub inventory: Inventory,
    pub resolver: IdentityResolver,
    pub probes: Arc<ProbeRegistry>,
    pub filters: Arc<FilterRegistry>,
    pub source: DeviceSourceRef,
    pub partitioner: DiskPartitionerRef,
    pub features: FeatureGates,
    pub sparse: SparseFileConfig,
}

impl Controller {
    /// Build a controller that queues its rescan results on `events`
    pub fn new(parts: ControllerParts, events: mpsc::Sender<DeviceEvent>) -> Self {
        Self {
            inventory: parts.inventory,
            resolver: parts.resolver,
            probes: parts.probes,
            filters: parts.filters,
            hierarchy: Arc::new(HierarchyCache::new()),
            source: parts.source,
            partitioner: parts.partitioner,
            features: parts.features,
            sparse: parts.sparse,
            scan_permit: Arc::new(Semaphore::new(1)),
            events,
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn hierarchy(&self) -> &HierarchyCache {
        &self.hierarchy
    }

    pub(crate) fn gpt_based_uuid(&self) -> bool {
        self.features.is_enabled(Feature::GptBasedUuid)
    }

    /// Resource for a record on this node
    pub(crate) fn resource_for(&self, record: &DeviceRecord) -> BlockDevice {
        self.inventory.to_resource(record)
    }

    /// Every identity a present device may be stored under
    fn candidate_uuids(&self, record: &DeviceRecord) -> Vec<String> {
        if !self.gpt_based_uuid() {
            return vec![self.resolver.resolve_legacy(record).uuid];
        }
        let mut uuids: Vec<String> = [
            self.resolver.resolve(record),
            self.resolver.resolve_from_partition_table(record),
        ]
        .into_iter()
        .flatten()
        .collect();
        uuids.push(self.resolver.resolve_legacy(record).uuid);
        uuids
    }

    // =========================================================================
    // Full Scan
    // =========================================================================

    /// Enumerate the host, rebuild the hierarchy cache, deactivate resources
    /// whose device is gone and queue one add event for everything seen
    #[instrument(skip(self))]
    pub async fn rescan(&self) -> Result<usize> {
        let _permit = self
            .scan_permit
            .try_acquire()
            .map_err(|_| Error::ScanInProgress)?;

        info!("starting full device scan");
        let records = self.source.enumerate()?;
        self.hierarchy.rebuild(records.iter().cloned());

        let mut observed: HashSet<String> = records
            .iter()
            .flat_map(|record| self.candidate_uuids(record))
            .collect();
        observed.extend(active_sparse_uuids(
            &self.sparse,
            &self.resolver,
            self.inventory.node_name(),
        ));

        let stale = self.inventory.deactivate_stale(&observed).await?;
        let count = records.len();
        info!(devices = count, deactivated = stale, "full device scan complete");

        self.events
            .send(DeviceEvent::add(records))
            .await
            .map_err(|_| Error::QueueClosed)?;
        Ok(count)
    }

    /// Run a full scan in the background
    pub(crate) fn request_rescan(&self) {
        let controller = self.clone();
        tokio::spawn(async move {
            match controller.rescan().await {
                Ok(_) => {}
                Err(Error::ScanInProgress) => debug!("rescan skipped, a scan is already running"),
                Err(e) => error!("rescan failed: {}", e),
            }
        });
    }

    // =========================================================================
    // Sparse Files
    // =========================================================================

    /// Create the configured sparse files and their resources
    pub async fn init_sparse_files(&self) -> Result<usize> {
        if !self.sparse.is_enabled() {
            debug!("sparse files disabled");
            return Ok(0);
        }
        let mut count = 0;
        for (path, size) in ensure_sparse_files(&self.sparse) {
            let record = sparse_record(&self.resolver, self.inventory.node_name(), &path, size)?;
            let device = self.resource_for(&record);
            let old = self.inventory.get(&record.uuid).await?;
            match self.inventory.push(&device, old).await {
                Ok(()) => count += 1,
                Err(e) => warn!(path = %path.display(), "unable to publish sparse file: {}", e),
            }
        }
        info!(count, "sparse files published");
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::domain::{Disk, DiskPartitioner, DeviceSource};
    use crate::filter::{DeviceValidityFilter, Filter, RegisteredFilter};
    use crate::store::InMemoryDeviceStore;
    use parking_lot::Mutex;

    /// Device source returning a fixed set of records
    #[derive(Default)]
    pub struct StaticSource {
        pub records: Mutex<Vec<DeviceRecord>>,
    }

    impl DeviceSource for StaticSource {
        fn enumerate(&self) -> Result<Vec<DeviceRecord>> {
            Ok(self.records.lock().clone())
        }
    }

    /// Partitioner that records the disks it was asked to partition
    #[derive(Default)]
    pub struct RecordingPartitioner {
        pub disks: Mutex<Vec<Disk>>,
    }

    impl DiskPartitioner for RecordingPartitioner {
        fn create_single_partition(&self, disk: &Disk) -> Result<()> {
            self.disks.lock().push(disk.clone());
            Ok(())
        }
    }

    pub struct Harness {
        pub controller: Controller,
        pub store: Arc<InMemoryDeviceStore>,
        pub source: Arc<StaticSource>,
        pub partitioner: Arc<RecordingPartitioner>,
        pub events: mpsc::Receiver<DeviceEvent>,
    }

    /// Controller over an in-memory store, with no probes and only the
    /// validity filter
    pub fn harness(features: FeatureGates) -> Harness {
        let store = Arc::new(InMemoryDeviceStore::new());
        let source = Arc::new(StaticSource::default());
        let partitioner = Arc::new(RecordingPartitioner::default());

        let filters = FilterRegistry::new();
        let mut validity = DeviceValidityFilter::new();
        validity.start();
        filters.register(RegisteredFilter {
            key: "device-validity-filter".into(),
            name: "device validity filter".into(),
            enabled: true,
            filter: Arc::new(validity),
        });

        let (tx, rx) = mpsc::channel(16);
        let controller = Controller::new(
            ControllerParts {
                inventory: Inventory::new(store.clone(), "node-1", "openebs"),
                resolver: IdentityResolver::new("node-1"),
                probes: Arc::new(ProbeRegistry::new()),
                filters: Arc::new(filters),
                source: source.clone(),
                partitioner: partitioner.clone(),
                features,
                sparse: SparseFileConfig::default(),
            },
            tx,
        );
        Harness {
            controller,
            store,
            source,
            partitioner,
            events: rx,
        }
    }

    pub fn gpt_enabled() -> FeatureGates {
        FeatureGates::all_enabled()
    }

    pub fn disk(path: &str, wwn: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new(path);
        record.attributes.device_type = crate::domain::DeviceType::Disk;
        record.attributes.capacity = 10 * 1024 * 1024 * 1024;
        record.attributes.logical_block_size = 512;
        record.attributes.wwn = wwn.to_string();
        record.attributes.id_type = "disk".into();
        record
    }
}
