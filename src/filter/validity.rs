//! device validity filter: rejects records that cannot become a resource.
//! Always enabled and not configurable.

use crate::domain::DeviceRecord;
use crate::filter::Filter;
use tracing::debug;

pub const KEY: &str = "device-validity-filter";

type Validation = fn(&DeviceRecord) -> bool;

#[derive(Default)]
pub struct DeviceValidityFilter {
    validations: Vec<Validation>,
}

impl DeviceValidityFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn valid_dev_path(record: &DeviceRecord) -> bool {
    if record.dev_path.is_empty() {
        debug!("device has an empty path");
        return false;
    }
    true
}

fn valid_capacity(record: &DeviceRecord) -> bool {
    if record.attributes.capacity == 0 {
        debug!(device = %record.dev_path, "device has zero capacity");
        return false;
    }
    true
}

fn valid_dm_device(record: &DeviceRecord) -> bool {
    if record.attributes.device_type.is_device_mapper() && record.device_mapper.uuid.is_empty() {
        debug!(device = %record.dev_path, "device-mapper device without DM UUID");
        return false;
    }
    true
}

fn valid_partition(record: &DeviceRecord) -> bool {
    if record.is_partition() && record.partition.entry_uuid.is_empty() {
        debug!(device = %record.dev_path, "partition without entry UUID");
        return false;
    }
    true
}

impl Filter for DeviceValidityFilter {
    fn start(&mut self) {
        self.validations = vec![valid_dev_path, valid_capacity, valid_dm_device, valid_partition];
    }

    fn include(&self, _record: &DeviceRecord) -> bool {
        true
    }

    fn exclude(&self, record: &DeviceRecord) -> bool {
        self.validations.iter().all(|valid| valid(record))
    }
}
