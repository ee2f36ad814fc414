//! smart probe: firmware, compliance and identity fallbacks via smartctl.

use crate::domain::{DeviceRecord, DeviceType};
use crate::hardware::discovery::Smartctl;
use crate::probe::Probe;
use tracing::{debug, info};

pub const KEY: &str = "smart-probe";

#[derive(Default)]
pub struct SmartProbe {
    available: bool,
}

impl SmartProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Probe for SmartProbe {
    fn start(&mut self) {
        self.available = Smartctl::is_available();
        if !self.available {
            info!("smartctl not found, smart probe will not report anything");
        }
    }

    fn fill_details(&self, record: &mut DeviceRecord) {
        if !self.available {
            return;
        }
        // Only whole physical devices answer identity queries
        if !matches!(
            record.attributes.device_type,
            DeviceType::Disk | DeviceType::Unknown
        ) {
            return;
        }
        match Smartctl::identity(&record.dev_path) {
            Ok(identity) => identity.apply(record),
            Err(e) => debug!(device = %record.dev_path, "{}", e),
        }
    }
}
