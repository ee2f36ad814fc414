//! Device Events
//!
//! Observations produced by full scans and the host watcher, consumed in
//! arrival order by the reconciler's event loop.

use crate::domain::DeviceRecord;
use serde::{Deserialize, Serialize};

/// Kind of observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Add,
    Remove,
    Change,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Add => write!(f, "add"),
            EventAction::Remove => write!(f, "remove"),
            EventAction::Change => write!(f, "change"),
        }
    }
}

/// Events delivered to the reconciler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Devices attached, or every device seen by a full scan
    Add {
        devices: Vec<DeviceRecord>,
        /// Restrict enrichment to these probe keys; empty runs all probes
        probes: Vec<String>,
    },

    /// Devices detached; records carry the last cached state
    Remove { devices: Vec<DeviceRecord> },

    /// Devices whose attributes may have changed
    Change {
        devices: Vec<DeviceRecord>,
        probes: Vec<String>,
        /// Apply to every device in the hierarchy cache instead of `devices`
        all_devices: bool,
    },
}

impl DeviceEvent {
    pub fn add(devices: Vec<DeviceRecord>) -> Self {
        DeviceEvent::Add {
            devices,
            probes: Vec::new(),
        }
    }

    pub fn remove(devices: Vec<DeviceRecord>) -> Self {
        DeviceEvent::Remove { devices }
    }

    /// Change event for every cached device, restricted to some probes
    pub fn change_all(probes: &[&str]) -> Self {
        DeviceEvent::Change {
            devices: Vec::new(),
            probes: probes.iter().map(|p| p.to_string()).collect(),
            all_devices: true,
        }
    }

    pub fn action(&self) -> EventAction {
        match self {
            DeviceEvent::Add { .. } => EventAction::Add,
            DeviceEvent::Remove { .. } => EventAction::Remove,
            DeviceEvent::Change { .. } => EventAction::Change,
        }
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        match self {
            DeviceEvent::Add { devices, .. }
            | DeviceEvent::Remove { devices }
            | DeviceEvent::Change { devices, .. } => devices,
        }
    }
}
