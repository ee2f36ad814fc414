//! Host Watcher
//!
//! Polls sysfs and the host mount table and turns the differences between
//! two polls into device events. The first poll only records a baseline;
//! the startup scan covers whatever was present at that point.

use crate::domain::{DeviceRecord, DeviceSource};
use crate::error::{Error, Result};
use crate::hardware::discovery::{MountTable, SysfsScanner};
use crate::hardware::registry::DeviceEvent;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Probe re-run when the mount table changes
pub const MOUNT_PROBE_KEY: &str = "mount-probe";

pub struct DeviceWatcher {
    scanner: Arc<SysfsScanner>,
    poll_interval: Duration,
    devices: Option<BTreeMap<String, DeviceRecord>>,
    mounts: Option<MountTable>,
}

impl DeviceWatcher {
    pub fn new(scanner: Arc<SysfsScanner>, poll_interval: Duration) -> Self {
        Self {
            scanner,
            poll_interval,
            devices: None,
            mounts: None,
        }
    }

    /// Compare the host against the previous poll
    pub fn poll(&mut self) -> Vec<DeviceEvent> {
        let mut events = Vec::new();

        match self.scanner.enumerate() {
            Ok(records) => {
                let current: BTreeMap<String, DeviceRecord> = records
                    .into_iter()
                    .map(|r| (r.dev_path.clone(), r))
                    .collect();

                if let Some(previous) = self.devices.as_ref() {
                    let removed: Vec<DeviceRecord> = previous
                        .iter()
                        .filter(|(path, _)| !current.contains_key(*path))
                        .map(|(_, record)| record.clone())
                        .collect();
                    let added: Vec<DeviceRecord> = current
                        .iter()
                        .filter(|(path, _)| !previous.contains_key(*path))
                        .map(|(_, record)| record.clone())
                        .collect();

                    if !removed.is_empty() {
                        info!("{} block devices detached", removed.len());
                        events.push(DeviceEvent::remove(removed));
                    }
                    if !added.is_empty() {
                        info!("{} block devices attached", added.len());
                        events.push(DeviceEvent::add(added));
                    }
                }
                self.devices = Some(current);
            }
            Err(e) => warn!("sysfs poll failed: {}", e),
        }

        match MountTable::read_host(self.scanner.paths()) {
            Ok(table) => {
                if let Some(previous) = self.mounts.as_ref() {
                    if previous != &table {
                        debug!("mount table changed");
                        events.push(DeviceEvent::change_all(&[MOUNT_PROBE_KEY]));
                    }
                }
                self.mounts = Some(table);
            }
            Err(e) => debug!("mount table poll failed: {}", e),
        }

        events
    }

    /// Poll until cancelled, forwarding events to the reconciler
    pub async fn run(
        mut self,
        events: mpsc::Sender<DeviceEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!("Device watcher polling every {:?}", self.poll_interval);
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Device watcher shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    for event in self.poll() {
                        events.send(event).await.map_err(|_| Error::QueueClosed)?;
                    }
                }
            }
        }
    }
}
