//! Event Loop
//!
//! Single consumer of the device event queue. Events are handled one at a
//! time in arrival order; a periodic resync optionally queues a full scan.

use crate::error::{Error, Result};
use crate::hardware::registry::DeviceEvent;
use crate::reconciler::Controller;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct EventLoop {
    controller: Controller,
    events: mpsc::Receiver<DeviceEvent>,
    resync: Option<Duration>,
}

impl EventLoop {
    pub fn new(controller: Controller, events: mpsc::Receiver<DeviceEvent>) -> Self {
        Self {
            controller,
            events,
            resync: None,
        }
    }

    /// Queue a full scan every `period`; zero disables resync
    pub fn with_resync(mut self, period: Duration) -> Self {
        self.resync = (!period.is_zero()).then_some(period);
        self
    }

    /// Handle one event to completion
    pub async fn dispatch(&self, event: DeviceEvent) {
        debug!(action = %event.action(), devices = event.devices().len(), "processing event");
        match event {
            DeviceEvent::Add { devices, probes } => {
                self.controller.handle_add_event(devices, &probes).await
            }
            DeviceEvent::Remove { devices } => self.controller.handle_remove_event(devices).await,
            DeviceEvent::Change {
                devices,
                probes,
                all_devices,
            } => {
                self.controller
                    .handle_change_event(devices, &probes, all_devices)
                    .await
            }
        }
    }

    /// Consume events until cancelled or the queue closes
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Event loop started");
        // Only polled when resync is enabled
        let period = self.resync.unwrap_or(Duration::from_secs(365 * 24 * 3600));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Event loop shutting down");
                    return Ok(());
                }
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        error!("device event queue closed");
                        return Err(Error::QueueClosed);
                    }
                },
                _ = ticker.tick(), if self.resync.is_some() => {
                    debug!("periodic resync");
                    self.controller.request_rescan();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeviceState;
    use crate::domain::{DeviceRecord, DeviceStore};
    use crate::reconciler::testutil::*;

    #[tokio::test]
    async fn test_dispatch_attach_then_detach() {
        let h = harness(gpt_enabled());
        let record = disk("/dev/sdb", "5000");
        let uuid = h.controller.resolver.resolve(&record).unwrap();
        let event_loop = EventLoop::new(h.controller.clone(), h.events);

        event_loop.dispatch(DeviceEvent::add(vec![record])).await;
        let stored = h.store.get(&uuid).await.unwrap().unwrap();
        assert_eq!(stored.state(), DeviceState::Active);

        event_loop
            .dispatch(DeviceEvent::remove(vec![DeviceRecord::new("/dev/sdb")]))
            .await;
        let stored = h.store.get(&uuid).await.unwrap().unwrap();
        assert_eq!(stored.state(), DeviceState::Inactive);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let h = harness(gpt_enabled());
        let event_loop = EventLoop::new(h.controller.clone(), h.events).with_resync(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(event_loop.run(cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_rescan_results_are_processed() {
        let h = harness(gpt_enabled());
        let record = disk("/dev/sdb", "5000");
        let uuid = h.controller.resolver.resolve(&record).unwrap();
        *h.source.records.lock() = vec![record];

        let controller = h.controller.clone();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(EventLoop::new(h.controller, h.events).run(cancel.clone()));

        controller.rescan().await.unwrap();
        let mut published = None;
        for _ in 0..100 {
            published = h.store.get(&uuid).await.unwrap();
            if published.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
        assert!(published.is_some());
    }
}
