//! Probe Pipeline
//!
//! Probes enrich a raw device record with attributes from one source each
//! (udev, sysfs, smartctl, the mount table, on-disk signatures, tag rules).
//! They run in ascending priority order and, apart from the few fields a
//! probe is authoritative for, only fill fields that are still empty, so the
//! pipeline can be re-run on the same record.
//!
//! The registry is built once at startup from [`PROBE_DESCRIPTORS`] and the
//! optional configuration file.

pub mod custom_tag;
pub mod mount;
pub mod smart;
pub mod sysfs;
pub mod udev;
pub mod used_by;

pub use custom_tag::CustomTagProbe;
pub use mount::MountProbe;
pub use smart::SmartProbe;
pub use sysfs::SysfsProbe;
pub use udev::UdevProbe;
pub use used_by::UsedByProbe;

use crate::config::NodeDiskManagerConfig;
use crate::domain::DeviceRecord;
use crate::hardware::discovery::{HostPaths, SysfsScanner};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Probe Trait
// =============================================================================

/// A single source of device attributes
pub trait Probe: Send + Sync {
    /// One-time initialization before the first `fill_details`
    fn start(&mut self) {}

    /// Fill the fields this probe knows about
    fn fill_details(&self, record: &mut DeviceRecord);
}

/// Shared state handed to every probe at construction
#[derive(Clone)]
pub struct ProbeContext {
    pub paths: HostPaths,
    pub scanner: Arc<SysfsScanner>,
    pub config: Option<NodeDiskManagerConfig>,
}

impl ProbeContext {
    pub fn new(scanner: Arc<SysfsScanner>, config: Option<NodeDiskManagerConfig>) -> Self {
        Self {
            paths: scanner.paths().clone(),
            scanner,
            config,
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

/// Compiled-in description of a probe
pub struct ProbeDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub priority: u32,
    pub enabled: bool,
    pub build: fn(&ProbeContext) -> Box<dyn Probe>,
}

/// Every probe the daemon knows, in registration order
pub const PROBE_DESCRIPTORS: &[ProbeDescriptor] = &[
    ProbeDescriptor {
        key: udev::KEY,
        name: "udev probe",
        priority: 1,
        enabled: true,
        build: |ctx: &ProbeContext| -> Box<dyn Probe> { Box::new(UdevProbe::new(ctx.paths.clone())) },
    },
    ProbeDescriptor {
        key: sysfs::KEY,
        name: "sysfs probe",
        priority: 2,
        enabled: true,
        build: |ctx: &ProbeContext| -> Box<dyn Probe> { Box::new(SysfsProbe::new(ctx.paths.clone())) },
    },
    ProbeDescriptor {
        key: smart::KEY,
        name: "smart probe",
        priority: 3,
        enabled: true,
        build: |_: &ProbeContext| -> Box<dyn Probe> { Box::new(SmartProbe::new()) },
    },
    ProbeDescriptor {
        key: mount::KEY,
        name: "mount probe",
        priority: 4,
        enabled: true,
        build: |ctx: &ProbeContext| -> Box<dyn Probe> { Box::new(MountProbe::new(ctx.paths.clone())) },
    },
    ProbeDescriptor {
        key: used_by::KEY,
        name: "used-by probe",
        priority: 4,
        enabled: true,
        build: |ctx: &ProbeContext| -> Box<dyn Probe> { Box::new(UsedByProbe::new(ctx.scanner.clone())) },
    },
    ProbeDescriptor {
        key: custom_tag::KEY,
        name: "Custom Tag Probe",
        priority: 7,
        enabled: true,
        build: |ctx: &ProbeContext| -> Box<dyn Probe> {
            let tags = ctx.config.as_ref().map(|c| c.tagconfigs.as_slice()).unwrap_or(&[]);
            Box::new(CustomTagProbe::from_config(tags))
        },
    },
];

/// A probe together with its effective name, priority and state
#[derive(Clone)]
pub struct RegisteredProbe {
    pub key: String,
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub probe: Arc<dyn Probe>,
}

impl std::fmt::Debug for RegisteredProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProbe")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// =============================================================================
// Probe Registry
// =============================================================================

/// Ordered set of probes guarded by a single lock
#[derive(Default)]
pub struct ProbeRegistry {
    probes: Mutex<Vec<RegisteredProbe>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every compiled-in probe, applying config overrides
    pub fn from_context(ctx: &ProbeContext) -> Self {
        let registry = Self::new();
        for descriptor in PROBE_DESCRIPTORS {
            let overrides = ctx.config.as_ref().and_then(|c| c.probe(descriptor.key));
            let name = overrides
                .map(|o| o.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| descriptor.name.to_string());
            let enabled = overrides.map_or(descriptor.enabled, |o| o.state.is_enabled());

            let mut probe = (descriptor.build)(ctx);
            if enabled {
                probe.start();
            }
            registry.register(RegisteredProbe {
                key: descriptor.key.to_string(),
                name,
                priority: descriptor.priority,
                enabled,
                probe: Arc::from(probe),
            });
        }
        registry
    }

    pub fn register(&self, probe: RegisteredProbe) {
        info!(
            probe = %probe.name,
            priority = probe.priority,
            enabled = probe.enabled,
            "registered probe"
        );
        self.probes.lock().push(probe);
    }

    /// Enabled probes in ascending priority order, optionally limited to
    /// the given keys; equal priorities keep registration order
    pub fn list_active(&self, subset: Option<&[String]>) -> Vec<RegisteredProbe> {
        let mut active: Vec<RegisteredProbe> = self
            .probes
            .lock()
            .iter()
            .filter(|p| p.enabled)
            .filter(|p| subset.map_or(true, |keys| keys.iter().any(|k| k == &p.key)))
            .cloned()
            .collect();
        active.sort_by_key(|p| p.priority);
        active
    }

    /// Run the selected probes over a record in order
    pub fn fill_details(&self, record: &mut DeviceRecord, subset: Option<&[String]>) {
        for registered in self.list_active(subset) {
            debug!(device = %record.dev_path, probe = %registered.name, "filling details");
            registered.probe.fill_details(record);
        }
    }

    pub fn len(&self) -> usize {
        self.probes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.lock().is_empty()
    }
}
