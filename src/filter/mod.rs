//! Filter Pipeline
//!
//! Filters decide whether an enriched device is managed. A device passes
//! only if every enabled filter both includes it and does not exclude it.
//! `include` returns true when the device is on the allow list (or there is
//! none); `exclude` returns true when the device is NOT on the deny list.

pub mod os_disk;
pub mod path;
pub mod validity;
pub mod vendor;

pub use os_disk::OsDiskExcludeFilter;
pub use path::PathFilter;
pub use validity::DeviceValidityFilter;
pub use vendor::VendorFilter;

use crate::config::{FilterConfig, NodeDiskManagerConfig};
use crate::domain::DeviceRecord;
use crate::hardware::discovery::SysfsScanner;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Filter Trait
// =============================================================================

pub trait Filter: Send + Sync {
    /// One-time initialization before the first evaluation
    fn start(&mut self) {}

    /// True when the device is on the allow list, or there is none
    fn include(&self, record: &DeviceRecord) -> bool;

    /// True when the device is not on the deny list
    fn exclude(&self, record: &DeviceRecord) -> bool;
}

/// Shared state handed to every filter at construction
#[derive(Clone)]
pub struct FilterContext {
    pub scanner: Arc<SysfsScanner>,
    pub config: Option<NodeDiskManagerConfig>,
}

impl FilterContext {
    pub fn new(scanner: Arc<SysfsScanner>, config: Option<NodeDiskManagerConfig>) -> Self {
        Self { scanner, config }
    }
}

/// Split a comma separated match list, dropping empty entries
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Case-insensitive substring match against any entry
pub fn matches_any_substring(entries: &[String], value: &str) -> bool {
    let value = value.to_lowercase();
    entries.iter().any(|e| value.contains(&e.to_lowercase()))
}

/// Case-insensitive equality against any entry
pub fn matches_any_exact(entries: &[String], value: &str) -> bool {
    entries.iter().any(|e| e.eq_ignore_ascii_case(value))
}

// =============================================================================
// Registration
// =============================================================================

/// Compiled-in description of a configurable filter
pub struct FilterDescriptor {
    pub key: &'static str,
    pub name: &'static str,
    pub enabled: bool,
    pub include: &'static str,
    pub exclude: &'static str,
    pub build: fn(&FilterContext, &FilterConfig) -> Box<dyn Filter>,
}

/// Configurable filters, in evaluation order after the validity filter
pub const FILTER_DESCRIPTORS: &[FilterDescriptor] = &[
    FilterDescriptor {
        key: os_disk::KEY,
        name: "os disk exclude filter",
        enabled: true,
        include: "",
        exclude: os_disk::DEFAULT_EXCLUDE_MOUNT_POINTS,
        build: |ctx: &FilterContext, cfg: &FilterConfig| -> Box<dyn Filter> {
            Box::new(OsDiskExcludeFilter::new(ctx.scanner.clone(), split_list(&cfg.exclude)))
        },
    },
    FilterDescriptor {
        key: vendor::KEY,
        name: "vendor filter",
        enabled: true,
        include: "",
        exclude: "",
        build: |_: &FilterContext, cfg: &FilterConfig| -> Box<dyn Filter> {
            Box::new(VendorFilter::new(split_list(&cfg.include), split_list(&cfg.exclude)))
        },
    },
    FilterDescriptor {
        key: path::KEY,
        name: "path filter",
        enabled: true,
        include: "",
        exclude: path::DEFAULT_EXCLUDE_PATHS,
        build: |_: &FilterContext, cfg: &FilterConfig| -> Box<dyn Filter> {
            Box::new(PathFilter::new(split_list(&cfg.include), split_list(&cfg.exclude)))
        },
    },
];

#[derive(Clone)]
pub struct RegisteredFilter {
    pub key: String,
    pub name: String,
    pub enabled: bool,
    pub filter: Arc<dyn Filter>,
}

impl std::fmt::Debug for RegisteredFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredFilter")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// =============================================================================
// Filter Registry
// =============================================================================

/// Ordered set of filters guarded by a single lock
#[derive(Default)]
pub struct FilterRegistry {
    filters: Mutex<Vec<RegisteredFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The always-on validity filter followed by the configurable filters
    pub fn from_context(ctx: &FilterContext) -> Self {
        let registry = Self::new();

        let mut validity = DeviceValidityFilter::new();
        validity.start();
        registry.register(RegisteredFilter {
            key: validity::KEY.to_string(),
            name: "device validity filter".to_string(),
            enabled: true,
            filter: Arc::new(validity),
        });

        for descriptor in FILTER_DESCRIPTORS {
            let config = ctx
                .config
                .as_ref()
                .and_then(|c| c.filter(descriptor.key))
                .cloned();
            let (name, enabled, effective) = match config {
                Some(config) => {
                    let name = if config.name.is_empty() {
                        descriptor.name.to_string()
                    } else {
                        config.name.clone()
                    };
                    (name, config.state.is_enabled(), config)
                }
                None => (
                    descriptor.name.to_string(),
                    descriptor.enabled,
                    FilterConfig {
                        key: descriptor.key.to_string(),
                        include: descriptor.include.to_string(),
                        exclude: descriptor.exclude.to_string(),
                        ..Default::default()
                    },
                ),
            };

            let mut filter = (descriptor.build)(ctx, &effective);
            if enabled {
                filter.start();
            }
            registry.register(RegisteredFilter {
                key: descriptor.key.to_string(),
                name,
                enabled,
                filter: Arc::from(filter),
            });
        }
        registry
    }

    pub fn register(&self, filter: RegisteredFilter) {
        info!(filter = %filter.name, enabled = filter.enabled, "registered filter");
        self.filters.lock().push(filter);
    }

    /// Enabled filters in registration order
    pub fn list_active(&self) -> Vec<RegisteredFilter> {
        self.filters
            .lock()
            .iter()
            .filter(|f| f.enabled)
            .cloned()
            .collect()
    }

    /// True when every enabled filter accepts the device
    pub fn apply_filters(&self, record: &DeviceRecord) -> bool {
        for registered in self.list_active() {
            let filter = &registered.filter;
            if !(filter.include(record) && filter.exclude(record)) {
                debug!(device = %record.dev_path, filter = %registered.name, "device rejected");
                return false;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.filters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PluginState;
    use crate::hardware::discovery::scanner::testutil::FakeHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        include: bool,
        exclude: bool,
        calls: Arc<AtomicUsize>,
    }

    impl Filter for Fixed {
        fn include(&self, _: &DeviceRecord) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.include
        }

        fn exclude(&self, _: &DeviceRecord) -> bool {
            self.exclude
        }
    }

    fn fixed(key: &str, include: bool, exclude: bool, calls: &Arc<AtomicUsize>) -> RegisteredFilter {
        RegisteredFilter {
            key: key.to_string(),
            name: key.to_string(),
            enabled: true,
            filter: Arc::new(Fixed {
                include,
                exclude,
                calls: calls.clone(),
            }),
        }
    }

    #[test]
    fn test_apply_filters_short_circuits() {
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let c_calls = Arc::new(AtomicUsize::new(0));

        let registry = FilterRegistry::new();
        registry.register(fixed("a", true, true, &a_calls));
        registry.register(fixed("b", true, false, &b_calls));
        registry.register(fixed("c", true, true, &c_calls));

        assert!(!registry.apply_filters(&DeviceRecord::new("/dev/sdb")));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_split_and_match_helpers() {
        assert_eq!(split_list("loop, fd0,,"), vec!["loop", "fd0"]);
        assert!(split_list("").is_empty());

        let entries = split_list("LOOP");
        assert!(matches_any_substring(&entries, "/dev/loop0"));
        assert!(!matches_any_exact(&entries, "/dev/loop0"));
        assert!(matches_any_exact(&split_list("Samsung"), "SAMSUNG"));
    }

    #[test]
    fn test_from_context_defaults_and_overrides() {
        let host = FakeHost::new();
        let scanner = Arc::new(SysfsScanner::with_paths(host.paths.clone()));

        let registry = FilterRegistry::from_context(&FilterContext::new(scanner.clone(), None));
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.list_active().len(), 4);

        let mut record = DeviceRecord::new("/dev/loop0");
        record.attributes.capacity = 1024;
        assert!(!registry.apply_filters(&record));
        record.dev_path = "/dev/sdb".into();
        assert!(registry.apply_filters(&record));

        let config = NodeDiskManagerConfig {
            filterconfigs: vec![FilterConfig {
                key: path::KEY.to_string(),
                name: "path filter".to_string(),
                state: PluginState::Text("false".to_string()),
                include: String::new(),
                exclude: "loop".to_string(),
            }],
            ..Default::default()
        };
        let registry = FilterRegistry::from_context(&FilterContext::new(scanner, Some(config)));
        assert_eq!(registry.list_active().len(), 3);
        record.dev_path = "/dev/loop0".into();
        assert!(registry.apply_filters(&record));
    }
}
