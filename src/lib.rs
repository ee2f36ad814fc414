//! Node Device Manager
//!
//! Maintains an identity-stable inventory of the block devices attached to a
//! node as BlockDevice resources, so storage engines can claim them.
//!
//! # Pipeline
//!
//! ```text
//!  sysfs / udev / mounts
//!          │
//!          ▼
//!  ┌───────────────┐   ┌───────────────┐   ┌───────────────┐   ┌───────────────┐
//!  │    Probes     │──►│   Hierarchy   │──►│    Filters    │──►│   Identity    │
//!  │ (enrichment)  │   │     Cache     │   │  (predicates) │   │   Resolver    │
//!  └───────────────┘   └───────────────┘   └───────────────┘   └───────┬───────┘
//!                                                                      │
//!                                                                      ▼
//!                                                        ┌──────────────────────────┐
//!                                                        │ Inventory (create/update/ │
//!                                                        │  deactivate BlockDevice)  │
//!                                                        └──────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reconciler`]: add/change/remove handlers, full scan, event loop
//! - [`identity`]: stable device identifiers
//! - [`probe`]: ordered enrichment pipeline
//! - [`filter`]: ordered include/exclude predicates
//! - [`hardware`]: discovery, hierarchy cache, partitioner, sparse files
//! - [`store`]: BlockDevice store adapters and write rules
//! - [`crd`]: the BlockDevice custom resource
//! - [`domain`]: device records and ports
//! - [`config`]: configuration file and feature gates
//! - [`error`]: error types and handling

pub mod cli;
pub mod config;
pub mod crd;
pub mod domain;
pub mod error;
pub mod filter;
pub mod hardware;
pub mod identity;
pub mod probe;
pub mod reconciler;
pub mod store;

// Re-export commonly used types
pub use crd::{BlockDevice, BlockDeviceSpec, BlockDeviceStatus, ClaimState, DeviceState};

pub use domain::{DeviceRecord, DeviceSource, DeviceStore, DeviceType, Disk, DiskPartitioner};

pub use error::{Error, ErrorAction, Result};

pub use hardware::{DeviceEvent, HierarchyCache};

pub use identity::IdentityResolver;

pub use reconciler::{Controller, ControllerParts, EventLoop};

pub use store::{InMemoryDeviceStore, Inventory, KubeDeviceStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
