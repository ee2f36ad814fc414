//! Hardware Discovery Module
//!
//! Reads block device facts from the host: sysfs enumeration, the udev
//! database, the mount table, smartctl, and on-disk signatures.

pub mod mounts;
pub mod scanner;
pub mod signature;
pub mod smartctl;
pub mod udev_db;
pub mod watcher;

pub use mounts::*;
pub use scanner::*;
pub use signature::*;
pub use smartctl::*;
pub use udev_db::*;
pub use watcher::*;

use std::path::PathBuf;

/// Host locations read during discovery; overridable for tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    /// Root of sysfs
    pub sysfs: PathBuf,
    /// udev database directory
    pub udev_data: PathBuf,
    /// Device node directory
    pub dev: PathBuf,
    /// Mount table of the host's init process
    pub host_mounts: PathBuf,
    /// Mount table of this process, used when the host's is unavailable
    pub self_mounts: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sysfs: PathBuf::from("/sys"),
            udev_data: PathBuf::from("/run/udev/data"),
            dev: PathBuf::from("/dev"),
            host_mounts: PathBuf::from("/host/proc/1/mounts"),
            self_mounts: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl HostPaths {
    /// Directory listing every block device
    pub fn class_block(&self) -> PathBuf {
        self.sysfs.join("class/block")
    }

    /// Sysfs directory of a device by kernel name
    pub fn block_device(&self, name: &str) -> PathBuf {
        self.class_block().join(name)
    }

    /// Device node path of a kernel name, as reported to the store
    pub fn dev_node(&self, name: &str) -> String {
        format!("{}/{}", self.dev.display(), name)
    }
}
