//! Mount Table
//!
//! Parses `/proc/<pid>/mounts` style tables. The daemon runs in a container,
//! so the host's table is read through `/host/proc/1/mounts` when mounted.

use crate::error::Result;
use crate::hardware::discovery::HostPaths;
use std::fs;
use std::path::Path;
use tracing::debug;

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: String,
    pub fs_type: String,
}

/// Snapshot of the mount table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fs_type = fields.next()?;
                Some(MountEntry {
                    source: unescape(source),
                    target: unescape(target),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn read(path: &Path) -> Result<Self> {
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    /// Read the host table, falling back to this process's view
    pub fn read_host(paths: &HostPaths) -> Result<Self> {
        match Self::read(&paths.host_mounts) {
            Ok(table) => Ok(table),
            Err(e) => {
                debug!(
                    "host mount table {} unavailable ({}), using {}",
                    paths.host_mounts.display(),
                    e,
                    paths.self_mounts.display()
                );
                Self::read(&paths.self_mounts)
            }
        }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// All targets the device is mounted at, in table order
    pub fn mount_points(&self, dev_path: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.source == dev_path)
            .map(|e| e.target.clone())
            .collect()
    }

    /// Filesystem type of the first mount of a device
    pub fn fs_type(&self, dev_path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.source == dev_path)
            .map(|e| e.fs_type.as_str())
    }

    /// Block device backing a mount target, if any
    pub fn source_of(&self, target: &str) -> Option<&str> {
        // Later mounts shadow earlier ones on the same target
        self.entries
            .iter()
            .rev()
            .find(|e| e.target == target && e.source.starts_with("/dev/"))
            .map(|e| e.source.as_str())
    }
}

/// Decode the octal escapes the kernel uses for whitespace in paths
fn unescape(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
