//! os disk exclude filter: keeps the disks backing the host's system
//! mounts (and every partition on them) out of inventory.

use crate::domain::DeviceRecord;
use crate::filter::Filter;
use crate::hardware::discovery::{MountTable, SysfsScanner};
use regex::Regex;
use std::sync::Arc;
use tracing::{error, info, warn};

pub const KEY: &str = "os-disk-exclude-filter";

pub const DEFAULT_EXCLUDE_MOUNT_POINTS: &str = "/,/etc/hosts";

pub struct OsDiskExcludeFilter {
    scanner: Arc<SysfsScanner>,
    mount_points: Vec<String>,
    excluded: Vec<Regex>,
}

impl OsDiskExcludeFilter {
    pub fn new(scanner: Arc<SysfsScanner>, mount_points: Vec<String>) -> Self {
        Self {
            scanner,
            mount_points,
            excluded: Vec::new(),
        }
    }

    /// Pattern matching a disk and any of its partitions by kernel name
    fn disk_pattern(disk: &str) -> Result<Regex, regex::Error> {
        let suffix = if disk.ends_with(|c: char| c.is_ascii_digit()) {
            "(p[0-9]+)?"
        } else {
            "([0-9]+)?"
        };
        Regex::new(&format!("^{}{}$", regex::escape(disk), suffix))
    }

    fn resolve(&self, table: &MountTable) -> Vec<Regex> {
        let mut excluded = Vec::new();
        for mount_point in &self.mount_points {
            let Some(source) = table.source_of(mount_point) else {
                warn!(mount_point = %mount_point, "no block device backs mount point");
                continue;
            };
            let name = source.rsplit('/').next().unwrap_or(source);
            let disk = self
                .scanner
                .parent_disk(name)
                .unwrap_or_else(|| name.to_string());
            match Self::disk_pattern(&disk) {
                Ok(pattern) => {
                    info!(mount_point = %mount_point, disk = %disk, "excluding os disk");
                    excluded.push(pattern);
                }
                Err(e) => error!(disk = %disk, "invalid os disk pattern: {}", e),
            }
        }
        excluded
    }
}

impl Filter for OsDiskExcludeFilter {
    fn start(&mut self) {
        match MountTable::read_host(self.scanner.paths()) {
            Ok(table) => self.excluded = self.resolve(&table),
            Err(e) => error!("unable to read mount table, os disks not excluded: {}", e),
        }
    }

    fn include(&self, _record: &DeviceRecord) -> bool {
        true
    }

    fn exclude(&self, record: &DeviceRecord) -> bool {
        let name = record.name();
        !self.excluded.iter().any(|pattern| pattern.is_match(name))
    }
}
