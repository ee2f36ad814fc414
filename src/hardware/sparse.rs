//! Sparse Test Devices
//!
//! Simulated disks for clusters without spare hardware. When a sparse
//! directory is configured, `<i>-ndm-sparse.img` files are created there and
//! reported as BlockDevice resources of type `sparse`.

use crate::domain::{DeviceRecord, DeviceType};
use crate::error::{Error, Result};
use crate::identity::IdentityResolver;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const SPARSE_FILE_NAME: &str = "ndm-sparse.img";
pub const SPARSE_FILE_DEFAULT_SIZE: u64 = 1024 * 1024 * 1024;
pub const SPARSE_FILE_MIN_SIZE: u64 = 1024 * 1024 * 1024;
pub const SPARSE_FILE_DEFAULT_COUNT: u32 = 1;

/// Sparse file settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseFileConfig {
    pub dir: Option<PathBuf>,
    pub size: u64,
    pub count: u32,
}

impl Default for SparseFileConfig {
    fn default() -> Self {
        Self {
            dir: None,
            size: SPARSE_FILE_DEFAULT_SIZE,
            count: SPARSE_FILE_DEFAULT_COUNT,
        }
    }
}

impl SparseFileConfig {
    pub fn new(dir: Option<PathBuf>, size: Option<u64>, count: Option<u32>) -> Self {
        let size = match size {
            None => SPARSE_FILE_DEFAULT_SIZE,
            Some(size) if size < SPARSE_FILE_MIN_SIZE => {
                info!(
                    "sparse file size {} is below the minimum, using {}",
                    size, SPARSE_FILE_MIN_SIZE
                );
                SPARSE_FILE_MIN_SIZE
            }
            Some(size) => size,
        };
        Self {
            dir,
            size,
            count: count.unwrap_or(SPARSE_FILE_DEFAULT_COUNT),
        }
    }

    /// Directory to use, `None` when unset or not an existing directory
    pub fn directory(&self) -> Option<&Path> {
        let dir = self.dir.as_deref()?;
        if dir.is_dir() {
            Some(dir)
        } else {
            info!("sparse file directory {} does not exist", dir.display());
            None
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.directory().is_some() && self.count > 0
    }

    /// Path of the i-th sparse file
    pub fn file_path(dir: &Path, index: u32) -> PathBuf {
        dir.join(format!("{}-{}", index, SPARSE_FILE_NAME))
    }
}

/// Create missing sparse files; returns each usable file with its size
pub fn ensure_sparse_files(config: &SparseFileConfig) -> Vec<(PathBuf, u64)> {
    let Some(dir) = config.directory() else {
        return Vec::new();
    };
    if config.count == 0 {
        info!("sparse file count is 0, skipping sparse files");
        return Vec::new();
    }

    let mut files = Vec::with_capacity(config.count as usize);
    for index in 0..config.count {
        let path = SparseFileConfig::file_path(dir, index);
        match create_if_missing(&path, config.size) {
            Ok(size) => files.push((path, size)),
            Err(e) => warn!("failed to create sparse file {}: {}", path.display(), e),
        }
    }
    files
}

fn create_if_missing(path: &Path, size: u64) -> Result<u64> {
    if let Ok(metadata) = fs::metadata(path) {
        info!("sparse file {} already exists", path.display());
        return Ok(metadata.len());
    }
    info!("creating sparse file {} of {} bytes", path.display(), size);
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.set_len(size)?;
    Ok(size)
}

/// UUIDs of every sparse file present in the directory
pub fn active_sparse_uuids(
    config: &SparseFileConfig,
    resolver: &IdentityResolver,
    node_name: &str,
) -> Vec<String> {
    let Some(dir) = config.directory() else {
        return Vec::new();
    };
    let pattern = format!("{}/*{}", dir.display(), SPARSE_FILE_NAME);
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .flatten()
            .map(|path| resolver.sparse_uuid(node_name, &path.to_string_lossy()))
            .collect(),
        Err(e) => {
            warn!("invalid sparse file pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// Device record describing a sparse file
pub fn sparse_record(
    resolver: &IdentityResolver,
    node_name: &str,
    path: &Path,
    size: u64,
) -> Result<DeviceRecord> {
    let dev_path = path
        .to_str()
        .ok_or_else(|| Error::Internal(format!("non UTF-8 sparse file path {}", path.display())))?;
    let mut record = DeviceRecord::new(dev_path);
    record.uuid = resolver.sparse_uuid(node_name, dev_path);
    record.attributes.device_type = DeviceType::Sparse;
    record.attributes.capacity = size;
    Ok(record)
}
