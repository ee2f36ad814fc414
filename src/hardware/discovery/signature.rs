//! On-disk Signatures
//!
//! Detects metadata that other software left on a device: the SPDK blobstore
//! superblock written by mayastor, partition tables and common filesystem
//! superblocks. Also reports whether the kernel holds a device open
//! exclusively.

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

const SPDK_SIGNATURE: &[u8; 8] = b"SPDKBLOB";

/// Bytes inspected for partition table and superblock signatures
const PROBE_LEN: usize = 68 * 1024;

/// Metadata found at the start of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    Mbr,
    Gpt,
    Ext,
    Xfs,
    Btrfs,
    SpdkBlobstore,
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signature::Mbr => write!(f, "mbr"),
            Signature::Gpt => write!(f, "gpt"),
            Signature::Ext => write!(f, "ext"),
            Signature::Xfs => write!(f, "xfs"),
            Signature::Btrfs => write!(f, "btrfs"),
            Signature::SpdkBlobstore => write!(f, "spdk-blobstore"),
        }
    }
}

/// Classify the leading bytes of a device
///
/// `logical_block_size` locates the GPT header in LBA 1.
pub fn detect_signature(head: &[u8], logical_block_size: usize) -> Option<Signature> {
    let at = |offset: usize, magic: &[u8]| -> bool {
        head.get(offset..offset + magic.len()) == Some(magic)
    };

    if at(0, SPDK_SIGNATURE) {
        return Some(Signature::SpdkBlobstore);
    }
    if at(0, b"XFSB") {
        return Some(Signature::Xfs);
    }
    if at(logical_block_size, b"EFI PART") {
        return Some(Signature::Gpt);
    }
    if at(1080, &[0x53, 0xEF]) {
        return Some(Signature::Ext);
    }
    if at(0x10040, b"_BHRfS_M") {
        return Some(Signature::Btrfs);
    }
    if at(510, &[0x55, 0xAA]) {
        return Some(Signature::Mbr);
    }
    None
}

/// Read the leading bytes of a device, shorter when the device is small
pub fn read_head(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(0))?;
    let mut head = Vec::with_capacity(PROBE_LEN);
    file.take(PROBE_LEN as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Whether the SPDK blobstore superblock is present
pub fn has_spdk_signature(path: &Path) -> Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 8];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(&magic == SPDK_SIGNATURE),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Whether the kernel holds the device open exclusively (mounted, imported
/// into a zpool, used by device-mapper, ...)
pub fn is_in_use_by_kernel(path: &Path) -> Result<bool> {
    let result = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_EXCL)
        .open(path);
    match result {
        Ok(_) => Ok(false),
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => Ok(true),
        Err(e) => Err(e.into()),
    }
}
