//! GPT Partitioner
//!
//! Writes a fresh GPT onto a disk that cannot otherwise be identified, with
//! one Linux filesystem partition spanning the usable area. The partition's
//! entry GUID then gives the device a stable identity on the next scan.
//!
//! # Layout
//!
//! ```text
//! LBA 0          protective MBR
//! LBA 1          primary GPT header
//! LBA 2..        128 partition entries (16 KiB)
//! 1 MiB          partition start
//! ...            partition end
//! last-N..last-1 backup partition entries
//! last           backup GPT header
//! ```

use crate::domain::{Disk, DiskPartitioner};
use crate::error::{Error, Result};
use crate::hardware::discovery::{detect_signature, read_head};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Sector size assumed when the device does not report one
pub const DEFAULT_LOGICAL_BLOCK_SIZE: u64 = 512;

/// Name written into the partition entry
pub const PARTITION_NAME: &str = "OpenEBS_NDM";

/// Linux filesystem data partition type
pub const LINUX_FS_TYPE_GUID: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

const PARTITION_ALIGNMENT: u64 = 1024 * 1024;
const ENTRY_COUNT: u32 = 128;
const ENTRY_SIZE: u32 = 128;
const ENTRIES_BYTES: u64 = ENTRY_COUNT as u64 * ENTRY_SIZE as u64;
const HEADER_SIZE: u32 = 92;
const GPT_REVISION: u32 = 0x0001_0000;
const PROTECTIVE_MBR_TYPE: u8 = 0xEE;

// =============================================================================
// Table Layout
// =============================================================================

/// Encoded GPT, ready to be written
#[derive(Debug, Clone)]
pub struct GptLayout {
    pub logical_block_size: u64,
    /// Protective MBR, primary header and entries, written at offset 0
    pub primary: Vec<u8>,
    /// Backup entries and header
    pub backup: Vec<u8>,
    pub backup_offset: u64,
    pub partition_first_lba: u64,
    pub partition_last_lba: u64,
    pub partition_guid: Uuid,
}

impl GptLayout {
    /// Lay out a single full-disk partition
    pub fn single_partition(disk: &Disk, disk_guid: Uuid, partition_guid: Uuid) -> Result<Self> {
        let lbs = if disk.logical_block_size == 0 {
            warn!(
                device = %disk.dev_path,
                "logical block size unknown, assuming {} bytes", DEFAULT_LOGICAL_BLOCK_SIZE
            );
            DEFAULT_LOGICAL_BLOCK_SIZE
        } else {
            disk.logical_block_size
        };

        let fail = |reason: String| Error::Partition {
            device: disk.dev_path.clone(),
            reason,
        };

        let total_lbas = disk.size / lbs;
        let entry_lbas = (ENTRIES_BYTES + lbs - 1) / lbs;
        let first_lba = PARTITION_ALIGNMENT / lbs;
        // Room for the backup entries and header at the end of the disk
        let last_lba = total_lbas
            .checked_sub(ENTRIES_BYTES / lbs + 1)
            .and_then(|v| v.checked_sub(1))
            .ok_or_else(|| fail(format!("disk of {} bytes is too small", disk.size)))?;
        if last_lba <= first_lba {
            return Err(fail(format!("disk of {} bytes is too small", disk.size)));
        }

        let disk_last_lba = total_lbas - 1;
        let backup_entries_lba = disk_last_lba - entry_lbas;
        let first_usable = 2 + entry_lbas;

        let type_guid = Uuid::parse_str(LINUX_FS_TYPE_GUID)
            .map_err(|e| fail(format!("invalid partition type: {}", e)))?;
        let entries = encode_entries(type_guid, partition_guid, first_lba, last_lba)?;
        let entries_crc = crc32fast::hash(&entries);

        let header = |current: u64, backup: u64, entries_at: u64| -> Result<Vec<u8>> {
            encode_header(&HeaderFields {
                current_lba: current,
                backup_lba: backup,
                first_usable_lba: first_usable,
                last_usable_lba: last_lba,
                disk_guid,
                entries_lba: entries_at,
                entries_crc,
            })
        };

        let block = lbs as usize;
        let mut primary = Vec::with_capacity(block * (2 + entry_lbas as usize));
        primary.extend_from_slice(&pad(protective_mbr(total_lbas), block));
        primary.extend_from_slice(&pad(header(1, disk_last_lba, 2)?, block));
        primary.extend_from_slice(&pad(entries.clone(), block * entry_lbas as usize));

        let mut backup = Vec::with_capacity(block * (1 + entry_lbas as usize));
        backup.extend_from_slice(&pad(entries, block * entry_lbas as usize));
        backup.extend_from_slice(&pad(header(disk_last_lba, 1, backup_entries_lba)?, block));

        Ok(Self {
            logical_block_size: lbs,
            primary,
            backup,
            backup_offset: backup_entries_lba * lbs,
            partition_first_lba: first_lba,
            partition_last_lba: last_lba,
            partition_guid,
        })
    }
}

struct HeaderFields {
    current_lba: u64,
    backup_lba: u64,
    first_usable_lba: u64,
    last_usable_lba: u64,
    disk_guid: Uuid,
    entries_lba: u64,
    entries_crc: u32,
}

fn encode_header(fields: &HeaderFields) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
    buf.write_all(b"EFI PART")?;
    buf.write_u32::<LittleEndian>(GPT_REVISION)?;
    buf.write_u32::<LittleEndian>(HEADER_SIZE)?;
    buf.write_u32::<LittleEndian>(0)?; // header CRC, patched below
    buf.write_u32::<LittleEndian>(0)?;
    buf.write_u64::<LittleEndian>(fields.current_lba)?;
    buf.write_u64::<LittleEndian>(fields.backup_lba)?;
    buf.write_u64::<LittleEndian>(fields.first_usable_lba)?;
    buf.write_u64::<LittleEndian>(fields.last_usable_lba)?;
    buf.write_all(&fields.disk_guid.to_bytes_le())?;
    buf.write_u64::<LittleEndian>(fields.entries_lba)?;
    buf.write_u32::<LittleEndian>(ENTRY_COUNT)?;
    buf.write_u32::<LittleEndian>(ENTRY_SIZE)?;
    buf.write_u32::<LittleEndian>(fields.entries_crc)?;

    let crc = crc32fast::hash(&buf);
    LittleEndian::write_u32(&mut buf[16..20], crc);
    Ok(buf)
}

fn encode_entries(type_guid: Uuid, partition_guid: Uuid, first_lba: u64, last_lba: u64) -> Result<Vec<u8>> {
    let mut entry = Vec::with_capacity(ENTRY_SIZE as usize);
    entry.write_all(&type_guid.to_bytes_le())?;
    entry.write_all(&partition_guid.to_bytes_le())?;
    entry.write_u64::<LittleEndian>(first_lba)?;
    entry.write_u64::<LittleEndian>(last_lba)?;
    entry.write_u64::<LittleEndian>(0)?;
    for unit in PARTITION_NAME.encode_utf16().take(36) {
        entry.write_u16::<LittleEndian>(unit)?;
    }

    let mut entries = pad(entry, ENTRY_SIZE as usize);
    entries.resize(ENTRIES_BYTES as usize, 0);
    Ok(entries)
}

/// MBR with one 0xEE partition covering the disk, so MBR-only tools leave
/// the GPT alone
fn protective_mbr(total_lbas: u64) -> Vec<u8> {
    let mut mbr = vec![0u8; 512];
    let entry = &mut mbr[446..462];
    entry[1..4].copy_from_slice(&[0x00, 0x02, 0x00]);
    entry[4] = PROTECTIVE_MBR_TYPE;
    entry[5..8].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
    LittleEndian::write_u32(&mut entry[8..12], 1);
    let sectors = (total_lbas - 1).min(u64::from(u32::MAX)) as u32;
    LittleEndian::write_u32(&mut entry[12..16], sectors);
    mbr[510] = 0x55;
    mbr[511] = 0xAA;
    mbr
}

fn pad(mut buf: Vec<u8>, len: usize) -> Vec<u8> {
    if buf.len() < len {
        buf.resize(len, 0);
    }
    buf
}

// =============================================================================
// Partitioner
// =============================================================================

/// Writes GPT tables directly to the device node
#[derive(Debug, Clone, Default)]
pub struct GptPartitioner;

impl GptPartitioner {
    pub fn new() -> Self {
        Self
    }

    fn write_layout(path: &Path, layout: &GptLayout) -> Result<()> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&layout.primary)?;
        file.seek(SeekFrom::Start(layout.backup_offset))?;
        file.write_all(&layout.backup)?;
        file.sync_all()?;
        // udev re-reads the partition table when the writer closes the node
        Ok(())
    }
}

impl DiskPartitioner for GptPartitioner {
    #[instrument(skip(self), fields(device = %disk.dev_path))]
    fn create_single_partition(&self, disk: &Disk) -> Result<()> {
        let path = Path::new(&disk.dev_path);
        let lbs = if disk.logical_block_size == 0 {
            DEFAULT_LOGICAL_BLOCK_SIZE
        } else {
            disk.logical_block_size
        };

        let head = read_head(path)?;
        if let Some(signature) = detect_signature(&head, lbs as usize) {
            return Err(Error::Partition {
                device: disk.dev_path.clone(),
                reason: format!("device already carries a {} signature", signature),
            });
        }

        let layout = GptLayout::single_partition(disk, Uuid::new_v4(), Uuid::new_v4())?;
        Self::write_layout(path, &layout)?;

        info!(
            partition_uuid = %layout.partition_guid,
            first_lba = layout.partition_first_lba,
            last_lba = layout.partition_last_lba,
            "created single partition"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::discovery::Signature;
    use assert_matches::assert_matches;
    use std::fs;

    const DISK_SIZE: u64 = 8 * 1024 * 1024;

    fn disk(path: &str, size: u64, lbs: u64) -> Disk {
        Disk {
            dev_path: path.to_string(),
            size,
            logical_block_size: lbs,
        }
    }

    #[test]
    fn test_layout_boundaries() {
        let layout =
            GptLayout::single_partition(&disk("/dev/sdc", DISK_SIZE, 512), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let sectors = DISK_SIZE / 512;

        assert_eq!(layout.partition_first_lba, 2048);
        assert_eq!(layout.partition_last_lba, sectors - 34);
        assert_eq!(layout.primary.len(), 512 * 34);
        assert_eq!(layout.backup_offset + layout.backup.len() as u64, DISK_SIZE);

        let layout =
            GptLayout::single_partition(&disk("/dev/sdc", DISK_SIZE, 4096), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(layout.partition_first_lba, 256);
        assert_eq!(layout.partition_last_lba, DISK_SIZE / 4096 - 6);
    }

    #[test]
    fn test_header_checksums() {
        let layout =
            GptLayout::single_partition(&disk("/dev/sdc", DISK_SIZE, 512), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        let header = &layout.primary[512..512 + HEADER_SIZE as usize];
        assert_eq!(&header[0..8], b"EFI PART");

        let stored = LittleEndian::read_u32(&header[16..20]);
        let mut zeroed = header.to_vec();
        zeroed[16..20].copy_from_slice(&[0; 4]);
        assert_eq!(crc32fast::hash(&zeroed), stored);

        let entries = &layout.primary[1024..1024 + ENTRIES_BYTES as usize];
        assert_eq!(LittleEndian::read_u32(&header[88..92]), crc32fast::hash(entries));
        assert_eq!(&entries[16..32], &layout.partition_guid.to_bytes_le());

        let backup_header = &layout.backup[layout.backup.len() - 512..];
        assert_eq!(LittleEndian::read_u64(&backup_header[24..32]), DISK_SIZE / 512 - 1);
        assert_eq!(LittleEndian::read_u64(&backup_header[32..40]), 1);
    }

    #[test]
    fn test_unknown_block_size_defaults_to_512() {
        let layout =
            GptLayout::single_partition(&disk("/dev/sdc", DISK_SIZE, 0), Uuid::new_v4(), Uuid::new_v4()).unwrap();
        assert_eq!(layout.logical_block_size, 512);
    }

    #[test]
    fn test_disk_too_small() {
        let result = GptLayout::single_partition(&disk("/dev/sdc", 512 * 1024, 512), Uuid::new_v4(), Uuid::new_v4());
        assert_matches!(result, Err(Error::Partition { .. }));
    }

    #[test]
    fn test_partition_image_and_refuse_second_write() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("disk.img");
        fs::File::create(&image).unwrap().set_len(DISK_SIZE).unwrap();
        let target = disk(image.to_str().unwrap(), DISK_SIZE, 512);

        let partitioner = GptPartitioner::new();
        partitioner.create_single_partition(&target).unwrap();

        let head = read_head(&image).unwrap();
        assert_eq!(detect_signature(&head, 512), Some(Signature::Gpt));
        assert_eq!(fs::metadata(&image).unwrap().len(), DISK_SIZE);

        let result = partitioner.create_single_partition(&target);
        assert_matches!(result, Err(Error::Partition { .. }));
    }
}
