//! udev Database Reader
//!
//! udevd persists the properties and symlinks of every device it processed
//! under `/run/udev/data/b<major>:<minor>`. Lines are tagged by their first
//! character: `E:` holds a `KEY=VALUE` property, `S:` a symlink relative to
//! the device directory.

use crate::domain::{fill_if_empty, DevLinkKind, DeviceRecord, DeviceType};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const ID_WWN: &str = "ID_WWN";
pub const ID_SERIAL_SHORT: &str = "ID_SERIAL_SHORT";
pub const ID_MODEL: &str = "ID_MODEL";
pub const ID_VENDOR: &str = "ID_VENDOR";
pub const ID_TYPE: &str = "ID_TYPE";
pub const ID_PART_TABLE_TYPE: &str = "ID_PART_TABLE_TYPE";
pub const ID_PART_TABLE_UUID: &str = "ID_PART_TABLE_UUID";
pub const ID_PART_ENTRY_UUID: &str = "ID_PART_ENTRY_UUID";
pub const ID_PART_ENTRY_NUMBER: &str = "ID_PART_ENTRY_NUMBER";
pub const ID_FS_TYPE: &str = "ID_FS_TYPE";
pub const ID_FS_UUID: &str = "ID_FS_UUID";
pub const DM_UUID: &str = "DM_UUID";
pub const DM_NAME: &str = "DM_NAME";

/// Parsed udev database entry of one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UdevEntry {
    properties: HashMap<String, String>,
    symlinks: Vec<String>,
}

impl UdevEntry {
    pub fn parse(text: &str) -> Self {
        let mut entry = UdevEntry::default();
        for line in text.lines() {
            if let Some(prop) = line.strip_prefix("E:") {
                if let Some((key, value)) = prop.split_once('=') {
                    entry.properties.insert(key.to_string(), value.to_string());
                }
            } else if let Some(link) = line.strip_prefix("S:") {
                entry.symlinks.push(link.to_string());
            }
        }
        entry
    }

    /// Read the entry of a device number from the database directory
    pub fn read(udev_data: &Path, major: u32, minor: u32) -> Result<Self> {
        let path = udev_data.join(format!("b{}:{}", major, minor));
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::HardwareDiscovery(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&text))
    }

    pub fn property(&self, key: &str) -> &str {
        self.properties.get(key).map(String::as_str).unwrap_or("")
    }

    /// Symlinks of a kind, as absolute paths below `dev_dir`
    pub fn links(&self, dev_dir: &str, kind: DevLinkKind) -> Vec<String> {
        let marker = match kind {
            DevLinkKind::ById => "by-id",
            DevLinkKind::ByPath => "by-path",
        };
        self.symlinks
            .iter()
            .filter(|link| link.split('/').any(|part| part == marker))
            .map(|link| format!("{}/{}", dev_dir, link))
            .collect()
    }

    /// Copy identity fields onto a record, keeping anything already set
    pub fn apply(&self, record: &mut DeviceRecord, dev_dir: &str) {
        let attrs = &mut record.attributes;
        fill_if_empty(&mut attrs.wwn, self.property(ID_WWN));
        fill_if_empty(&mut attrs.serial, self.property(ID_SERIAL_SHORT));
        fill_if_empty(&mut attrs.model, self.property(ID_MODEL));
        fill_if_empty(&mut attrs.vendor, self.property(ID_VENDOR));
        fill_if_empty(&mut attrs.id_type, self.property(ID_TYPE));

        let part = &mut record.partition;
        fill_if_empty(&mut part.table_type, self.property(ID_PART_TABLE_TYPE));
        fill_if_empty(&mut part.table_uuid, self.property(ID_PART_TABLE_UUID));
        fill_if_empty(&mut part.entry_uuid, self.property(ID_PART_ENTRY_UUID));
        if part.number == 0 {
            part.number = self.property(ID_PART_ENTRY_NUMBER).parse().unwrap_or(0);
        }

        fill_if_empty(&mut record.filesystem.fs_type, self.property(ID_FS_TYPE));
        fill_if_empty(&mut record.filesystem.uuid, self.property(ID_FS_UUID));

        let dm_uuid = self.property(DM_UUID);
        if !dm_uuid.is_empty() {
            fill_if_empty(&mut record.device_mapper.uuid, dm_uuid);
            let dm_name = self.property(DM_NAME);
            if !dm_name.is_empty() {
                fill_if_empty(
                    &mut record.device_mapper.mapper_path,
                    &format!("{}/mapper/{}", dev_dir, dm_name),
                );
            }
            if matches!(record.attributes.device_type, DeviceType::Unknown | DeviceType::Disk) {
                record.attributes.device_type = DeviceType::from_dm_uuid(dm_uuid);
            }
        }

        for kind in [DevLinkKind::ById, DevLinkKind::ByPath] {
            if record.links(kind).is_empty() {
                record.set_links(kind, self.links(dev_dir, kind));
            }
        }
    }
}
