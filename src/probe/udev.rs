//! udev probe: identity fields, partition and filesystem metadata, DM UUID
//! and stable links from the udev database.

use crate::domain::DeviceRecord;
use crate::hardware::discovery::{device_number, HostPaths, UdevEntry};
use crate::probe::Probe;
use std::path::PathBuf;
use tracing::debug;

pub const KEY: &str = "udev-probe";

pub struct UdevProbe {
    paths: HostPaths,
}

impl UdevProbe {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }
}

impl Probe for UdevProbe {
    fn fill_details(&self, record: &mut DeviceRecord) {
        let sys_path = if record.sys_path.is_empty() {
            self.paths.block_device(record.name())
        } else {
            PathBuf::from(&record.sys_path)
        };

        let Some((major, minor)) = device_number(&sys_path) else {
            debug!(device = %record.dev_path, "no device number, skipping udev lookup");
            return;
        };

        match UdevEntry::read(&self.paths.udev_data, major, minor) {
            Ok(entry) => entry.apply(record, &self.paths.dev.to_string_lossy()),
            Err(e) => debug!(device = %record.dev_path, "udev data unavailable: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DevLinkKind;
    use crate::hardware::discovery::scanner::testutil::FakeHost;

    #[test]
    fn test_fill_from_udev_db() {
        let host = FakeHost::new();
        host.add_disk("sdd", 2048, (8, 48));
        host.write_udev(
            (8, 48),
            "S:disk/by-id/wwn-0x5001\nE:ID_WWN=0x5001\nE:ID_SERIAL_SHORT=S1\nE:ID_FS_UUID=fs-1\n",
        );

        let probe = UdevProbe::new(host.paths.clone());
        let mut record = DeviceRecord::new("/dev/sdd");
        probe.fill_details(&mut record);

        assert_eq!(record.attributes.wwn, "0x5001");
        assert_eq!(record.attributes.serial, "S1");
        assert_eq!(record.filesystem.uuid, "fs-1");
        assert_eq!(record.links(DevLinkKind::ById), ["/dev/disk/by-id/wwn-0x5001"]);
    }

    #[test]
    fn test_missing_device_leaves_record() {
        let host = FakeHost::new();
        let probe = UdevProbe::new(host.paths.clone());
        let mut record = DeviceRecord::new("/dev/sdz");
        probe.fill_details(&mut record);
        assert_eq!(record, DeviceRecord::new("/dev/sdz"));
    }
}
