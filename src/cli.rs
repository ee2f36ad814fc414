//! Device List Output
//!
//! Fixed-width rendering of stored BlockDevices for `ndm device list`.

use crate::crd::BlockDevice;
use crate::domain::{DeviceStore, LabelSelector};
use crate::error::Result;
use std::fmt::Write;

/// Printed instead of a table when the store holds no resources
pub const NO_DEVICES: &str = "No disk resource present.";

const COLUMNS: [(&str, usize); 7] = [
    ("NAME", 45),
    ("PATH", 10),
    ("CAPACITY", 15),
    ("STATUS", 10),
    ("SERIAL", 25),
    ("MODEL", 20),
    ("VENDOR", 20),
];

fn push_row(out: &mut String, cells: [String; 7]) {
    for ((_, width), cell) in COLUMNS.iter().zip(cells) {
        let _ = write!(out, "{:<width$}", cell, width = *width);
    }
    out.push('\n');
}

/// Render devices as a table, one row per resource in the given order
pub fn render_device_table(devices: &[BlockDevice]) -> String {
    if devices.is_empty() {
        return format!("{}\n", NO_DEVICES);
    }

    let mut out = String::new();
    push_row(&mut out, COLUMNS.map(|(title, _)| title.to_string()));
    for device in devices {
        let details = &device.spec.details;
        push_row(
            &mut out,
            [
                device.uuid().to_string(),
                device.spec.path.clone(),
                device.spec.capacity.storage.to_string(),
                device.state().to_string(),
                details.serial.clone(),
                details.model.clone(),
                details.vendor.clone(),
            ],
        );
    }
    out
}

/// Fetch every resource from the store and render it
pub async fn list_devices(store: &dyn DeviceStore) -> Result<String> {
    let mut devices = store.list(&LabelSelector::new()).await?;
    devices.sort_by(|a, b| a.uuid().cmp(b.uuid()));
    Ok(render_device_table(&devices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DeviceState;
    use crate::domain::{DeviceRecord, DeviceType};
    use crate::store::InMemoryDeviceStore;

    fn device(uuid: &str, path: &str) -> BlockDevice {
        let mut record = DeviceRecord::new(path);
        record.uuid = uuid.into();
        record.attributes.device_type = DeviceType::Disk;
        record.attributes.capacity = 10737418240;
        record.attributes.serial = "disk-1".into();
        record.attributes.model = "PersistentDisk".into();
        record.attributes.vendor = "Google".into();
        BlockDevice::from_record(&record, "node-1", "openebs")
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(render_device_table(&[]), "No disk resource present.\n");
    }

    #[test]
    fn test_table_layout() {
        let mut inactive = device("blockdevice-ccc636c88bd9ab09dde9de476309058d", "/dev/sda");
        inactive.set_state(DeviceState::Inactive);
        let table = render_device_table(&[inactive]);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("NAME                                         PATH      CAPACITY"));
        assert_eq!(&lines[1][45..55], "/dev/sda  ");
        assert_eq!(&lines[1][55..70], "10737418240    ");
        assert_eq!(&lines[1][70..80], "Inactive  ");
        assert!(lines[1].ends_with("Google              "));
    }

    #[tokio::test]
    async fn test_list_devices_sorted() {
        let store = InMemoryDeviceStore::new();
        store.create(&device("blockdevice-b", "/dev/sdb")).await.unwrap();
        store.create(&device("blockdevice-a", "/dev/sda")).await.unwrap();

        let table = list_devices(&store).await.unwrap();
        let names: Vec<&str> = table
            .lines()
            .skip(1)
            .filter_map(|l| l.split_whitespace().next())
            .collect();
        assert_eq!(names, vec!["blockdevice-a", "blockdevice-b"]);
    }
}
