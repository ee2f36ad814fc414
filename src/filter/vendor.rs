//! vendor filter: allow and deny lists matched case-insensitively against
//! the whole vendor string.

use crate::domain::DeviceRecord;
use crate::filter::{matches_any_exact, Filter};

pub const KEY: &str = "vendor-filter";

pub struct VendorFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl VendorFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }
}

impl Filter for VendorFilter {
    fn include(&self, record: &DeviceRecord) -> bool {
        self.include.is_empty() || matches_any_exact(&self.include, &record.attributes.vendor)
    }

    fn exclude(&self, record: &DeviceRecord) -> bool {
        self.exclude.is_empty() || !matches_any_exact(&self.exclude, &record.attributes.vendor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(vendor: &str) -> DeviceRecord {
        let mut record = DeviceRecord::new("/dev/sdb");
        record.attributes.vendor = vendor.to_string();
        record
    }

    #[test]
    fn test_vendor_lists() {
        let open = VendorFilter::new(vec![], vec![]);
        assert!(open.include(&record("ATA")) && open.exclude(&record("ATA")));

        let filter = VendorFilter::new(vec!["samsung".into()], vec!["QEMU".into()]);
        assert!(filter.include(&record("SAMSUNG")));
        assert!(!filter.include(&record("SAMSUNG-X")));
        assert!(!filter.exclude(&record("qemu")));
        assert!(filter.exclude(&record("ATA")));
    }
}
