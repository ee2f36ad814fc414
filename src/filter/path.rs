//! path filter: allow and deny lists matched as case-insensitive substrings
//! of the device path.

use crate::domain::DeviceRecord;
use crate::filter::{matches_any_substring, Filter};

pub const KEY: &str = "path-filter";

pub const DEFAULT_EXCLUDE_PATHS: &str = "loop";

pub struct PathFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl PathFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }
}

impl Filter for PathFilter {
    fn include(&self, record: &DeviceRecord) -> bool {
        self.include.is_empty() || matches_any_substring(&self.include, &record.dev_path)
    }

    fn exclude(&self, record: &DeviceRecord) -> bool {
        self.exclude.is_empty() || !matches_any_substring(&self.exclude, &record.dev_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_lists() {
        let filter = PathFilter::new(vec!["/dev/sd".into()], vec!["LOOP".into(), "sdz".into()]);
        assert!(filter.include(&DeviceRecord::new("/dev/sdb")));
        assert!(!filter.include(&DeviceRecord::new("/dev/nvme0n1")));
        assert!(!filter.exclude(&DeviceRecord::new("/dev/loop3")));
        assert!(!filter.exclude(&DeviceRecord::new("/dev/sdz")));
        assert!(filter.exclude(&DeviceRecord::new("/dev/sdb")));
    }
}
