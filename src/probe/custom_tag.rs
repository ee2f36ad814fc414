//! custom-tag probe: labels devices whose path matches a configured pattern.

use crate::config::TagConfig;
use crate::crd::BLOCK_DEVICE_TAG_LABEL;
use crate::domain::DeviceRecord;
use crate::probe::Probe;
use regex::Regex;
use tracing::{error, info};

pub const KEY: &str = "custom-tag-probe";

pub const TAG_TYPE_PATH: &str = "path";

/// Kubernetes label value syntax
const LABEL_VALUE_PATTERN: &str = r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$";

#[derive(Debug, Clone)]
struct PathTag {
    pattern: Regex,
    value: String,
}

#[derive(Debug, Default)]
pub struct CustomTagProbe {
    tags: Vec<PathTag>,
}

impl CustomTagProbe {
    /// Compile tag rules; unsupported or invalid rules are logged and dropped
    pub fn from_config(configs: &[TagConfig]) -> Self {
        let label_value = Regex::new(LABEL_VALUE_PATTERN).ok();
        let mut tags = Vec::new();

        for config in configs {
            if config.tag_type != TAG_TYPE_PATH {
                error!(tag = %config.name, "unsupported tag type: {}", config.tag_type);
                continue;
            }
            if !label_value.as_ref().map_or(false, |re| re.is_match(&config.tag_name)) {
                error!(tag = %config.name, "not a valid label value: {:?}", config.tag_name);
                continue;
            }
            match Regex::new(&config.pattern) {
                Ok(pattern) => tags.push(PathTag {
                    pattern,
                    value: config.tag_name.clone(),
                }),
                Err(e) => error!(tag = %config.name, "invalid tag pattern {:?}: {}", config.pattern, e),
            }
        }

        Self { tags }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl Probe for CustomTagProbe {
    fn fill_details(&self, record: &mut DeviceRecord) {
        // Later rules override earlier ones
        for tag in &self.tags {
            if tag.pattern.is_match(&record.dev_path) {
                record
                    .labels
                    .insert(BLOCK_DEVICE_TAG_LABEL.to_string(), tag.value.clone());
                info!(
                    device = %record.dev_path,
                    "label {}={} added by custom tag probe", BLOCK_DEVICE_TAG_LABEL, tag.value
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(tag_type: &str, pattern: &str, value: &str) -> TagConfig {
        TagConfig {
            name: "rule".into(),
            tag_type: tag_type.into(),
            pattern: pattern.into(),
            tag_name: value.into(),
        }
    }

    #[test]
    fn test_invalid_rules_are_dropped() {
        let probe = CustomTagProbe::from_config(&[
            tag("path", "^/dev/nvme", "fast"),
            tag("model", "^X", "ignored"),
            tag("path", "([", "broken"),
            tag("path", "^/dev/sd", "not valid!"),
        ]);
        assert_eq!(probe.len(), 1);
    }

    #[test]
    fn test_last_matching_rule_wins() {
        let probe = CustomTagProbe::from_config(&[
            tag("path", "^/dev/sd", "slow"),
            tag("path", "^/dev/sdb$", "reserved"),
        ]);

        let mut record = DeviceRecord::new("/dev/sdb");
        probe.fill_details(&mut record);
        assert_eq!(record.labels.get(BLOCK_DEVICE_TAG_LABEL).unwrap(), "reserved");

        let mut record = DeviceRecord::new("/dev/nvme0n1");
        probe.fill_details(&mut record);
        assert!(record.labels.is_empty());
    }
}
