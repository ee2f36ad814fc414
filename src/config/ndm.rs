//! Node Disk Manager configuration file
//!
//! The file is mounted from a ConfigMap and may be written either as JSON or
//! as YAML. Probe and filter entries override the compiled-in name and
//! enabled state of the plugin with the same key.

use crate::config::is_truthy;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

/// Default location of the configuration file inside the daemon pod
pub const DEFAULT_CONFIG_PATH: &str = "/host/node-disk-manager.config";

// =============================================================================
// Configuration Types
// =============================================================================

/// `state` may be written as a YAML boolean or as a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginState {
    Bool(bool),
    Text(String),
}

impl PluginState {
    pub fn is_enabled(&self) -> bool {
        match self {
            PluginState::Bool(b) => *b,
            PluginState::Text(s) => is_truthy(s),
        }
    }
}

impl Default for PluginState {
    fn default() -> Self {
        PluginState::Text(String::new())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeConfig {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: PluginState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: PluginState,
    /// Comma separated values to include
    #[serde(default)]
    pub include: String,
    /// Comma separated values to exclude
    #[serde(default)]
    pub exclude: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    #[serde(default)]
    pub name: String,
    /// Field the pattern is matched against; only "path" is supported
    #[serde(rename = "type", default)]
    pub tag_type: String,
    #[serde(default)]
    pub pattern: String,
    /// Label value applied on match
    #[serde(rename = "tag", default)]
    pub tag_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub meta_type: String,
    #[serde(default)]
    pub pattern: String,
}

/// Contents of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDiskManagerConfig {
    #[serde(default)]
    pub probeconfigs: Vec<ProbeConfig>,
    #[serde(default)]
    pub filterconfigs: Vec<FilterConfig>,
    #[serde(default)]
    pub tagconfigs: Vec<TagConfig>,
    /// Accepted for compatibility, not acted upon
    #[serde(default)]
    pub metaconfigs: Vec<MetaConfig>,
}

impl NodeDiskManagerConfig {
    /// Parse as JSON when the text is valid JSON, YAML otherwise
    pub fn parse(text: &str) -> Result<Self> {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(_) => Ok(serde_yaml::from_str(text)?),
        }
    }

    /// Load the file; a missing or malformed file yields `None`
    pub fn load(path: &Path) -> Option<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                error!("unable to read ndm config {}: {}", path.display(), e);
                return None;
            }
        };
        match Self::parse(&text) {
            Ok(config) => {
                info!(
                    "Loaded ndm config from {} ({} probes, {} filters, {} tags)",
                    path.display(),
                    config.probeconfigs.len(),
                    config.filterconfigs.len(),
                    config.tagconfigs.len()
                );
                Some(config)
            }
            Err(e) => {
                error!("unable to parse ndm config {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn probe(&self, key: &str) -> Option<&ProbeConfig> {
        self.probeconfigs.iter().find(|p| p.key == key)
    }

    pub fn filter(&self, key: &str) -> Option<&FilterConfig> {
        self.filterconfigs.iter().find(|f| f.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const YAML: &str = r#"
probeconfigs:
  - key: udev-probe
    name: udev probe
    state: true
  - key: smart-probe
    name: smart probe
    state: "false"
filterconfigs:
  - key: path-filter
    name: path filter
    state: "Enabled"
    include: ""
    exclude: "loop,/dev/fd0,/dev/sr0"
tagconfigs:
  - name: ssd tag
    type: path
    pattern: "^/dev/nvme"
    tag: fast
metaconfigs:
  - key: node-labels
    name: node labels
    pattern: ""
"#;

    #[test]
    fn test_parse_yaml() {
        let config = NodeDiskManagerConfig::parse(YAML).unwrap();

        assert!(config.probe("udev-probe").unwrap().state.is_enabled());
        assert!(!config.probe("smart-probe").unwrap().state.is_enabled());
        assert!(config.probe("mount-probe").is_none());

        let path = config.filter("path-filter").unwrap();
        assert!(path.state.is_enabled());
        assert_eq!(path.exclude, "loop,/dev/fd0,/dev/sr0");

        assert_eq!(config.tagconfigs[0].tag_type, "path");
        assert_eq!(config.tagconfigs[0].tag_name, "fast");
        assert_eq!(config.metaconfigs.len(), 1);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{"probeconfigs":[{"key":"mount-probe","name":"mount probe","state":"true"}]}"#;
        let config = NodeDiskManagerConfig::parse(json).unwrap();
        assert!(config.probe("mount-probe").unwrap().state.is_enabled());
        assert!(config.filterconfigs.is_empty());
    }

    #[test]
    fn test_load_missing_or_malformed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeDiskManagerConfig::load(&dir.path().join("absent")).is_none());

        let path = dir.path().join("ndm.config");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"probeconfigs: [unterminated").unwrap();
        assert!(NodeDiskManagerConfig::load(&path).is_none());

        std::fs::write(&path, YAML).unwrap();
        assert!(NodeDiskManagerConfig::load(&path).is_some());
    }
}
