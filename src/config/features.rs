//! Feature Gates
//!
//! Parsed from `--feature-gates` as a list of `Name` or `Name=<bool>` entries.

use crate::config::is_truthy;
use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::info;

/// Known feature gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Identify devices with the GPT/WWN based scheme instead of the legacy one
    GptBasedUuid,
}

impl Feature {
    const ALL: &'static [Feature] = &[Feature::GptBasedUuid];

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.to_string() == name)
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feature::GptBasedUuid => write!(f, "GPTBasedUUID"),
        }
    }
}

/// Enabled state of each explicitly listed feature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGates {
    gates: HashMap<Feature, bool>,
}

impl FeatureGates {
    /// Parse gate entries; unknown names and malformed entries are rejected
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut gates = HashMap::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            let parts: Vec<&str> = entry.split('=').collect();
            let enabled = match parts.len() {
                1 => true,
                2 => is_truthy(parts[1]),
                _ => {
                    return Err(Error::Configuration(format!(
                        "incorrect format, cannot parse feature {}",
                        entry
                    )))
                }
            };
            let feature = Feature::from_name(parts[0]).ok_or_else(|| {
                Error::Configuration(format!("unknown feature flag {}", parts[0]))
            })?;
            info!(
                "Feature gate: {}, state: {}",
                feature,
                if enabled { "enabled" } else { "disabled" }
            );
            gates.insert(feature, enabled);
        }
        Ok(Self { gates })
    }

    /// Unlisted features are disabled
    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.gates.get(&feature).copied().unwrap_or(false)
    }

    /// Gates with every feature switched on
    pub fn all_enabled() -> Self {
        Self {
            gates: Feature::ALL.iter().map(|f| (*f, true)).collect(),
        }
    }
}
