//! smartctl Identity Reader
//!
//! Queries device identity pages with `smartctl --info --json` from
//! smartmontools. Used to fill in firmware, compliance and sector sizes that
//! udev does not report.

use crate::domain::{fill_if_empty, DeviceRecord};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::process::Command;
use tracing::debug;

// =============================================================================
// SMART Identity
// =============================================================================

/// Identity fields reported by smartctl
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartIdentity {
    pub model: String,
    pub serial: String,
    pub vendor: String,
    pub firmware: String,
    /// Implemented standard, e.g. "ACS-3" or "SPC-4"
    pub compliance: String,
    pub logical_block_size: u32,
    pub physical_block_size: u32,
    /// RPM, 0 for solid state
    pub rotation_rate: u32,
}

impl SmartIdentity {
    /// Extract identity fields from smartctl JSON output
    pub fn from_json(json: &serde_json::Value) -> Self {
        let text = |v: &serde_json::Value| v.as_str().unwrap_or("").trim().to_string();

        let model = json["model_name"]
            .as_str()
            .or_else(|| json["scsi_model_name"].as_str())
            .or_else(|| json["scsi_product"].as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        let compliance = json["ata_version"]["string"]
            .as_str()
            .or_else(|| json["scsi_version"].as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        let logical_block_size = json["logical_block_size"].as_u64().unwrap_or(0) as u32;
        let physical_block_size = json["physical_block_size"]
            .as_u64()
            .unwrap_or(u64::from(logical_block_size)) as u32;

        Self {
            model,
            serial: text(&json["serial_number"]),
            vendor: json["scsi_vendor"]
                .as_str()
                .or_else(|| json["vendor"].as_str())
                .unwrap_or("")
                .trim()
                .to_string(),
            firmware: json["firmware_version"]
                .as_str()
                .or_else(|| json["scsi_revision"].as_str())
                .unwrap_or("")
                .trim()
                .to_string(),
            compliance,
            logical_block_size,
            physical_block_size,
            rotation_rate: json["rotation_rate"].as_u64().unwrap_or(0) as u32,
        }
    }

    /// Copy fields onto a record, keeping anything already set
    pub fn apply(&self, record: &mut DeviceRecord) {
        let attrs = &mut record.attributes;
        fill_if_empty(&mut attrs.model, &self.model);
        fill_if_empty(&mut attrs.serial, &self.serial);
        fill_if_empty(&mut attrs.vendor, &self.vendor);
        fill_if_empty(&mut attrs.firmware_revision, &self.firmware);
        fill_if_empty(&mut attrs.compliance, &self.compliance);
        if attrs.logical_block_size == 0 {
            attrs.logical_block_size = self.logical_block_size;
        }
        if attrs.physical_block_size == 0 {
            attrs.physical_block_size = self.physical_block_size;
        }
    }
}

// =============================================================================
// smartctl Invocation
// =============================================================================

/// smartctl-backed identity queries
pub struct Smartctl;

impl Smartctl {
    /// Read identity pages of a device
    pub fn identity(device: &str) -> Result<SmartIdentity> {
        let output = Command::new("smartctl")
            .args(["-i", "-j", device])
            .output()
            .map_err(|_| Error::SmartUnavailable {
                device: device.to_string(),
            })?;

        // smartctl returns non-zero for various warnings, check output
        let json: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| {
                debug!("smartctl JSON parse error for {}: {}", device, e);
                Error::SmartUnavailable {
                    device: device.to_string(),
                }
            })?;

        if json["device"].is_null() {
            return Err(Error::SmartUnavailable {
                device: device.to_string(),
            });
        }

        Ok(SmartIdentity::from_json(&json))
    }

    /// Check if smartmontools is available
    pub fn is_available() -> bool {
        Command::new("smartctl")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}
