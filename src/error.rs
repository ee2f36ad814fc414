//! Error types for the Node Device Manager
//!
//! Provides structured error types for every daemon component including
//! hardware discovery, the device store, identity resolution and the
//! partitioner.

use thiserror::Error;

/// Unified error type for the daemon
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Device Store Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Resource version conflict: {kind}/{name}")]
    Conflict { kind: String, name: String },

    #[error("Failed to list {kind} resources: {reason}")]
    ListFailed { kind: String, reason: String },

    // =========================================================================
    // Hardware Discovery Errors
    // =========================================================================
    #[error("Hardware discovery failed: {0}")]
    HardwareDiscovery(String),

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("SMART data unavailable for device: {device}")]
    SmartUnavailable { device: String },

    // =========================================================================
    // Identity Errors
    // =========================================================================
    #[error("Device cannot be uniquely identified: {device}")]
    Unidentifiable { device: String },

    #[error("Parent device not found in hierarchy for: {device}")]
    ParentNotFound { device: String },

    // =========================================================================
    // Partitioner Errors
    // =========================================================================
    #[error("Partitioning failed for {device}: {reason}")]
    Partition { device: String, reason: String },

    // =========================================================================
    // Scan Control
    // =========================================================================
    #[error("A device scan is already in progress")]
    ScanInProgress,

    #[error("Event queue closed")]
    QueueClosed,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action to take when handling a device fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry the store operation once more with a fresh read
    Retry,
    /// Abandon the current pass and schedule a full rescan
    Rescan,
    /// Log and skip this device until the next event or scan
    Skip,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::Conflict { .. } => ErrorAction::Retry,

            // The store view is unreliable, resync from scratch
            Error::Kube(_)
            | Error::ListFailed { .. }
            | Error::ResourceNotFound { .. }
            | Error::ParentNotFound { .. } => ErrorAction::Rescan,

            // A rescan is already running or the daemon is shutting down
            Error::ScanInProgress | Error::QueueClosed => ErrorAction::Skip,

            Error::Configuration(_)
            | Error::Unidentifiable { .. }
            | Error::Partition { .. }
            | Error::Pattern(_) => ErrorAction::Skip,

            _ => ErrorAction::Skip,
        }
    }

    /// Check if this error warrants another pass (retry or rescan)
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::Skip)
    }

    /// Check if this error is a version-token mismatch
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this error reports a missing resource
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ResourceNotFound { .. })
    }

    /// Check if this error reports a resource that already exists
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::ResourceExists { .. })
    }
}

/// Result type alias for the daemon
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::Conflict {
            kind: "BlockDevice".into(),
            name: "blockdevice-1".into(),
        };
        assert_eq!(err.action(), ErrorAction::Retry);

        let err = Error::ListFailed {
            kind: "BlockDevice".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.action(), ErrorAction::Rescan);

        let err = Error::Partition {
            device: "/dev/sdb".into(),
            reason: "existing partition table".into(),
        };
        assert_eq!(err.action(), ErrorAction::Skip);

        assert_eq!(Error::ScanInProgress.action(), ErrorAction::Skip);
    }

    #[test]
    fn test_error_retryable() {
        let transient = Error::Conflict {
            kind: "BlockDevice".into(),
            name: "blockdevice-1".into(),
        };
        assert!(transient.is_retryable());
        assert!(transient.is_conflict());

        let orphan = Error::ParentNotFound {
            device: "/dev/sdd1".into(),
        };
        assert!(orphan.is_retryable());

        let config_err = Error::Configuration("invalid".into());
        assert!(!config_err.is_retryable());
        assert!(!Error::ScanInProgress.is_retryable());
    }

    #[test]
    fn test_store_error_predicates() {
        let missing = Error::ResourceNotFound {
            kind: "BlockDevice".into(),
            name: "x".into(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_already_exists());

        let exists = Error::ResourceExists {
            kind: "BlockDevice".into(),
            name: "x".into(),
        };
        assert!(exists.is_already_exists());
    }
}
