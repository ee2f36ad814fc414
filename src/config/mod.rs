//! Daemon Configuration
//!
//! Configuration sources beyond the command line:
//! - [`ndm`]: the probe/filter/tag configuration file
//! - [`features`]: feature gates

pub mod features;
pub mod ndm;

pub use features::*;
pub use ndm::*;

/// Evaluate a configuration string as a boolean flag
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "yes" | "ok" | "true" | "enabled"
    )
}

/// Evaluate a configuration string as an explicit "off"
pub fn is_falsy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "no" | "false" | "disabled"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_and_falsy() {
        for v in ["1", "Yes", "Ok", "True", "enabled"] {
            assert!(is_truthy(v), "{} should be truthy", v);
            assert!(!is_falsy(v), "{} should not be falsy", v);
        }
        for v in ["0", "No", "False", "", "Disabled"] {
            assert!(!is_truthy(v), "{} should not be truthy", v);
            assert!(is_falsy(v), "{} should be falsy", v);
        }
    }
}
