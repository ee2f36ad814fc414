//! Domain layer - Device records and port definitions
//!
//! This module defines the device record flowing through the pipelines and
//! the core traits (ports) that adapters implement, following hexagonal
//! architecture principles.

pub mod device;
pub mod ports;

pub use device::*;
pub use ports::*;
