//! Custom Resource Definitions for the Node Device Manager
//!
//! This module contains the CRD types:
//! - BlockDevice: one identified block device on a node, with claim state

pub mod block_device;

pub use block_device::*;
