//! Hardware Module
//!
//! Host-facing side of the daemon: device discovery, the hierarchy cache and
//! event types, the GPT partitioner and sparse test devices.

pub mod discovery;
pub mod partition;
pub mod registry;
pub mod sparse;

pub use discovery::*;
pub use partition::*;
pub use registry::*;
pub use sparse::*;
