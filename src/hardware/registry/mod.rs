//! Device Registry Module
//!
//! The hierarchy cache of last-seen device records and the events that flow
//! into the reconciler.

pub mod events;
pub mod hierarchy;

pub use events::*;
pub use hierarchy::*;
