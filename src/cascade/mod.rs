//! Cascade policy bits and the per-unit-of-work visited-edge tracker.

pub mod policy;
pub mod tracker;

pub use policy::{IncludeType, IncludeTypes};
pub use tracker::{CascadeOperation, CascadeTracker};
