//! Photoionization model grid: validated load, O(1) node access, shared handle.

pub mod shared;
pub mod store;

pub use shared::*;
pub use store::*;
