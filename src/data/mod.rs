//! Built-in data: the demonstration grid and mock observations.

pub mod synthetic;

pub use synthetic::*;
