//! Input/output helpers.
//!
//! - CSV ingest for grids and observation catalogues (`ingest`)
//! - result exports (CSV/JSON) and catalogue/grid writers (`export`)

pub mod export;
pub mod ingest;

pub use export::*;
pub use ingest::*;
