//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - grid parameters and axes (`ParamAxis`, `GridAxis`, `ParameterVector`)
//! - per-target measurements (`ObservedSpectrum`, `LineObservation`)
//! - canonical emission-line ids (`lines`)
//! - fit outputs (`FitResult`, `AxisUncertainty`, `Convergence`, etc.)

pub mod lines;
pub mod spectrum;
pub mod types;

pub use lines::*;
pub use spectrum::*;
pub use types::*;
