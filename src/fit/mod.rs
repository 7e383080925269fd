//! Grid fitting orchestration.
//!
//! Responsibilities:
//!
//! - score predictions against observations (`likelihood`)
//! - find a start point on the grid nodes (parallel `scan`)
//! - refine continuously inside the grid (`refine`)
//! - report profile intervals and an optional curvature covariance

pub mod curvature;
pub mod fitter;
pub mod likelihood;
pub mod profile;
pub mod refine;
pub mod scan;

pub use fitter::*;
pub use likelihood::{BoundSpectrum, CostEvaluation, LikelihoodEngine};
pub use crate::math::{evaluate, evaluate_into};
