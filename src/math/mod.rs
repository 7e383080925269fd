//! Numerical kernels: grid interpolation and small linear algebra.

pub mod interp;
pub mod linalg;

pub use interp::*;
pub use linalg::*;
