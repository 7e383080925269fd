//! `nebula-fit` library crate.
//!
//! Fits photoionization model grids to observed emission-line fluxes. The
//! binary (`nebula`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the grid, interpolation and fitting pieces are reusable on their own
//!
//! The usual entry points are [`grid::Grid::load`], [`math::evaluate`] and
//! [`fit::fit`].

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod grid;
pub mod io;
pub mod logging;
pub mod math;
pub mod report;
