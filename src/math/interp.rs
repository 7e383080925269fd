//! Multilinear interpolation over the model grid.
//!
//! For every varied axis we binary-search the bracketing pair of nodes and
//! compute the fractional position `t ∈ [0, 1]` between them (in log10 space
//! for logarithmic axes). The prediction is then the weighted sum over the
//! corners of the enclosing hyper-rectangle, with weight `Π (1 - t)` or `Π t`
//! depending on the side picked on each axis.
//!
//! Numerical notes:
//! - Corners with zero weight are skipped. A query exactly on a node therefore
//!   touches a single corner with weight exactly 1 and reproduces the node
//!   prediction bit-for-bit.
//! - Degenerate (single-node) axes contribute weight 1 and ignore the query.
//! - Queries are accepted up to `EDGE_TOL` (relative to the axis width) beyond
//!   the outermost nodes so that a log10/pow round trip of an edge value does
//!   not turn into a bounds error. Anything further out is rejected: there is
//!   no extrapolation.

use std::collections::BTreeMap;

use crate::domain::{GridAxis, ParamAxis, ParameterVector, N_PARAMS};
use crate::error::FitError;
use crate::grid::Grid;

/// Edge slack, as a fraction of the axis width in interpolation space.
const EDGE_TOL: f64 = 1e-10;

/// Maximum number of cell corners (2^5).
const MAX_CORNERS: usize = 1 << N_PARAMS;

/// Position of a query inside one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    /// Index of the lower bracketing node.
    pub lower: usize,
    /// Fraction of the way to the next node; `0` on degenerate axes.
    pub t: f64,
}

/// Locate `coord` (interpolation space) on `axis`.
///
/// Degenerate axes always return `{ lower: 0, t: 0 }`.
pub fn bracket_coord(axis: &GridAxis, coord: f64) -> Result<Bracket, FitError> {
    if axis.is_degenerate() {
        return Ok(Bracket { lower: 0, t: 0.0 });
    }
    let coords = axis.coords();
    let n = coords.len();
    let (lo, hi) = (coords[0], coords[n - 1]);
    let slack = EDGE_TOL * (hi - lo);

    // Written so that NaN falls through to the error branch.
    if !(coord >= lo - slack && coord <= hi + slack) {
        return Err(out_of_bounds(axis, axis.scale().from_coord(coord)));
    }
    let coord = coord.clamp(lo, hi);

    let above = coords.partition_point(|&c| c <= coord);
    let lower = above.saturating_sub(1).min(n - 2);
    let span = coords[lower + 1] - coords[lower];
    let t = ((coord - coords[lower]) / span).clamp(0.0, 1.0);
    Ok(Bracket { lower, t })
}

/// Locate a physical value on `axis`.
pub fn bracket(axis: &GridAxis, value: f64) -> Result<Bracket, FitError> {
    if axis.is_degenerate() {
        return Ok(Bracket { lower: 0, t: 0.0 });
    }
    let coord = axis
        .scale()
        .to_coord(value)
        .ok_or_else(|| out_of_bounds(axis, value))?;
    bracket_coord(axis, coord)
}

fn out_of_bounds(axis: &GridAxis, value: f64) -> FitError {
    FitError::OutOfGridBounds {
        axis: axis.param(),
        value,
        min: axis.min(),
        max: axis.max(),
    }
}

/// Non-zero-weight corners of the cell containing a query.
#[derive(Debug, Clone, Copy)]
pub struct CellCorners {
    items: [(usize, f64); MAX_CORNERS],
    len: usize,
}

impl CellCorners {
    /// Build from one bracket per axis.
    pub fn new(grid: &Grid, brackets: &[Bracket; N_PARAMS]) -> Self {
        let shape = grid.shape();
        let mut items = [(0usize, 0.0f64); MAX_CORNERS];
        items[0] = (0, 1.0);
        let mut len = 1;

        // Expand the corner set one axis at a time. Sides with zero weight are
        // never added, so on-node queries keep a single corner.
        let mut stride = 1usize;
        for i in (0..N_PARAMS).rev() {
            let b = brackets[i];
            let lower_w = 1.0 - b.t;
            let upper_w = b.t;
            let has_upper = shape[i] > 1 && upper_w > 0.0;
            let has_lower = lower_w > 0.0 || !has_upper;

            let prev = len;
            if has_lower && has_upper {
                for k in 0..prev {
                    let (lin, w) = items[k];
                    items[prev + k] = (lin + (b.lower + 1) * stride, w * upper_w);
                    items[k] = (lin + b.lower * stride, w * lower_w);
                }
                len = prev * 2;
            } else {
                let (offset, w_side) = if has_upper {
                    (b.lower + 1, 1.0)
                } else {
                    (b.lower, 1.0)
                };
                for item in items.iter_mut().take(prev) {
                    item.0 += offset * stride;
                    item.1 *= w_side;
                }
            }
            stride *= shape[i];
        }
        Self { items, len }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.items[..self.len].iter().copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Map a physical parameter vector into interpolation space.
///
/// Degenerate axes map to their single node regardless of the query.
pub fn to_coords(grid: &Grid, p: &ParameterVector) -> Result<[f64; N_PARAMS], FitError> {
    let mut out = [0.0; N_PARAMS];
    for axis in ParamAxis::ALL {
        let a = grid.axis(axis);
        let i = axis.index();
        out[i] = if a.is_degenerate() {
            a.coords()[0]
        } else {
            a.scale()
                .to_coord(p[axis])
                .ok_or_else(|| out_of_bounds(a, p[axis]))?
        };
    }
    Ok(out)
}

/// Inverse of [`to_coords`].
pub fn from_coords(grid: &Grid, coords: &[f64; N_PARAMS]) -> ParameterVector {
    ParameterVector::new(std::array::from_fn(|i| {
        let a = &grid.axes()[i];
        if a.is_degenerate() {
            a.values()[0]
        } else {
            a.scale().from_coord(coords[i])
        }
    }))
}

/// Interpolate all grid lines at interpolation-space coordinates into `out`.
///
/// `out` must have length `grid.n_lines()`.
pub fn evaluate_coords_into(
    grid: &Grid,
    coords: &[f64; N_PARAMS],
    out: &mut [f64],
) -> Result<(), FitError> {
    let mut brackets = [Bracket { lower: 0, t: 0.0 }; N_PARAMS];
    for (i, axis) in grid.axes().iter().enumerate() {
        brackets[i] = bracket_coord(axis, coords[i])?;
    }
    accumulate(grid, &CellCorners::new(grid, &brackets), out);
    Ok(())
}

/// Interpolate all grid lines at a physical parameter vector into `out`.
pub fn evaluate_into(grid: &Grid, p: &ParameterVector, out: &mut [f64]) -> Result<(), FitError> {
    let mut brackets = [Bracket { lower: 0, t: 0.0 }; N_PARAMS];
    for (i, axis) in grid.axes().iter().enumerate() {
        brackets[i] = bracket(axis, p.0[i])?;
    }
    accumulate(grid, &CellCorners::new(grid, &brackets), out);
    Ok(())
}

/// Predicted flux per line at an arbitrary point inside the grid.
pub fn evaluate(grid: &Grid, p: &ParameterVector) -> Result<BTreeMap<String, f64>, FitError> {
    let mut out = vec![0.0; grid.n_lines()];
    evaluate_into(grid, p, &mut out)?;
    Ok(grid.lines().iter().cloned().zip(out).collect())
}

fn accumulate(grid: &Grid, corners: &CellCorners, out: &mut [f64]) {
    out.fill(0.0);
    for (linear, w) in corners.iter() {
        for (o, f) in out.iter_mut().zip(grid.fluxes_at(linear)) {
            *o += w * f;
        }
    }
}
