//! Quadratic approximation of χ² at the optimum.
//!
//! A central-difference Hessian over the varied axes (interpolation space)
//! gives the covariance `C = 2 H⁻¹`. This is a cheap symmetric cross-check of
//! the profile intervals; it is only reported when `H` is positive definite.

use nalgebra::DMatrix;

use crate::domain::{CurvatureEstimate, N_PARAMS};
use crate::fit::likelihood::BoundSpectrum;
use crate::fit::refine::chi2_at;
use crate::grid::Grid;
use crate::math::invert_spd;

/// Step as a fraction of the smaller neighbouring cell.
const STEP_FRACTION: f64 = 0.25;

/// Finite-difference step on one axis, shrunk to stay inside the grid.
fn step_for(coords: &[f64], x: f64) -> Option<f64> {
    let n = coords.len();
    let upper = coords.partition_point(|&c| c <= x).clamp(1, n - 1);
    let lower = coords.partition_point(|&c| c < x).clamp(1, n - 1) - 1;
    let cell = (coords[upper] - coords[upper - 1]).min(coords[lower + 1] - coords[lower]);
    let room = (x - coords[0]).min(coords[n - 1] - x);
    let h = (STEP_FRACTION * cell).min(room);
    (h > 1e-9 * (coords[n - 1] - coords[0])).then_some(h)
}

/// Covariance estimate at `best` (interpolation space).
///
/// Returns `None` when no axis varies, the optimum sits on a grid edge, or the
/// Hessian is not positive definite.
pub fn estimate(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    best: &[f64; N_PARAMS],
) -> Option<CurvatureEstimate> {
    let varied: Vec<usize> = (0..N_PARAMS)
        .filter(|&i| !grid.axes()[i].is_degenerate())
        .collect();
    if varied.is_empty() {
        return None;
    }
    let steps: Vec<f64> = varied
        .iter()
        .map(|&i| step_for(grid.axes()[i].coords(), best[i]))
        .collect::<Option<_>>()?;

    let f = |shifts: &[(usize, f64)]| {
        let mut p = *best;
        for &(i, d) in shifts {
            p[i] += d;
        }
        chi2_at(grid, spectrum, scale, &p)
    };
    let f0 = f(&[]);
    let d = varied.len();
    let mut h = DMatrix::<f64>::zeros(d, d);
    for a in 0..d {
        let (ia, ha) = (varied[a], steps[a]);
        h[(a, a)] = (f(&[(ia, ha)]) - 2.0 * f0 + f(&[(ia, -ha)])) / (ha * ha);
        for b in (a + 1)..d {
            let (ib, hb) = (varied[b], steps[b]);
            let v = (f(&[(ia, ha), (ib, hb)]) - f(&[(ia, ha), (ib, -hb)])
                - f(&[(ia, -ha), (ib, hb)])
                + f(&[(ia, -ha), (ib, -hb)]))
                / (4.0 * ha * hb);
            h[(a, b)] = v;
            h[(b, a)] = v;
        }
    }
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let cov = invert_spd(&h)? * 2.0;
    let sigma: Vec<f64> = (0..d).map(|k| cov[(k, k)].sqrt()).collect();
    Some(CurvatureEstimate {
        axes: varied.iter().map(|&i| grid.axes()[i].param()).collect(),
        covariance: (0..d).map(|r| (0..d).map(|c| cov[(r, c)]).collect()).collect(),
        sigma,
    })
}
