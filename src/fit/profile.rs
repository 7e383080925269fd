//! Profile-likelihood intervals.
//!
//! For each varied axis we walk away from the best fit in both directions with
//! every other parameter held fixed (the scale is re-solved at each step when
//! it is free), in steps of a fraction of the local cell width. The first step
//! whose χ² exceeds the optimum by `delta_chi2` brackets the crossing, which is
//! then refined by bisection. Reaching the grid edge first reports
//! [`Bound::GridEdge`]: the data do not constrain that side inside the grid.

use crate::domain::{AxisUncertainty, Bound, ParamAxis, N_PARAMS};
use crate::fit::likelihood::BoundSpectrum;
use crate::fit::refine::chi2_at;
use crate::grid::Grid;

const BISECTION_STEPS: usize = 60;

/// Settings for the interval search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSettings {
    pub delta_chi2: f64,
    pub steps_per_cell: usize,
}

/// Width of the cell a step from `x` in direction `dir` moves through.
fn cell_width(coords: &[f64], x: f64, dir: f64) -> f64 {
    let n = coords.len();
    let lower = if dir > 0.0 {
        coords.partition_point(|&c| c <= x)
    } else {
        coords.partition_point(|&c| c < x)
    }
    .clamp(1, n - 1)
        - 1;
    coords[lower + 1] - coords[lower]
}

/// Walk one side of one axis. `x0` and `base` are the optimum and its χ².
fn walk(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    best: &[f64; N_PARAMS],
    axis: usize,
    dir: f64,
    base: f64,
    settings: ProfileSettings,
) -> Bound {
    let coords = grid.axes()[axis].coords();
    let edge = if dir > 0.0 { coords[coords.len() - 1] } else { coords[0] };
    let threshold = base + settings.delta_chi2;
    let cost_at = |x: f64| {
        let mut p = *best;
        p[axis] = x;
        chi2_at(grid, spectrum, scale, &p)
    };

    let steps_per_cell = settings.steps_per_cell.max(1) as f64;
    let max_steps = (coords.len() + 1) * settings.steps_per_cell.max(1) + 2;
    let mut prev = best[axis];
    for _ in 0..max_steps {
        if (edge - prev) * dir <= 0.0 {
            return Bound::GridEdge;
        }
        let step = cell_width(coords, prev, dir) / steps_per_cell;
        let mut next = prev + dir * step;
        if (edge - next) * dir < 0.0 {
            next = edge;
        }
        if cost_at(next) >= threshold {
            let (mut inside, mut outside) = (prev, next);
            for _ in 0..BISECTION_STEPS {
                let mid = 0.5 * (inside + outside);
                if cost_at(mid) >= threshold {
                    outside = mid;
                } else {
                    inside = mid;
                }
            }
            let crossing = 0.5 * (inside + outside);
            return Bound::Value(grid.axes()[axis].scale().from_coord(crossing));
        }
        prev = next;
    }
    Bound::GridEdge
}

/// Profile interval for every axis, in [`ParamAxis::ALL`] order.
///
/// `best` is the optimum in interpolation space.
pub fn profile_intervals(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    best: &[f64; N_PARAMS],
    settings: ProfileSettings,
) -> [AxisUncertainty; N_PARAMS] {
    ParamAxis::ALL.map(|axis| profile_axis(grid, spectrum, scale, best, axis, settings))
}

/// Interval on one axis only; `Unconstrained` for a degenerate axis.
pub fn profile_axis(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    best: &[f64; N_PARAMS],
    axis: ParamAxis,
    settings: ProfileSettings,
) -> AxisUncertainty {
    let i = axis.index();
    if grid.axes()[i].is_degenerate() {
        return AxisUncertainty::Unconstrained;
    }
    let base = chi2_at(grid, spectrum, scale, best);
    AxisUncertainty::Interval {
        lower: walk(grid, spectrum, scale, best, i, -1.0, base, settings),
        upper: walk(grid, spectrum, scale, best, i, 1.0, base, settings),
    }
}
