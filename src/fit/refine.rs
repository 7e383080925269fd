//! Local refinement with Nelder-Mead.
//!
//! The search runs over the varied axes only, in normalised coordinates
//! `u ∈ [0, 1]` (interpolation space divided by the axis span) so that axes
//! with very different units get comparable simplex steps. Vertices outside
//! the unit box are clamped before interpolation and pay a quadratic penalty
//! on the excursion, which keeps the simplex inside the grid without ever
//! handing the interpolator an out-of-range query.

use std::cell::RefCell;

use argmin::core::{CostFunction, Executor, State, TerminationReason, TerminationStatus};
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

use crate::domain::N_PARAMS;
use crate::error::FitError;
use crate::fit::likelihood::BoundSpectrum;
use crate::grid::Grid;
use crate::math::evaluate_coords_into;

/// Weight of the squared excursion outside the unit box.
const EXCURSION_PENALTY: f64 = 1e4;

/// Result of one refinement run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineOutcome {
    /// Best point, interpolation space.
    pub coords: [f64; N_PARAMS],
    pub cost: f64,
    pub start_cost: f64,
    pub iterations: u64,
    pub tolerance_met: bool,
}

/// Normalised view of the varied axes of a grid.
#[derive(Debug, Clone)]
pub(crate) struct UnitBox {
    varied: Vec<usize>,
    lo: [f64; N_PARAMS],
    span: [f64; N_PARAMS],
}

impl UnitBox {
    pub(crate) fn new(grid: &Grid) -> Self {
        let mut varied = Vec::new();
        let mut lo = [0.0; N_PARAMS];
        let mut span = [0.0; N_PARAMS];
        for (i, axis) in grid.axes().iter().enumerate() {
            let c = axis.coords();
            lo[i] = c[0];
            span[i] = c[c.len() - 1] - c[0];
            if !axis.is_degenerate() {
                varied.push(i);
            }
        }
        Self { varied, lo, span }
    }

    pub(crate) fn dim(&self) -> usize {
        self.varied.len()
    }

    pub(crate) fn to_unit(&self, coords: &[f64; N_PARAMS]) -> Vec<f64> {
        self.varied
            .iter()
            .map(|&i| (coords[i] - self.lo[i]) / self.span[i])
            .collect()
    }

    /// Clamp `u` into the box and map it onto `template`; returns the squared excursion.
    pub(crate) fn to_coords(
        &self,
        u: &[f64],
        template: &[f64; N_PARAMS],
    ) -> ([f64; N_PARAMS], f64) {
        let mut coords = *template;
        let mut excursion = 0.0;
        for (&i, &ui) in self.varied.iter().zip(u) {
            let clamped = if ui.is_nan() { 0.0 } else { ui.clamp(0.0, 1.0) };
            excursion += (ui - clamped).powi(2);
            coords[i] = self.lo[i] + clamped * self.span[i];
        }
        (coords, excursion)
    }
}

struct ChiSquareCost<'a> {
    grid: &'a Grid,
    spectrum: &'a BoundSpectrum,
    scale: Option<f64>,
    unit: &'a UnitBox,
    template: [f64; N_PARAMS],
    /// Interpolated fluxes, reused across simplex evaluations.
    fluxes: RefCell<Vec<f64>>,
}

/// χ² at a point inside the grid; `f64::MAX` for anything unusable.
pub(crate) fn chi2_at(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    coords: &[f64; N_PARAMS],
) -> f64 {
    let mut fluxes = vec![0.0; grid.n_lines()];
    chi2_into(grid, spectrum, scale, coords, &mut fluxes)
}

/// [`chi2_at`] writing the interpolated fluxes into `fluxes`.
fn chi2_into(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    coords: &[f64; N_PARAMS],
    fluxes: &mut [f64],
) -> f64 {
    match evaluate_coords_into(grid, coords, fluxes) {
        Ok(()) => {
            let c = spectrum.chi_square(fluxes, scale).chi2;
            if c.is_finite() { c } else { f64::MAX }
        }
        Err(_) => f64::MAX,
    }
}

impl CostFunction for ChiSquareCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, u: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let (coords, excursion) = self.unit.to_coords(u, &self.template);
        let mut fluxes = self.fluxes.borrow_mut();
        let chi2 = chi2_into(self.grid, self.spectrum, self.scale, &coords, &mut fluxes);
        Ok(if chi2 == f64::MAX {
            chi2
        } else {
            chi2 + EXCURSION_PENALTY * excursion
        })
    }
}

/// Initial simplex: the start point plus one node spacing along each varied
/// axis, stepping towards the interior (capped at the far edge).
fn initial_simplex(grid: &Grid, unit: &UnitBox, start: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for (k, &i) in unit.varied.iter().enumerate() {
        let coords = grid.axes()[i].coords();
        let x = unit.lo[i] + start[k] * unit.span[i];
        let above = coords.partition_point(|&c| c <= x).clamp(1, coords.len() - 1);
        let step = (coords[above] - coords[above - 1]) / unit.span[i];
        let (dir, room) = if start[k] <= 0.5 {
            (1.0, 1.0 - start[k])
        } else {
            (-1.0, start[k])
        };
        let mut vertex = start.to_vec();
        vertex[k] = start[k] + dir * step.min(room);
        simplex.push(vertex);
    }
    simplex
}

/// Refine `start` (interpolation space) with Nelder-Mead.
///
/// Degenerate axes keep their `start` value. If the grid varies no axis at all
/// the start point is returned unchanged.
pub fn refine(
    grid: &Grid,
    spectrum: &BoundSpectrum,
    scale: Option<f64>,
    start: [f64; N_PARAMS],
    max_iters: u64,
    sd_tolerance: f64,
) -> Result<RefineOutcome, FitError> {
    let unit = UnitBox::new(grid);
    let cost = ChiSquareCost {
        grid,
        spectrum,
        scale,
        unit: &unit,
        template: start,
        fluxes: RefCell::new(vec![0.0; grid.n_lines()]),
    };
    let start_cost = chi2_at(grid, spectrum, scale, &start);

    if unit.dim() == 0 || max_iters == 0 {
        return Ok(RefineOutcome {
            coords: start,
            cost: start_cost,
            start_cost,
            iterations: 0,
            tolerance_met: unit.dim() == 0,
        });
    }

    let u0 = unit.to_unit(&start);
    let simplex = initial_simplex(grid, &unit, &u0);
    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(sd_tolerance)
        .map_err(|e| FitError::Optimization(e.to_string()))?;
    let result = Executor::new(cost, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
        .map_err(|e| FitError::Optimization(e.to_string()))?;

    let state = result.state();
    let iterations = state.get_iter();
    let tolerance_met = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
    );
    let best_u = state
        .best_param
        .as_ref()
        .ok_or_else(|| FitError::Optimization("Nelder-Mead produced no parameters".into()))?;
    let (coords, _) = unit.to_coords(best_u, &start);

    // Score the clamped point without the penalty; keep the start if it is better.
    let refined = chi2_at(grid, spectrum, scale, &coords);
    debug!(iterations, start_cost, refined, tolerance_met, "nelder-mead finished");

    let (coords, cost) = if refined <= start_cost {
        (coords, refined)
    } else {
        (start, start_cost)
    };
    Ok(RefineOutcome {
        coords,
        cost,
        start_cost,
        iterations,
        tolerance_met,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LineObservation, ObservedSpectrum, ParamAxis, ParameterVector};
    use crate::grid::store::tests::toy_grid;
    use crate::math::{evaluate, to_coords};

    #[test]
    fn unit_box_clamps_and_reports_excursion() {
        let grid = toy_grid();
        let unit = UnitBox::new(&grid);
        assert_eq!(unit.dim(), 5);
        let template = [0.0; N_PARAMS];
        let (coords, excursion) = unit.to_coords(&[1.5, 0.5, -0.5, 0.0, 1.0], &template);
        assert!((excursion - 0.5).abs() < 1e-12);
        assert!((coords[0] - grid.axis(ParamAxis::Z).coords()[2]).abs() < 1e-12);
        assert_eq!(coords[2], grid.axis(ParamAxis::Xi).coords()[0]);
    }

    #[test]
    fn simplex_steps_inward_from_the_upper_edge() {
        let grid = toy_grid();
        let unit = UnitBox::new(&grid);
        let simplex = initial_simplex(&grid, &unit, &[1.0, 0.0, 1.0, 0.0, 0.5]);
        assert_eq!(simplex.len(), 6);
        assert!(simplex[1][0] < 1.0);
        assert!(simplex[2][1] > 0.0);
        assert!(simplex[3][2] < 1.0);
        assert!(simplex[4][3] > 0.0);
    }

    #[test]
    fn reused_flux_buffer_matches_fresh_evaluation() {
        let grid = toy_grid();
        let truth = ParameterVector::new([0.005, -2.8, 0.2, 1.5, 0.7]);
        let mut s = ObservedSpectrum::new("t");
        for (line, flux) in evaluate(&grid, &truth).unwrap() {
            s.insert(line, LineObservation::detected(flux, 0.05)).unwrap();
        }
        let bound = BoundSpectrum::new(&grid, &s);
        let unit = UnitBox::new(&grid);
        let template = [0.0; N_PARAMS];
        let cost = ChiSquareCost {
            grid: &grid,
            spectrum: &bound,
            scale: Some(1.0),
            unit: &unit,
            template,
            fluxes: RefCell::new(vec![0.0; grid.n_lines()]),
        };
        for u in [[0.1, 0.9, 0.3, 0.5, 0.2], [0.8, 0.2, 0.7, 0.0, 1.0], [0.1, 0.9, 0.3, 0.5, 0.2]] {
            let (coords, _) = unit.to_coords(&u, &template);
            let fresh = chi2_at(&grid, &bound, Some(1.0), &coords);
            assert_eq!(cost.cost(&u.to_vec()).unwrap(), fresh);
        }
    }

    #[test]
    fn refinement_never_worsens_the_start() {
        let grid = toy_grid();
        let truth = ParameterVector::new([0.005, -2.8, 0.2, 1.5, 0.7]);
        let mut s = ObservedSpectrum::new("t");
        for (line, flux) in evaluate(&grid, &truth).unwrap() {
            s.insert(line, LineObservation::detected(flux, 0.05)).unwrap();
        }
        let bound = BoundSpectrum::new(&grid, &s);
        let start = to_coords(&grid, &grid.node_coordinates(&[1, 1, 0, 0, 0])).unwrap();
        let out = refine(&grid, &bound, Some(1.0), start, 500, 1e-12).unwrap();
        assert!(out.cost <= out.start_cost);
        assert!(out.iterations > 0);
        for i in 0..N_PARAMS {
            let c = grid.axes()[i].coords();
            assert!(out.coords[i] >= c[0] && out.coords[i] <= c[c.len() - 1]);
        }
    }
}
