//! Single-target fitting entry points.
//!
//! Given:
//! - an immutable model grid
//! - one observed spectrum
//! - an optional initial guess
//!
//! we:
//! - score grid nodes directly to find a start point (coarse scan)
//! - refine locally with Nelder-Mead on the interpolated surface
//! - evaluate the optimum through the public interpolator
//! - walk profile-likelihood intervals on every varied axis
//!
//! and return a [`FitResult`].

use tracing::{debug, info, info_span, warn};

use crate::domain::{Convergence, FitResult, ObservedSpectrum, ParameterVector};
use crate::error::FitError;
use crate::fit::curvature;
use crate::fit::likelihood::{validate_scale, BoundSpectrum, LikelihoodEngine};
use crate::fit::profile::{profile_intervals, ProfileSettings};
use crate::fit::refine::refine;
use crate::fit::scan::coarse_scan;
use crate::grid::Grid;
use crate::math::{evaluate_coords_into, evaluate_into, from_coords, to_coords};
use crate::report::assemble;

/// Search and uncertainty settings for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    /// Fixed normalisation applied to every prediction. `None` solves for it.
    pub scale: Option<f64>,
    /// Node budget for the coarse scan before axes are subsampled.
    pub max_scan_nodes: usize,
    /// Nelder-Mead iteration budget.
    pub max_iters: u64,
    /// Stop once the standard deviation of simplex costs drops below this.
    pub sd_tolerance: f64,
    /// χ² increase that defines the interval edges (1.0 ≈ 68% for one parameter).
    pub delta_chi2: f64,
    /// Profile steps per grid cell before bisection.
    pub profile_steps_per_cell: usize,
    /// Also report a curvature-based covariance.
    pub curvature: bool,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            scale: None,
            max_scan_nodes: 200_000,
            max_iters: 500,
            sd_tolerance: 1e-10,
            delta_chi2: 1.0,
            profile_steps_per_cell: 8,
            curvature: true,
        }
    }
}

impl FitOptions {
    pub fn validate(&self) -> Result<(), FitError> {
        validate_scale(self.scale)?;
        if self.max_scan_nodes == 0 {
            return Err(FitError::InvalidConfig("max_scan_nodes must be >= 1".into()));
        }
        if !(self.sd_tolerance.is_finite() && self.sd_tolerance > 0.0) {
            return Err(FitError::InvalidConfig(format!(
                "sd_tolerance must be finite and > 0, got {}",
                self.sd_tolerance
            )));
        }
        if !(self.delta_chi2.is_finite() && self.delta_chi2 > 0.0) {
            return Err(FitError::InvalidConfig(format!(
                "delta_chi2 must be finite and > 0, got {}",
                self.delta_chi2
            )));
        }
        if self.profile_steps_per_cell == 0 {
            return Err(FitError::InvalidConfig("profile_steps_per_cell must be >= 1".into()));
        }
        Ok(())
    }

    fn profile(&self) -> ProfileSettings {
        ProfileSettings {
            delta_chi2: self.delta_chi2,
            steps_per_cell: self.profile_steps_per_cell,
        }
    }
}

/// Fit one spectrum with default options.
pub fn fit(
    grid: &Grid,
    observed: &ObservedSpectrum,
    initial_guess: Option<ParameterVector>,
) -> Result<FitResult, FitError> {
    fit_with(grid, observed, initial_guess, &FitOptions::default())
}

/// Fit one spectrum.
pub fn fit_with(
    grid: &Grid,
    observed: &ObservedSpectrum,
    initial_guess: Option<ParameterVector>,
    opts: &FitOptions,
) -> Result<FitResult, FitError> {
    opts.validate()?;
    let _span = info_span!("fit", target = observed.id()).entered();

    let engine = LikelihoodEngine::new(grid.varied_axes().len());
    let spectrum = BoundSpectrum::new(grid, observed);
    let scale_solved = opts.scale.is_none();
    let free = engine.free_params(scale_solved);
    // Upper limits may contribute once violated, so only the usable count
    // bounds dof up front. `finish` applies the exact rule at the optimum.
    if spectrum.usable() <= free {
        return Err(FitError::InsufficientData {
            lines: spectrum.usable(),
            free,
        });
    }

    // Phase 1: start point.
    let mut fluxes = vec![0.0; grid.n_lines()];
    let (start, scan) = match initial_guess {
        Some(guess) => {
            let coords = to_coords(grid, &guess)?;
            evaluate_coords_into(grid, &coords, &mut fluxes)?;
            (coords, None)
        }
        None => {
            let scan = coarse_scan(grid, &spectrum, opts.scale, opts.max_scan_nodes);
            debug!(
                nodes = scan.nodes_scanned,
                cost = scan.cost,
                node = ?scan.best,
                "coarse scan done"
            );
            let coords = to_coords(grid, &grid.node_coordinates(&scan.best))?;
            (coords, Some(scan))
        }
    };

    // Phase 2: local refinement.
    let refined = refine(grid, &spectrum, opts.scale, start, opts.max_iters, opts.sd_tolerance)?;
    let converged = refined.tolerance_met || refined.iterations < opts.max_iters;
    if !converged {
        warn!(
            iterations = refined.iterations,
            cost = refined.cost,
            "refinement did not fully converge; reporting best point found"
        );
    }

    // The reported optimum goes through the public interpolator.
    let best = from_coords(grid, &refined.coords);
    evaluate_into(grid, &best, &mut fluxes)?;
    let tally = spectrum.chi_square(&fluxes, opts.scale);
    let evaluation = engine.finish(tally, scale_solved, spectrum.detected())?;

    let uncertainties =
        profile_intervals(grid, &spectrum, opts.scale, &refined.coords, opts.profile());
    let curvature = if opts.curvature {
        curvature::estimate(grid, &spectrum, opts.scale, &refined.coords)
    } else {
        None
    };

    let convergence = Convergence {
        scan_cost: scan.map(|s| s.cost),
        start_cost: refined.start_cost,
        refined_cost: refined.cost,
        improved_on_scan: refined.cost < refined.start_cost,
        tolerance_met: refined.tolerance_met,
        iterations: refined.iterations,
        nodes_scanned: scan.map_or(0, |s| s.nodes_scanned),
        converged,
    };
    info!(
        chi2 = evaluation.chi2,
        dof = evaluation.dof,
        scale = evaluation.scale,
        "fit complete"
    );

    Ok(assemble(
        observed.id(),
        best,
        &evaluation,
        uncertainties,
        spectrum.residuals(&fluxes, evaluation.scale),
        convergence,
        curvature,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{demo_grid, mock_spectrum, DEMO_LINES};
    use crate::math::evaluate;
    use crate::domain::{AxisUncertainty, Bound, LineObservation, ParamAxis};

    fn truth() -> ParameterVector {
        ParameterVector::new([0.006, -2.7, 0.3, 2.0, 0.6])
    }

    #[test]
    fn default_options_validate() {
        assert!(FitOptions::default().validate().is_ok());
        let bad = FitOptions {
            delta_chi2: 0.0,
            ..FitOptions::default()
        };
        assert!(matches!(bad.validate(), Err(FitError::InvalidConfig(_))));
    }

    fn generous() -> FitOptions {
        FitOptions {
            max_iters: 4000,
            ..FitOptions::default()
        }
    }

    /// Widest node spacing on an axis.
    fn max_spacing(grid: &Grid, axis: ParamAxis) -> f64 {
        grid.axis(axis)
            .values()
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(0.0, f64::max)
    }

    #[test]
    fn recovers_noise_free_parameters() {
        let grid = demo_grid().unwrap();
        let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let result = fit_with(&grid, &observed, None, &generous()).unwrap();
        assert!(result.chi2 < 1e-4, "chi2 = {}", result.chi2);
        assert!((result.scale - 1.0).abs() < 1e-2);
        for axis in ParamAxis::ALL {
            assert!(
                (result.best[axis] - truth()[axis]).abs() < max_spacing(&grid, axis),
                "{axis}: {} vs {}",
                result.best[axis],
                truth()[axis]
            );
        }
        assert!(result.convergence.scan_cost.is_some());
        assert!(result.dof >= 1);
    }

    #[test]
    fn exact_node_is_recovered_bit_for_bit_at_zero_cost() {
        let grid = demo_grid().unwrap();
        let node = grid.node_coordinates(&[2, 1, 1, 1, 1]);
        let observed = mock_spectrum(&grid, "node", &node, 0.0, 0.05, 1).unwrap();
        let result = fit(&grid, &observed, None).unwrap();
        assert!(result.chi2 < 1e-12);
        assert_eq!(result.convergence.scan_cost.map(|c| c < 1e-12), Some(true));
    }

    #[test]
    fn too_few_detected_lines_is_insufficient_data() {
        let grid = demo_grid().unwrap();
        let observed = ObservedSpectrum::new("thin")
            .with_line("HB", LineObservation::detected(1.0, 0.1))
            .and_then(|s| s.with_line("OIII5007", LineObservation::detected(3.0, 0.1)))
            .unwrap();
        let err = fit(&grid, &observed, None).unwrap_err();
        assert_eq!(err, FitError::InsufficientData { lines: 2, free: 6 });
    }

    #[test]
    fn violated_limit_lifts_dof_above_zero() {
        let grid = demo_grid().unwrap();
        let mut observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let keep: Vec<String> = DEMO_LINES[..6].iter().map(|l| l.to_string()).collect();
        observed.retain_lines(&keep);
        let model = evaluate(&grid, &truth()).unwrap()[DEMO_LINES[6]];
        observed
            .insert(DEMO_LINES[6], LineObservation::upper_limit(1e-3 * model, 0.05 * model))
            .unwrap();

        let result = fit(&grid, &observed, None).unwrap();
        assert_eq!(result.dof, 1);
        let limit = result.residuals.iter().find(|r| r.line == DEMO_LINES[6]).unwrap();
        assert!(limit.contribution > 0.0);
    }

    #[test]
    fn unviolated_limit_cannot_rescue_too_few_detections() {
        let grid = demo_grid().unwrap();
        let mut observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let keep: Vec<String> = DEMO_LINES[..6].iter().map(|l| l.to_string()).collect();
        observed.retain_lines(&keep);
        observed
            .insert(DEMO_LINES[6], LineObservation::upper_limit(1e9, 1.0))
            .unwrap();

        let err = fit(&grid, &observed, None).unwrap_err();
        assert_eq!(err, FitError::InsufficientData { lines: 6, free: 6 });
    }

    #[test]
    fn initial_guess_outside_grid_is_rejected() {
        let grid = demo_grid().unwrap();
        let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let guess = truth().with(ParamAxis::LogU, 0.5);
        let err = fit(&grid, &observed, Some(guess)).unwrap_err();
        assert!(matches!(err, FitError::OutOfGridBounds { axis: ParamAxis::LogU, .. }));
    }

    #[test]
    fn initial_guess_skips_the_scan() {
        let grid = demo_grid().unwrap();
        let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let result = fit(&grid, &observed, Some(truth())).unwrap();
        assert_eq!(result.convergence.scan_cost, None);
        assert_eq!(result.convergence.nodes_scanned, 0);
        assert!(result.convergence.start_cost < 1e-12);
        assert!(result.chi2 < 1e-12);
    }

    #[test]
    fn fixed_axis_is_unconstrained_and_pinned() {
        let grid = demo_grid().unwrap().fix(ParamAxis::CO, 0.6).unwrap();
        let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let result = fit(&grid, &observed, None).unwrap();
        assert_eq!(result.best[ParamAxis::CO], 0.6);
        assert_eq!(result.uncertainty(ParamAxis::CO), AxisUncertainty::Unconstrained);
        assert!(matches!(
            result.uncertainty(ParamAxis::LogU),
            AxisUncertainty::Interval { .. }
        ));
    }

    #[test]
    fn tiny_budget_is_flagged_not_fatal() {
        let grid = demo_grid().unwrap();
        let observed = mock_spectrum(&grid, "mock", &truth(), 0.02, 0.05, 3).unwrap();
        let opts = FitOptions {
            max_iters: 1,
            sd_tolerance: 1e-300,
            ..FitOptions::default()
        };
        let result = fit_with(&grid, &observed, None, &opts).unwrap();
        assert!(!result.convergence.converged);
        assert!(!result.convergence.tolerance_met);
    }

    #[test]
    fn interval_brackets_the_best_fit() {
        let grid = demo_grid().unwrap();
        let observed = mock_spectrum(&grid, "mock", &truth(), 0.0, 0.05, 1).unwrap();
        let result = fit(&grid, &observed, None).unwrap();
        if let AxisUncertainty::Interval { lower, upper } = result.uncertainty(ParamAxis::LogU) {
            if let Bound::Value(lo) = lower {
                assert!(lo <= result.best[ParamAxis::LogU]);
            }
            if let Bound::Value(hi) = upper {
                assert!(hi >= result.best[ParamAxis::LogU]);
            }
        } else {
            panic!("log U varies on the demo grid");
        }
    }
}
