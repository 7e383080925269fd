//! Reporting utilities: result assembly, residual rankings and terminal output.

pub mod format;

pub use format::*;

use crate::domain::{
    AxisUncertainty, Convergence, CurvatureEstimate, FitResult, LineResidual, ParameterVector,
    N_PARAMS,
};
use crate::fit::likelihood::CostEvaluation;

/// Build the immutable [`FitResult`] from the pieces a fit produces.
pub fn assemble(
    target: &str,
    best: ParameterVector,
    evaluation: &CostEvaluation,
    uncertainties: [AxisUncertainty; N_PARAMS],
    residuals: Vec<LineResidual>,
    convergence: Convergence,
    curvature: Option<CurvatureEstimate>,
) -> FitResult {
    FitResult {
        target: target.to_string(),
        best,
        uncertainties,
        scale: evaluation.scale,
        scale_solved: evaluation.scale_solved,
        chi2: evaluation.chi2,
        dof: evaluation.dof,
        reduced_chi2: evaluation.reduced_chi2(),
        residuals,
        convergence,
        curvature,
    }
}

/// Lines with the largest χ² contribution first (top `top_n`).
pub fn worst_lines(result: &FitResult, top_n: usize) -> Vec<LineResidual> {
    let mut sorted = result.residuals.clone();
    sorted.sort_by(|a, b| {
        b.contribution
            .partial_cmp(&a.contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.line.cmp(&b.line))
    });
    sorted.truncate(top_n);
    sorted
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{Bound, Detection};

    pub(crate) fn sample_result() -> FitResult {
        let evaluation = CostEvaluation {
            chi2: 3.0,
            scale: 2.0,
            scale_solved: true,
            detected: 9,
            violated_limits: 0,
            contributing: 9,
            free_params: 6,
            dof: 3,
        };
        let residual = |line: &str, contribution: f64| LineResidual {
            line: line.to_string(),
            observed: 1.0,
            model: 1.1,
            uncertainty: 0.1,
            detection: Detection::Detected,
            contribution,
        };
        let interval = AxisUncertainty::Interval {
            lower: Bound::Value(-3.0),
            upper: Bound::GridEdge,
        };
        assemble(
            "T1",
            ParameterVector::new([0.01524, -2.5, 0.3, 2.0, 0.6]),
            &evaluation,
            [
                interval,
                interval,
                interval,
                interval,
                AxisUncertainty::Unconstrained,
            ],
            vec![residual("HB", 0.5), residual("OIII5007", 2.0), residual("HA", 0.5)],
            Convergence {
                scan_cost: Some(10.0),
                start_cost: 10.0,
                refined_cost: 3.0,
                improved_on_scan: true,
                tolerance_met: true,
                iterations: 120,
                nodes_scanned: 2016,
                converged: true,
            },
            None,
        )
    }

    #[test]
    fn assemble_computes_reduced_chi2() {
        let r = sample_result();
        assert_eq!(r.reduced_chi2, 1.0);
        assert_eq!(r.dof, 3);
        assert!(r.log_z_solar().abs() < 1e-12);
    }

    #[test]
    fn worst_lines_sorted_with_stable_ties() {
        let r = sample_result();
        let worst = worst_lines(&r, 2);
        assert_eq!(worst.len(), 2);
        assert_eq!(worst[0].line, "OIII5007");
        assert_eq!(worst[1].line, "HA");
    }
}
