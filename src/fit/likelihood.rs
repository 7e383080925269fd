//! χ² scoring of model predictions against an observed spectrum.
//!
//! For a (possibly solved) scale factor `s` applied to every prediction:
//!
//! ```text
//! detected:     ((o - s·p) / σ)^2
//! upper limit:  0                    if s·p <= o
//!               ((o - s·p) / σ)^2    otherwise
//! not observed: nothing
//! ```
//!
//! When `s` is not supplied it is the weighted least-squares solution over the
//! detected lines, `s = Σ(o·p/σ²) / Σ(p²/σ²)`, clamped at zero. Upper limits
//! do not enter the scale solution; they only penalise the model afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{Detection, LineObservation, LineResidual, ObservedSpectrum, N_PARAMS};
use crate::error::FitError;
use crate::grid::Grid;

/// Raw χ² tally, before degrees of freedom are assigned.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquare {
    pub chi2: f64,
    pub scale: f64,
    /// Detected lines plus violated upper limits.
    pub contributing: usize,
    pub violated_limits: usize,
}

/// A scored comparison, including degrees of freedom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEvaluation {
    pub chi2: f64,
    pub scale: f64,
    pub scale_solved: bool,
    pub detected: usize,
    pub violated_limits: usize,
    pub contributing: usize,
    pub free_params: usize,
    pub dof: usize,
}

impl CostEvaluation {
    pub fn reduced_chi2(&self) -> f64 {
        self.chi2 / self.dof as f64
    }
}

/// Turns χ² tallies into [`CostEvaluation`]s for a given number of physical
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikelihoodEngine {
    physical_params: usize,
}

impl Default for LikelihoodEngine {
    fn default() -> Self {
        Self::new(N_PARAMS)
    }
}

impl LikelihoodEngine {
    pub fn new(physical_params: usize) -> Self {
        Self { physical_params }
    }

    /// Free parameters: physical ones plus the scale when it is solved for.
    pub fn free_params(&self, scale_solved: bool) -> usize {
        self.physical_params + usize::from(scale_solved)
    }

    /// Score `predicted` against `observed`.
    ///
    /// Observed lines without a prediction are skipped.
    pub fn cost(
        &self,
        observed: &ObservedSpectrum,
        predicted: &BTreeMap<String, f64>,
        scale: Option<f64>,
    ) -> Result<CostEvaluation, FitError> {
        validate_scale(scale)?;
        let terms: Vec<(LineObservation, f64)> = observed
            .lines()
            .filter_map(|(line, obs)| predicted.get(line).map(|&p| (*obs, p)))
            .collect();
        let detected = terms
            .iter()
            .filter(|(o, _)| o.detection == Detection::Detected)
            .count();
        let tally = chi_square(terms.iter().copied(), scale);
        self.finish(tally, scale.is_none(), detected)
    }

    /// Attach degrees of freedom to a tally.
    pub fn finish(
        &self,
        tally: ChiSquare,
        scale_solved: bool,
        detected: usize,
    ) -> Result<CostEvaluation, FitError> {
        let free = self.free_params(scale_solved);
        if tally.contributing <= free {
            return Err(FitError::InsufficientData {
                lines: tally.contributing,
                free,
            });
        }
        Ok(CostEvaluation {
            chi2: tally.chi2,
            scale: tally.scale,
            scale_solved,
            detected,
            violated_limits: tally.violated_limits,
            contributing: tally.contributing,
            free_params: free,
            dof: tally.contributing - free,
        })
    }
}

/// A supplied scale must be a usable multiplier.
pub fn validate_scale(scale: Option<f64>) -> Result<(), FitError> {
    match scale {
        Some(s) if !(s.is_finite() && s >= 0.0) => Err(FitError::InvalidConfig(format!(
            "scale factor must be finite and >= 0, got {s}"
        ))),
        _ => Ok(()),
    }
}

/// Closed-form weighted least-squares scale over detected lines.
pub fn solve_scale<I>(terms: I) -> f64
where
    I: Iterator<Item = (LineObservation, f64)>,
{
    let mut num = 0.0;
    let mut den = 0.0;
    for (obs, p) in terms.filter(|(o, _)| o.detection == Detection::Detected) {
        let w = 1.0 / (obs.uncertainty * obs.uncertainty);
        num += w * obs.flux * p;
        den += w * p * p;
    }
    if den > 0.0 && den.is_finite() && num.is_finite() {
        (num / den).max(0.0)
    } else {
        0.0
    }
}

/// χ² term for one line, or `None` if the line does not contribute.
fn term(obs: &LineObservation, model: f64) -> Option<f64> {
    let r = (obs.flux - model) / obs.uncertainty;
    match obs.detection {
        Detection::Detected => Some(r * r),
        Detection::UpperLimit if model > obs.flux => Some(r * r),
        Detection::UpperLimit | Detection::NotObserved => None,
    }
}

/// Sum the χ² terms of `(observation, unscaled prediction)` pairs.
pub fn chi_square<I>(terms: I, scale: Option<f64>) -> ChiSquare
where
    I: Iterator<Item = (LineObservation, f64)> + Clone,
{
    let s = scale.unwrap_or_else(|| solve_scale(terms.clone()));
    let mut tally = ChiSquare {
        chi2: 0.0,
        scale: s,
        contributing: 0,
        violated_limits: 0,
    };
    for (obs, p) in terms {
        if let Some(t) = term(&obs, s * p) {
            tally.chi2 += t;
            tally.contributing += 1;
            if obs.detection == Detection::UpperLimit {
                tally.violated_limits += 1;
            }
        }
    }
    tally
}

/// An observed spectrum matched against a grid's line order.
///
/// Built once per fit so the χ² walk reads fluxes by grid index with no map
/// lookups. Callers own the flux buffer the interpolator fills.
#[derive(Debug, Clone)]
pub struct BoundSpectrum {
    /// `(line id, grid line index, observation)` for usable lines.
    entries: Vec<(String, usize, LineObservation)>,
    detected: usize,
}

impl BoundSpectrum {
    /// Match `observed` against `grid`; lines the grid does not model are dropped.
    pub fn new(grid: &Grid, observed: &ObservedSpectrum) -> Self {
        let mut entries = Vec::new();
        for (line, obs) in observed.lines() {
            if !obs.detection.is_usable() {
                continue;
            }
            match grid.line_index(line) {
                Some(idx) => entries.push((line.to_string(), idx, *obs)),
                None => warn!(
                    target_id = observed.id(),
                    line,
                    "line not modelled by the grid; ignored"
                ),
            }
        }
        let detected = entries
            .iter()
            .filter(|(_, _, o)| o.detection == Detection::Detected)
            .count();
        Self { entries, detected }
    }

    /// Detected lines the grid can predict.
    pub fn detected(&self) -> usize {
        self.detected
    }

    /// Detected lines plus upper limits the grid can predict.
    pub fn usable(&self) -> usize {
        self.entries.len()
    }

    fn terms<'a>(
        &'a self,
        fluxes: &'a [f64],
    ) -> impl Iterator<Item = (LineObservation, f64)> + Clone + 'a {
        self.entries.iter().map(move |(_, idx, obs)| (*obs, fluxes[*idx]))
    }

    /// χ² of grid-ordered predictions `fluxes`.
    pub fn chi_square(&self, fluxes: &[f64], scale: Option<f64>) -> ChiSquare {
        chi_square(self.terms(fluxes), scale)
    }

    /// Per-line breakdown at a given scale.
    pub fn residuals(&self, fluxes: &[f64], scale: f64) -> Vec<LineResidual> {
        self.entries
            .iter()
            .map(|(line, idx, obs)| {
                let model = scale * fluxes[*idx];
                LineResidual {
                    line: line.clone(),
                    observed: obs.flux,
                    model,
                    uncertainty: obs.uncertainty,
                    detection: obs.detection,
                    contribution: term(obs, model).unwrap_or(0.0),
                }
            })
            .collect()
    }
}
