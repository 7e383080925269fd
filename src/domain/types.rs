//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - used in-memory during fitting
//! - exported to JSON/CSV
//! - passed between independent per-target fits without shared state

use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{Detection, LowSnrPolicy};
use crate::error::FitError;

/// Solar metallicity (mass fraction) used to express Z in solar units.
pub const SOLAR_Z: f64 = 0.01524;

/// Number of physical parameters spanned by the model grid.
pub const N_PARAMS: usize = 5;

/// One physical parameter of the photoionization grid.
///
/// The declaration order is the canonical axis order used everywhere
/// (node index tuples, parameter vectors, result tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ParamAxis {
    /// Gas-phase metallicity (mass fraction, not solar-scaled).
    #[serde(rename = "Z")]
    Z,
    /// Ionization parameter, log10 U.
    #[serde(rename = "LOGU")]
    LogU,
    /// Dust-to-metal mass ratio ξ.
    #[serde(rename = "XI")]
    Xi,
    /// Hydrogen density, log10 n_H [cm^-3].
    #[serde(rename = "NH")]
    LogNh,
    /// Carbon-to-oxygen abundance ratio.
    #[serde(rename = "CO")]
    CO,
}

impl ParamAxis {
    pub const ALL: [ParamAxis; N_PARAMS] = [
        ParamAxis::Z,
        ParamAxis::LogU,
        ParamAxis::Xi,
        ParamAxis::LogNh,
        ParamAxis::CO,
    ];

    /// Position of this axis in index tuples and parameter vectors.
    pub fn index(self) -> usize {
        match self {
            ParamAxis::Z => 0,
            ParamAxis::LogU => 1,
            ParamAxis::Xi => 2,
            ParamAxis::LogNh => 3,
            ParamAxis::CO => 4,
        }
    }

    /// Short column-style key (`Z`, `LOGU`, `XI`, `NH`, `CO`).
    pub fn key(self) -> &'static str {
        match self {
            ParamAxis::Z => "Z",
            ParamAxis::LogU => "LOGU",
            ParamAxis::Xi => "XI",
            ParamAxis::LogNh => "NH",
            ParamAxis::CO => "CO",
        }
    }

    /// Human-readable label for terminal output.
    pub fn label(self) -> &'static str {
        match self {
            ParamAxis::Z => "Z",
            ParamAxis::LogU => "log U",
            ParamAxis::Xi => "xi",
            ParamAxis::LogNh => "log nH",
            ParamAxis::CO => "C/O",
        }
    }

    /// Grid-table column names accepted for this axis, in order of preference.
    pub fn column_aliases(self) -> &'static [&'static str] {
        match self {
            ParamAxis::Z => &["Z", "ZMET"],
            ParamAxis::LogU => &["LOGU", "U"],
            ParamAxis::Xi => &["XI", "XSI"],
            ParamAxis::LogNh => &["NH", "LOGNH", "N_H"],
            ParamAxis::CO => &["CO", "C/O"],
        }
    }

    /// Spacing assumption used when no explicit scale is configured.
    ///
    /// Metallicity grids are sampled roughly uniformly in log Z, every other
    /// axis is already expressed in the space it is sampled in.
    pub fn default_scale(self) -> AxisScale {
        match self {
            ParamAxis::Z => AxisScale::Logarithmic,
            _ => AxisScale::Linear,
        }
    }
}

impl fmt::Display for ParamAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ParamAxis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_uppercase();
        ParamAxis::ALL
            .into_iter()
            .find(|axis| axis.column_aliases().contains(&key.as_str()))
            .ok_or_else(|| format!("unknown parameter axis '{s}' (expected Z, LOGU, XI, NH or CO)"))
    }
}

/// Spacing assumption for an axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AxisScale {
    /// Interpolate linearly in the coordinate itself.
    Linear,
    /// Interpolate linearly in log10 of the coordinate.
    Logarithmic,
}

impl AxisScale {
    /// Map a physical value into interpolation space.
    ///
    /// Returns `None` for non-positive values on a logarithmic axis.
    pub fn to_coord(self, value: f64) -> Option<f64> {
        match self {
            AxisScale::Linear => Some(value),
            AxisScale::Logarithmic if value > 0.0 => Some(value.log10()),
            AxisScale::Logarithmic => None,
        }
    }

    /// Inverse of [`AxisScale::to_coord`].
    pub fn from_coord(self, coord: f64) -> f64 {
        match self {
            AxisScale::Linear => coord,
            AxisScale::Logarithmic => 10f64.powf(coord),
        }
    }
}

/// The sampled values of one grid parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxis {
    param: ParamAxis,
    scale: AxisScale,
    values: Vec<f64>,
    /// `values` mapped into interpolation space, cached so node lookups are exact.
    coords: Vec<f64>,
}

impl GridAxis {
    /// Build an axis from strictly increasing node values.
    ///
    /// Callers (the grid loader) are responsible for sorting, de-duplicating and
    /// checking positivity on logarithmic axes.
    pub(crate) fn new(param: ParamAxis, scale: AxisScale, values: Vec<f64>) -> Self {
        let coords = values
            .iter()
            .map(|&v| scale.to_coord(v).unwrap_or(f64::NEG_INFINITY))
            .collect();
        Self {
            param,
            scale,
            values,
            coords,
        }
    }

    pub fn param(&self) -> ParamAxis {
        self.param
    }

    pub fn scale(&self) -> AxisScale {
        self.scale
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Node values in interpolation space (log10 for logarithmic axes).
    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// A single-valued axis: the grid does not vary this parameter.
    pub fn is_degenerate(&self) -> bool {
        self.values.len() == 1
    }

    pub fn min(&self) -> f64 {
        self.values[0]
    }

    pub fn max(&self) -> f64 {
        self.values[self.values.len() - 1]
    }

    /// Index of the node equal to `value` (relative tolerance 1e-9).
    pub fn node_index(&self, value: f64) -> Option<usize> {
        self.values.iter().position(|&v| same_node(v, value))
    }
}

/// Node equality with a relative tolerance that absorbs float noise from
/// text round-trips of grid tables.
pub(crate) fn same_node(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

/// A continuous point in the 5-dimensional parameter space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector(pub [f64; N_PARAMS]);

impl ParameterVector {
    pub fn new(values: [f64; N_PARAMS]) -> Self {
        Self(values)
    }

    pub fn get(&self, axis: ParamAxis) -> f64 {
        self.0[axis.index()]
    }

    pub fn set(&mut self, axis: ParamAxis, value: f64) {
        self.0[axis.index()] = value;
    }

    pub fn with(mut self, axis: ParamAxis, value: f64) -> Self {
        self.set(axis, value);
        self
    }

    pub fn as_array(&self) -> &[f64; N_PARAMS] {
        &self.0
    }

    /// Metallicity relative to solar, log10(Z / Z☉).
    pub fn log_z_solar(&self) -> f64 {
        (self.get(ParamAxis::Z) / SOLAR_Z).log10()
    }
}

impl Index<ParamAxis> for ParameterVector {
    type Output = f64;

    fn index(&self, axis: ParamAxis) -> &f64 {
        &self.0[axis.index()]
    }
}

impl IndexMut<ParamAxis> for ParameterVector {
    fn index_mut(&mut self, axis: ParamAxis) -> &mut f64 {
        &mut self.0[axis.index()]
    }
}

/// One side of a confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Bound {
    /// The Δχ² threshold was crossed at this parameter value.
    Value(f64),
    /// The grid edge was reached before the threshold: unconstrained.
    GridEdge,
}

impl Bound {
    pub fn value(self) -> Option<f64> {
        match self {
            Bound::Value(v) => Some(v),
            Bound::GridEdge => None,
        }
    }
}

/// Uncertainty on one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AxisUncertainty {
    /// Profile-likelihood interval around the best-fit value.
    Interval { lower: Bound, upper: Bound },
    /// The grid does not vary this parameter.
    Unconstrained,
}

/// Diagnostics from the two-phase search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    /// Best χ² found by the coarse node scan (`None` when an initial guess was supplied).
    pub scan_cost: Option<f64>,
    /// χ² at the start of local refinement.
    pub start_cost: f64,
    /// χ² after local refinement.
    pub refined_cost: f64,
    /// Whether refinement strictly improved on its starting point.
    pub improved_on_scan: bool,
    /// Whether the minimiser met its stopping tolerance.
    pub tolerance_met: bool,
    /// Minimiser iterations used.
    pub iterations: u64,
    /// Grid nodes evaluated by the coarse scan.
    pub nodes_scanned: usize,
    /// `false` when the iteration budget ran out: a best-effort answer.
    pub converged: bool,
}

/// Observed vs. model flux for one line at the best fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineResidual {
    pub line: String,
    pub observed: f64,
    /// Scaled model flux.
    pub model: f64,
    pub uncertainty: f64,
    pub detection: Detection,
    /// This line's χ² term.
    pub contribution: f64,
}

/// Local quadratic approximation of the cost surface at the optimum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurvatureEstimate {
    /// Axes covered, in matrix order.
    pub axes: Vec<ParamAxis>,
    /// Covariance in interpolation space (log10 for logarithmic axes).
    pub covariance: Vec<Vec<f64>>,
    /// Symmetric 1σ errors in interpolation space.
    pub sigma: Vec<f64>,
}

/// Outcome of fitting one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub target: String,
    pub best: ParameterVector,
    /// One entry per axis, in [`ParamAxis::ALL`] order.
    pub uncertainties: [AxisUncertainty; N_PARAMS],
    pub scale: f64,
    pub scale_solved: bool,
    pub chi2: f64,
    pub dof: usize,
    pub reduced_chi2: f64,
    pub residuals: Vec<LineResidual>,
    pub convergence: Convergence,
    pub curvature: Option<CurvatureEstimate>,
}

impl FitResult {
    pub fn uncertainty(&self, axis: ParamAxis) -> AxisUncertainty {
        self.uncertainties[axis.index()]
    }

    /// Best-fit metallicity relative to solar, log10(Z / Z☉).
    pub fn log_z_solar(&self) -> f64 {
        self.best.log_z_solar()
    }
}

/// One target's entry in a batch: its result, or why it failed.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetOutcome {
    pub target: String,
    pub result: Result<FitResult, FitError>,
}

/// A full run's configuration as understood by the pipeline.
///
/// This is derived from CLI flags (plus defaults).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub grid_path: PathBuf,
    pub observed_path: PathBuf,
    /// Restrict the run to these target ids (empty: all targets).
    pub targets: Vec<String>,
    /// Lines to fit; each must be present in the grid.
    pub lines: Vec<String>,
    pub reference_line: Option<String>,
    pub axis_scales: [AxisScale; N_PARAMS],

    pub min_snr: f64,
    pub low_snr: LowSnrPolicy,
    pub fixed: Vec<(ParamAxis, f64)>,

    pub scale: Option<f64>,
    pub max_iters: u64,
    pub delta_chi2: f64,
    pub max_scan_nodes: usize,
    pub curvature: bool,

    pub export_json: Option<PathBuf>,
    pub export_csv: Option<PathBuf>,
}
