//! Synthetic observations and a small demonstration grid.
//!
//! - `mock_spectrum` interpolates a grid at a known parameter vector and adds
//!   seeded Gaussian relative noise. Used by `nebula simulate` and by the
//!   recovery tests.
//! - `demo_grid_table` tabulates a smooth, made-up line-ratio model over a
//!   modest 5-D grid. The functional forms only mimic the qualitative trends
//!   of real photoionization grids (high-ionisation lines rise with log U,
//!   metal lines with Z, carbon lines with C/O); they are not physics.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{LineObservation, ObservedSpectrum, ParamAxis, ParameterVector, N_PARAMS};
use crate::error::{FitError, GridError};
use crate::grid::{Grid, GridSchema, RawGridTable};
use crate::math::evaluate;

/// Lines tabulated by [`demo_grid_table`], in column order.
pub const DEMO_LINES: [&str; 11] = [
    "HB", "HA", "OIII4959", "OIII5007", "OII3727", "NII6584", "SII6716_6731", "HEII4686",
    "CIII1909", "NEIII3869", "OI6300",
];

/// Node values of the demonstration grid, in [`ParamAxis::ALL`] order.
pub fn demo_axes() -> [Vec<f64>; N_PARAMS] {
    [
        vec![0.001, 0.002, 0.004, 0.006, 0.008, 0.014, 0.02, 0.03],
        vec![-4.0, -3.5, -3.0, -2.5, -2.0, -1.5, -1.0],
        vec![0.1, 0.3, 0.5],
        vec![1.0, 2.0, 3.0],
        vec![0.2, 0.4, 0.6, 1.0],
    ]
}

fn demo_model(p: &ParameterVector) -> Vec<f64> {
    let z = p[ParamAxis::Z] / 0.008;
    let u = p[ParamAxis::LogU] + 2.5;
    let xi = p[ParamAxis::Xi];
    let nh = p[ParamAxis::LogNh];
    let co = p[ParamAxis::CO];

    let oiii = 3.0 * z.powf(0.3) * 10f64.powf(0.4 * u) * (1.0 - 0.3 * xi);
    vec![
        1.0,
        2.86 + 0.04 * (nh - 1.0),
        oiii / 2.98,
        oiii,
        2.5 * z.powf(0.5) * 10f64.powf(-0.3 * u) * (1.0 + 0.1 * xi),
        0.3 * z.powf(0.8) * 10f64.powf(-0.35 * u),
        0.4 * z.powf(0.4) * 10f64.powf(-0.45 * u) / (1.0 + 0.3 * (nh - 1.0)),
        0.02 + 0.1 * xi * 10f64.powf(0.2 * u),
        0.5 * co * z.powf(0.2) * 10f64.powf(0.25 * u),
        0.3 * z.powf(0.3) * 10f64.powf(0.5 * u),
        0.05 * z.powf(0.5) * 10f64.powf(-0.6 * u) * (1.0 + 0.2 * xi),
    ]
}

/// The demonstration grid as a raw table (one row per node).
pub fn demo_grid_table() -> RawGridTable {
    RawGridTable::tabulate(&demo_axes(), &DEMO_LINES, demo_model)
}

/// The demonstration grid, loaded with default axis scales.
pub fn demo_grid() -> Result<Grid, GridError> {
    Grid::load(&demo_grid_table(), &GridSchema::new(&DEMO_LINES))
}

/// Mock observation of `grid` at `at`.
///
/// Each line gets flux `f · (1 + noise · N(0, 1))` and uncertainty
/// `rel_err · |f|`, where `f` is the interpolated model flux. Lines with zero
/// model flux are left out.
pub fn mock_spectrum(
    grid: &Grid,
    id: &str,
    at: &ParameterVector,
    noise: f64,
    rel_err: f64,
    seed: u64,
) -> Result<ObservedSpectrum, FitError> {
    if !(noise.is_finite() && noise >= 0.0) {
        return Err(FitError::InvalidConfig(format!("noise must be finite and >= 0, got {noise}")));
    }
    if !(rel_err.is_finite() && rel_err > 0.0) {
        return Err(FitError::InvalidConfig(format!(
            "relative error must be finite and > 0, got {rel_err}"
        )));
    }

    let model = evaluate(grid, at)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| FitError::InvalidConfig(format!("noise distribution error: {e}")))?;

    let mut spectrum = ObservedSpectrum::new(id);
    for (line, flux) in model {
        let sigma = rel_err * flux.abs();
        if sigma <= 0.0 {
            continue;
        }
        let observed = flux * (1.0 + noise * normal.sample(&mut rng));
        spectrum.insert(line, LineObservation::detected(observed, sigma))?;
    }
    Ok(spectrum)
}
