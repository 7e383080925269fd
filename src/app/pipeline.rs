//! Shared "fit pipeline" logic behind the `fit` command.
//!
//! Keeping this in one place keeps the workflow testable without a process:
//! grid load -> axis fixes -> catalogue ingest -> line/SNR filtering -> parallel fits
//!
//! `app` only handles presentation (printing and exports).

use std::path::Path;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::domain::{
    canonical_line_list, AxisScale, ObservedSpectrum, RunConfig, TargetOutcome, DEFAULT_FIT_LINES,
    N_PARAMS,
};
use crate::error::AppError;
use crate::fit::{fit_with, FitOptions};
use crate::grid::{Grid, GridSchema, RawGridTable, SharedGrid};
use crate::io::ingest::{read_grid_csv, read_observations_csv, RowError};

/// All computed outputs of a single `nebula fit` run.
#[derive(Debug)]
pub struct RunOutput {
    pub grid: SharedGrid,
    pub outcomes: Vec<TargetOutcome>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

impl RunOutput {
    pub fn fitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }
}

/// Per-target search settings carried by a run configuration.
pub fn fit_options(config: &RunConfig) -> FitOptions {
    FitOptions {
        scale: config.scale,
        max_scan_nodes: config.max_scan_nodes,
        max_iters: config.max_iters,
        delta_chi2: config.delta_chi2,
        curvature: config.curvature,
        ..FitOptions::default()
    }
}

/// Schema for a grid table under `config`.
///
/// Without an explicit line list the default fit lines are used, restricted to
/// those the table actually provides.
pub fn grid_schema(config: &RunConfig, raw: &RawGridTable) -> Result<GridSchema, AppError> {
    let lines = if config.lines.is_empty() {
        let available = raw.line_columns();
        let defaults: Vec<String> = canonical_line_list(&DEFAULT_FIT_LINES)
            .into_iter()
            .filter(|l| available.contains(l))
            .collect();
        if defaults.is_empty() {
            return Err(AppError::new(
                2,
                format!(
                    "Grid provides none of the default lines ({}); pass --lines.",
                    DEFAULT_FIT_LINES.join(", ")
                ),
            ));
        }
        defaults
    } else {
        canonical_line_list(&config.lines)
    };

    let mut schema = GridSchema::new(&lines);
    schema.scales = config.axis_scales;
    if let Some(reference) = &config.reference_line {
        schema = schema.with_reference_line(reference);
    }
    Ok(schema)
}

/// Load a grid file and apply the configured axis fixes.
pub fn load_run_grid(config: &RunConfig) -> Result<Grid, AppError> {
    let raw = read_grid_csv(&config.grid_path)?;
    let schema = grid_schema(config, &raw)?;
    let mut grid = Grid::load(&raw, &schema).map_err(|e| {
        AppError::new(2, format!("Malformed grid '{}': {e}", config.grid_path.display()))
    })?;
    for &(axis, value) in &config.fixed {
        grid = grid.fix(axis, value)?;
        info!(axis = %axis, value, "fixed grid axis");
    }
    info!(
        nodes = grid.node_count(),
        lines = grid.n_lines(),
        varied = grid.varied_axes().len(),
        "grid loaded"
    );
    Ok(grid)
}

/// Restrict a spectrum to the grid's lines and apply the SNR policy.
pub fn prepare_spectrum(
    mut spectrum: ObservedSpectrum,
    grid: &Grid,
    config: &RunConfig,
) -> ObservedSpectrum {
    spectrum.retain_lines(grid.lines());
    let demoted = spectrum.apply_snr_threshold(config.min_snr, config.low_snr);
    if !demoted.is_empty() {
        info!(
            target_id = spectrum.id(),
            lines = ?demoted,
            policy = ?config.low_snr,
            "low-SNR detections demoted"
        );
    }
    spectrum
}

/// Keep only the requested targets (all of them when `targets` is empty).
fn select_targets(
    spectra: Vec<ObservedSpectrum>,
    targets: &[String],
) -> Result<Vec<ObservedSpectrum>, AppError> {
    if targets.is_empty() {
        return Ok(spectra);
    }
    for t in targets {
        if !spectra.iter().any(|s| s.id() == t) {
            warn!(target_id = %t, "requested target not in catalogue");
        }
    }
    let selected: Vec<ObservedSpectrum> = spectra
        .into_iter()
        .filter(|s| targets.iter().any(|t| t == s.id()))
        .collect();
    if selected.is_empty() {
        return Err(AppError::new(3, "None of the requested targets are in the catalogue."));
    }
    Ok(selected)
}

/// Fit every spectrum against the current grid snapshot.
///
/// Targets run in parallel; a failing target is reported in its outcome and
/// never stops the others. Output order follows input order.
pub fn fit_all(
    grid: &SharedGrid,
    spectra: &[ObservedSpectrum],
    opts: &FitOptions,
) -> Vec<TargetOutcome> {
    let snapshot = grid.snapshot();
    spectra
        .par_iter()
        .map(|spectrum| {
            let result = fit_with(&snapshot, spectrum, None, opts);
            if let Err(e) = &result {
                warn!(target_id = spectrum.id(), error = %e, "fit failed");
            }
            TargetOutcome {
                target: spectrum.id().to_string(),
                result,
            }
        })
        .collect()
}

/// Execute the full `fit` workflow.
pub fn run_fit(config: &RunConfig) -> Result<RunOutput, AppError> {
    let opts = fit_options(config);
    opts.validate()?;
    validate_thresholds(config)?;

    let grid = load_run_grid(config)?;
    let ingested = read_observations_csv(&config.observed_path)?;
    let spectra: Vec<ObservedSpectrum> = select_targets(ingested.spectra, &config.targets)?
        .into_iter()
        .map(|s| prepare_spectrum(s, &grid, config))
        .collect();
    info!(targets = spectra.len(), rows = ingested.rows_read, "fitting targets");

    let grid = SharedGrid::new(grid);
    let outcomes = fit_all(&grid, &spectra, &opts);
    Ok(RunOutput {
        grid,
        outcomes,
        row_errors: ingested.row_errors,
        rows_read: ingested.rows_read,
    })
}

fn validate_thresholds(config: &RunConfig) -> Result<(), AppError> {
    if !(config.min_snr.is_finite() && config.min_snr >= 0.0) {
        return Err(AppError::new(
            2,
            format!("--min-snr must be finite and >= 0, got {}", config.min_snr),
        ));
    }
    Ok(())
}

/// Load a grid for the inspection commands (`grid-info`, `simulate`).
///
/// With no explicit line list every line column of the table is kept.
pub fn load_grid_for_inspection(
    path: &Path,
    lines: &[String],
    reference_line: Option<&str>,
    scales: [AxisScale; N_PARAMS],
) -> Result<Grid, AppError> {
    let raw = read_grid_csv(path)?;
    let lines = if lines.is_empty() {
        raw.line_columns()
    } else {
        canonical_line_list(lines)
    };
    let mut schema = GridSchema::new(&lines);
    schema.scales = scales;
    if let Some(reference) = reference_line {
        schema = schema.with_reference_line(reference);
    }
    Grid::load(&raw, &schema)
        .map_err(|e| AppError::new(2, format!("Malformed grid '{}': {e}", path.display())))
}
