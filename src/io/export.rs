//! Result exports and observation/grid writers.
//!
//! - results JSON: the full `FitResult` per target plus run metadata
//! - results CSV: one flat row per target, easy to load in a spreadsheet
//! - observations CSV: the catalogue format `ingest` reads (used by `simulate`)
//! - grid CSV: a raw grid table (used by `demo-grid`)

use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AxisUncertainty, Bound, Detection, FitResult, ObservedSpectrum, ParamAxis, TargetOutcome,
};
use crate::error::AppError;
use crate::grid::RawGridTable;

/// Schema of the results JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsFile {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub grid: String,
    pub targets: Vec<TargetEntry>,
}

/// One target in the results JSON: exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FitResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultsFile {
    pub fn new(grid: &Path, outcomes: &[TargetOutcome]) -> Self {
        Self {
            tool: "nebula".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            generated_at: Utc::now(),
            grid: grid.display().to_string(),
            targets: outcomes
                .iter()
                .map(|o| TargetEntry {
                    target: o.target.clone(),
                    result: o.result.as_ref().ok().cloned(),
                    error: o.result.as_ref().err().map(|e| e.to_string()),
                })
                .collect(),
        }
    }
}

fn create_error(what: &str, path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::new(2, format!("Failed to create {what} '{}': {e}", path.display()))
}

/// Write the results JSON (pretty-printed).
pub fn write_results_json(path: &Path, file: &ResultsFile) -> Result<(), AppError> {
    let out = File::create(path).map_err(|e| create_error("results JSON", path, e))?;
    serde_json::to_writer_pretty(out, file)
        .map_err(|e| AppError::new(2, format!("Failed to write results JSON: {e}")))?;
    Ok(())
}

/// Read a results JSON file back.
pub fn read_results_json(path: &Path) -> Result<ResultsFile, AppError> {
    let file = File::open(path).map_err(|e| {
        AppError::new(2, format!("Failed to open results JSON '{}': {e}", path.display()))
    })?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::new(2, format!("Invalid results JSON: {e}")))
}

fn bound_cell(u: AxisUncertainty, lower: bool) -> String {
    match u {
        AxisUncertainty::Unconstrained => String::new(),
        AxisUncertainty::Interval { lower: lo, upper: hi } => match if lower { lo } else { hi } {
            Bound::Value(v) => format!("{v:.8}"),
            Bound::GridEdge => "edge".to_string(),
        },
    }
}

fn result_row(r: &FitResult) -> Vec<String> {
    let mut row = vec![r.target.clone(), "ok".to_string()];
    for axis in ParamAxis::ALL {
        row.push(format!("{:.8}", r.best[axis]));
        row.push(bound_cell(r.uncertainty(axis), true));
        row.push(bound_cell(r.uncertainty(axis), false));
    }
    row.push(format!("{:.6}", r.log_z_solar()));
    row.push(format!("{:.8e}", r.scale));
    row.push(format!("{:.6}", r.chi2));
    row.push(r.dof.to_string());
    row.push(format!("{:.6}", r.reduced_chi2));
    row.push(r.convergence.converged.to_string());
    row.push(String::new());
    row
}

/// Write one row per target (failures carry the error message).
pub fn write_results_csv(path: &Path, outcomes: &[TargetOutcome]) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path)
        .map_err(|e| create_error("results CSV", path, e))?;

    let mut header = vec!["target".to_string(), "status".to_string()];
    for axis in ParamAxis::ALL {
        let key = axis.key().to_ascii_lowercase();
        header.push(key.clone());
        header.push(format!("{key}_lo"));
        header.push(format!("{key}_hi"));
    }
    for col in ["log_z_solar", "scale", "chi2", "dof", "reduced_chi2", "converged", "error"] {
        header.push(col.to_string());
    }
    let width = header.len();
    w.write_record(&header)
        .map_err(|e| AppError::new(2, format!("Failed to write results CSV header: {e}")))?;

    for o in outcomes {
        let row = match &o.result {
            Ok(r) => result_row(r),
            Err(e) => {
                let mut row = vec![String::new(); width];
                row[0] = o.target.clone();
                row[1] = "error".to_string();
                row[width - 1] = e.to_string();
                row
            }
        };
        w.write_record(&row)
            .map_err(|e| AppError::new(2, format!("Failed to write results CSV row: {e}")))?;
    }
    w.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush results CSV: {e}")))?;
    Ok(())
}

/// Write spectra in the observations catalogue format.
pub fn write_observations_csv(path: &Path, spectra: &[ObservedSpectrum]) -> Result<(), AppError> {
    let lines: BTreeSet<&str> = spectra.iter().flat_map(|s| s.lines().map(|(l, _)| l)).collect();
    let mut w = csv::Writer::from_path(path)
        .map_err(|e| create_error("observations CSV", path, e))?;

    let mut header = vec!["ID".to_string()];
    for line in &lines {
        header.push(line.to_string());
        header.push(format!("{line}_err"));
        header.push(format!("{line}_flag"));
    }
    w.write_record(&header)
        .map_err(|e| AppError::new(2, format!("Failed to write observations CSV header: {e}")))?;

    for s in spectra {
        let mut row = vec![s.id().to_string()];
        for line in &lines {
            match s.get(line) {
                Some(o) if o.detection.is_usable() => {
                    row.push(format!("{:e}", o.flux));
                    row.push(format!("{:e}", o.uncertainty));
                    row.push(
                        match o.detection {
                            Detection::UpperLimit => "upper_limit",
                            _ => "detected",
                        }
                        .to_string(),
                    );
                }
                _ => row.extend([String::new(), String::new(), "not_observed".to_string()]),
            }
        }
        w.write_record(&row)
            .map_err(|e| AppError::new(2, format!("Failed to write observations CSV row: {e}")))?;
    }
    w.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush observations CSV: {e}")))?;
    Ok(())
}

/// Write a raw grid table as CSV.
pub fn write_grid_csv(path: &Path, table: &RawGridTable) -> Result<(), AppError> {
    let mut w = csv::Writer::from_path(path)
        .map_err(|e| create_error("grid CSV", path, e))?;
    w.write_record(&table.columns)
        .map_err(|e| AppError::new(2, format!("Failed to write grid CSV header: {e}")))?;
    for row in &table.rows {
        w.write_record(row.iter().map(|v| format!("{v:e}")))
            .map_err(|e| AppError::new(2, format!("Failed to write grid CSV row: {e}")))?;
    }
    w.flush()
        .map_err(|e| AppError::new(2, format!("Failed to flush grid CSV: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FitError;
    use crate::io::ingest::{read_grid_csv, read_observations_csv};
    use crate::report::tests::sample_result;

    fn outcomes() -> Vec<TargetOutcome> {
        vec![
            TargetOutcome {
                target: "T1".to_string(),
                result: Ok(sample_result()),
            },
            TargetOutcome {
                target: "T2".to_string(),
                result: Err(FitError::InsufficientData { lines: 2, free: 6 }),
            },
        ]
    }

    #[test]
    fn results_json_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let file = ResultsFile::new(Path::new("grid.csv"), &outcomes());
        write_results_json(&path, &file).unwrap();
        let back = read_results_json(&path).unwrap();
        assert_eq!(back.tool, "nebula");
        assert_eq!(back.targets.len(), 2);
        assert_eq!(back.targets[0].result.as_ref(), Some(&sample_result()));
        assert!(back.targets[1].error.as_deref().unwrap().contains("insufficient"));
    }

    #[test]
    fn results_csv_has_one_row_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        write_results_csv(&path, &outcomes()).unwrap();

        let mut r = csv::Reader::from_path(&path).unwrap();
        let headers = r.headers().unwrap().clone();
        let rows: Vec<csv::StringRecord> = r.records().map(|x| x.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
        assert_eq!(&rows[0][col("status")], "ok");
        assert_eq!(&rows[0][col("logu_hi")], "edge");
        assert_eq!(&rows[0][col("co_lo")], "");
        assert_eq!(&rows[1][col("status")], "error");
        assert!(!rows[1][col("error")].is_empty());
    }

    #[test]
    fn observations_written_are_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.csv");
        let s = ObservedSpectrum::new("mock")
            .with_line("HB", crate::domain::LineObservation::detected(1.0, 0.05))
            .and_then(|s| s.with_line("HA", crate::domain::LineObservation::upper_limit(3.0, 0.1)))
            .unwrap();
        write_observations_csv(&path, std::slice::from_ref(&s)).unwrap();
        let back = read_observations_csv(&path).unwrap();
        assert_eq!(back.spectra, vec![s]);
    }

    #[test]
    fn grid_csv_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.csv");
        let table = RawGridTable::new(
            vec!["Z".into(), "HB".into()],
            vec![vec![0.002, 1.0], vec![0.004, 0.5]],
        );
        write_grid_csv(&path, &table).unwrap();
        assert_eq!(read_grid_csv(&path).unwrap(), table);
    }
}
