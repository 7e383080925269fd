//! CSV ingest for model grids and observed line catalogues.
//!
//! Design goals:
//! - **Strict schema** for required columns (clear errors, exit code 2)
//! - **Row-level validation** for observations: a bad target row is skipped
//!   and reported, the rest of the catalogue still loads
//! - **No fitting logic here**: the output is plain domain types

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, warn};

use crate::domain::{
    canonical_line_id, Detection, LineObservation, ObservedSpectrum, DOUBLETS,
};
use crate::error::AppError;
use crate::grid::{Grid, GridSchema, RawGridTable};

/// A row-level problem in an observations file.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Parsed observation catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedSpectra {
    pub spectra: Vec<ObservedSpectrum>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

/// Where one line's values live in an observations row.
#[derive(Debug, Clone)]
struct LineColumns {
    line: String,
    flux: usize,
    err: usize,
    flag: Option<usize>,
}

fn open_reader(path: &Path, what: &str) -> Result<csv::Reader<File>, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(2, format!("Failed to open {what} '{}': {e}", path.display())))?;
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn clean_header(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').to_string()
}

/// Parse a numeric cell; blanks and `nan` become NaN.
fn parse_cell(s: &str) -> Result<f64, String> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("nan") || s.eq_ignore_ascii_case("na") {
        return Ok(f64::NAN);
    }
    s.parse::<f64>().map_err(|_| format!("'{s}' is not a number"))
}

/// Read a grid table: one header row, one numeric row per node.
pub fn read_grid_csv(path: &Path) -> Result<RawGridTable, AppError> {
    let mut reader = open_reader(path, "grid CSV")?;
    let columns: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read grid CSV headers: {e}")))?
        .iter()
        .map(clean_header)
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| AppError::new(2, format!("Grid CSV line {line}: {e}")))?;
        let row = record
            .iter()
            .map(parse_cell)
            .collect::<Result<Vec<f64>, String>>()
            .map_err(|e| AppError::new(2, format!("Grid CSV line {line}: {e}")))?;
        rows.push(row);
    }
    debug!(path = %path.display(), rows = rows.len(), columns = columns.len(), "read grid table");
    Ok(RawGridTable::new(columns, rows))
}

/// Read and validate a grid file in one step.
pub fn load_grid(path: &Path, schema: &GridSchema) -> Result<Grid, AppError> {
    let raw = read_grid_csv(path)?;
    Grid::load(&raw, schema).map_err(|e| {
        AppError::new(2, format!("Malformed grid '{}': {e}", path.display()))
    })
}

/// Read an observations catalogue, one target per row.
///
/// A column `X` is a line when an uncertainty column `X_err_new` or `X_err`
/// exists (the former wins); an optional `X_flag` column sets the detection
/// state. Everything else (besides `ID`) is ignored. Unresolved doublets are
/// blended when only their components were measured.
pub fn read_observations_csv(path: &Path) -> Result<IngestedSpectra, AppError> {
    let mut reader = open_reader(path, "observations CSV")?;
    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read observations CSV headers: {e}")))?
        .clone();
    let (id_col, line_cols) = resolve_observation_columns(&headers)?;

    let mut spectra = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };
        let id = record.get(id_col).unwrap_or("").to_string();
        match parse_spectrum(&record, &id, &line_cols) {
            Ok(spectrum) => spectra.push(spectrum),
            Err(message) => row_errors.push(RowError {
                line,
                id: Some(id),
                message,
            }),
        }
    }

    for e in &row_errors {
        warn!(line = e.line, id = e.id.as_deref().unwrap_or(""), "{}", e.message);
    }
    if spectra.is_empty() {
        return Err(AppError::new(
            3,
            format!("No usable targets in '{}'.", path.display()),
        ));
    }
    Ok(IngestedSpectra {
        spectra,
        row_errors,
        rows_read,
    })
}

fn resolve_observation_columns(
    headers: &StringRecord,
) -> Result<(usize, Vec<LineColumns>), AppError> {
    let names: Vec<String> = headers.iter().map(clean_header).collect();
    let lower: HashMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.to_ascii_lowercase(), i))
        .collect();

    let id_col = *lower
        .get("id")
        .ok_or_else(|| AppError::new(2, "Missing required column: `ID`"))?;

    let mut out: Vec<LineColumns> = Vec::new();
    for (col, name) in names.iter().enumerate() {
        let key = name.to_ascii_lowercase();
        let is_companion =
            key.ends_with("_err") || key.ends_with("_err_new") || key.ends_with("_flag");
        if col == id_col || is_companion {
            continue;
        }
        let err = lower
            .get(&format!("{key}_err_new"))
            .or_else(|| lower.get(&format!("{key}_err")));
        let Some(&err) = err else {
            continue;
        };
        let line = canonical_line_id(name);
        if out.iter().any(|c| c.line == line) {
            return Err(AppError::new(
                2,
                format!("Line `{line}` appears more than once in the observations header."),
            ));
        }
        out.push(LineColumns {
            line,
            flux: col,
            err,
            flag: lower.get(&format!("{key}_flag")).copied(),
        });
    }
    if out.is_empty() {
        return Err(AppError::new(
            2,
            "No line columns found: expected `<LINE>` with `<LINE>_err` pairs.",
        ));
    }
    Ok((id_col, out))
}

fn parse_spectrum(
    record: &StringRecord,
    id: &str,
    cols: &[LineColumns],
) -> Result<ObservedSpectrum, String> {
    if id.is_empty() {
        return Err("Missing target ID.".to_string());
    }
    let mut spectrum = ObservedSpectrum::new(id);
    for c in cols {
        let cell = |i: usize| record.get(i).unwrap_or("");
        let flux = parse_cell(cell(c.flux)).map_err(|e| format!("{}: {e}", c.line))?;
        let err = parse_cell(cell(c.err)).map_err(|e| format!("{}_err: {e}", c.line))?;
        let flagged = match c.flag.map(cell).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                Detection::parse_flag(raw)
                    .ok_or_else(|| format!("{}_flag: unknown flag '{raw}'", c.line))?,
            ),
            None => None,
        };

        let obs = if flux.is_nan() {
            LineObservation::not_observed()
        } else {
            match flagged.unwrap_or(Detection::Detected) {
                Detection::Detected => LineObservation::detected(flux, err),
                Detection::UpperLimit => LineObservation::upper_limit(flux, err),
                Detection::NotObserved => LineObservation::not_observed(),
            }
        };
        spectrum.insert(c.line.clone(), obs).map_err(|e| e.to_string())?;
    }
    for (a, b, into) in DOUBLETS {
        if spectrum.blend_doublet(a, b, into) {
            debug!(target_id = id, blend = into, "blended doublet components");
        }
    }
    Ok(spectrum)
}
