//! Grid loading and node access.
//!
//! The raw table is validated once against a [`GridSchema`] and converted into
//! a dense arena: one `f64` per (node, line), nodes laid out row-major over the
//! five axes with the last axis (`CO`) varying fastest. A node is addressed by
//! its per-axis index tuple and found in O(1) via precomputed strides.
//!
//! Load-time guarantees (anything else is a [`GridError`]):
//! - every axis column exists, and every requested line has a column (a
//!   near-miss label falls back to its most similar column, with a warning)
//! - every used value is finite, log-spaced axes are strictly positive
//! - rows form the full Cartesian product of the axis values, each once

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::domain::{
    canonical_line_id, canonical_line_list, closest_label, same_node, AxisScale, GridAxis,
    ParamAxis, ParameterVector, N_PARAMS,
};
use crate::error::GridError;

/// Node index tuple, one entry per axis in [`ParamAxis::ALL`] order.
pub type NodeIndex = [usize; N_PARAMS];

/// A grid table as delivered by an external reader: named numeric columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawGridTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

impl RawGridTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { columns, rows }
    }

    /// Tabulate `model` over the Cartesian product of `axis_values`.
    ///
    /// Columns are the axis keys (`Z`, `LOGU`, `XI`, `NH`, `CO`) followed by
    /// `lines`; `model` must return one flux per line.
    pub fn tabulate<F>(axis_values: &[Vec<f64>; N_PARAMS], lines: &[&str], model: F) -> Self
    where
        F: Fn(&ParameterVector) -> Vec<f64>,
    {
        let mut columns: Vec<String> = ParamAxis::ALL.iter().map(|a| a.key().to_string()).collect();
        columns.extend(lines.iter().map(|l| l.to_string()));

        let shape: NodeIndex = std::array::from_fn(|i| axis_values[i].len());
        let n_nodes: usize = shape.iter().product();
        let strides = strides_for(&shape);

        let mut rows = Vec::with_capacity(n_nodes);
        for linear in 0..n_nodes {
            let idx = unravel(linear, &shape, &strides);
            let p = ParameterVector::new(std::array::from_fn(|i| axis_values[i][idx[i]]));
            let mut row = p.as_array().to_vec();
            row.extend(model(&p));
            rows.push(row);
        }
        Self { columns, rows }
    }

    /// Canonical ids of every column that is not a parameter axis.
    pub fn line_columns(&self) -> Vec<String> {
        let is_axis = |c: &str| {
            let key = c.trim().trim_start_matches('\u{feff}').to_ascii_uppercase();
            key == "LOGZ"
                || ParamAxis::ALL
                    .iter()
                    .any(|a| a.column_aliases().contains(&key.as_str()))
        };
        let lines: Vec<&str> = self
            .columns
            .iter()
            .map(String::as_str)
            .filter(|c| !is_axis(c))
            .collect();
        canonical_line_list(&lines)
    }
}

/// Required columns and interpolation settings for a grid table.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSchema {
    /// Spacing assumption per axis, in [`ParamAxis::ALL`] order.
    pub scales: [AxisScale; N_PARAMS],
    /// Canonical ids of the lines every node must provide.
    pub lines: Vec<String>,
    /// Divide every line by this line, node by node.
    pub reference_line: Option<String>,
}

impl GridSchema {
    pub fn new<S: AsRef<str>>(lines: &[S]) -> Self {
        Self {
            scales: ParamAxis::ALL.map(ParamAxis::default_scale),
            lines: canonical_line_list(lines),
            reference_line: None,
        }
    }

    pub fn with_scale(mut self, axis: ParamAxis, scale: AxisScale) -> Self {
        self.scales[axis.index()] = scale;
        self
    }

    pub fn with_reference_line(mut self, line: impl AsRef<str>) -> Self {
        self.reference_line = Some(canonical_line_id(line.as_ref()));
        self
    }
}

/// Where an axis comes from in the raw table.
#[derive(Debug, Clone, Copy)]
struct AxisColumn {
    col: usize,
    /// Column holds log10 of the physical value (`LOGZ` standing in for `Z`).
    log10_stored: bool,
}

/// The validated, immutable model grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    axes: [GridAxis; N_PARAMS],
    lines: Vec<String>,
    line_index: HashMap<String, usize>,
    shape: NodeIndex,
    strides: NodeIndex,
    /// `node_count × lines.len()`, node-major.
    fluxes: Vec<f64>,
}

impl Grid {
    /// Validate `raw` against `schema` and build the dense grid.
    pub fn load(raw: &RawGridTable, schema: &GridSchema) -> Result<Grid, GridError> {
        if raw.rows.is_empty() {
            return Err(GridError::EmptyGrid);
        }

        let axis_cols = resolve_axis_columns(&raw.columns)?;
        let (line_cols, lines) = resolve_line_columns(&raw.columns, &schema.lines)?;
        let ref_col = match &schema.reference_line {
            Some(line) => {
                let (cols, _) = resolve_line_columns(&raw.columns, std::slice::from_ref(line))?;
                Some(cols[0])
            }
            None => None,
        };

        // Row-level validation and physical axis values.
        let width = raw.columns.len();
        let mut coords: Vec<[f64; N_PARAMS]> = Vec::with_capacity(raw.rows.len());
        for (r, row) in raw.rows.iter().enumerate() {
            if row.len() != width {
                return Err(GridError::RowWidth {
                    row: r,
                    got: row.len(),
                    expected: width,
                });
            }
            let used = axis_cols
                .iter()
                .map(|a| a.col)
                .chain(line_cols.iter().copied())
                .chain(ref_col);
            for c in used {
                if !row[c].is_finite() {
                    return Err(GridError::NonFiniteValue {
                        row: r,
                        column: raw.columns[c].clone(),
                    });
                }
            }
            coords.push(std::array::from_fn(|i| {
                let v = row[axis_cols[i].col];
                if axis_cols[i].log10_stored { 10f64.powf(v) } else { v }
            }));
        }

        let axes = build_axes(&coords, &schema.scales)?;
        let shape: NodeIndex = std::array::from_fn(|i| axes[i].len());

        // Checked before anything is sized by the node count: a scattered
        // table can have a product of axis lengths far beyond its row count.
        let n_nodes = shape
            .iter()
            .try_fold(1usize, |acc, &n| acc.checked_mul(n))
            .unwrap_or(usize::MAX);
        if raw.rows.len() != n_nodes {
            return Err(GridError::NotRectilinear {
                rows: raw.rows.len(),
                expected: n_nodes,
            });
        }
        let strides = strides_for(&shape);
        let n_lines = lines.len();

        let mut fluxes = vec![0.0; n_nodes * n_lines];
        let mut filled = vec![false; n_nodes];
        for (r, (row, c)) in raw.rows.iter().zip(&coords).enumerate() {
            let mut linear = 0;
            for i in 0..N_PARAMS {
                // Every coordinate was used to build the axis, so the lookup succeeds.
                let k = axes[i].node_index(c[i]).unwrap_or(0);
                linear += k * strides[i];
            }
            if filled[linear] {
                return Err(GridError::DuplicateNode { row: r });
            }
            filled[linear] = true;

            let norm = match (ref_col, &schema.reference_line) {
                (Some(col), Some(line)) => {
                    let v = row[col];
                    if v <= 0.0 {
                        return Err(GridError::ZeroReferenceFlux {
                            line: line.clone(),
                            row: r,
                        });
                    }
                    v
                }
                _ => 1.0,
            };
            let out = &mut fluxes[linear * n_lines..(linear + 1) * n_lines];
            for (dst, &col) in out.iter_mut().zip(&line_cols) {
                *dst = row[col] / norm;
            }
        }

        let line_index = lines.iter().enumerate().map(|(i, l)| (l.clone(), i)).collect();

        debug!(
            nodes = n_nodes,
            lines = n_lines,
            shape = ?shape,
            "loaded photoionization grid"
        );

        Ok(Grid {
            axes,
            lines,
            line_index,
            shape,
            strides,
            fluxes,
        })
    }

    pub fn axes(&self) -> &[GridAxis; N_PARAMS] {
        &self.axes
    }

    pub fn axis(&self, axis: ParamAxis) -> &GridAxis {
        &self.axes[axis.index()]
    }

    /// Axes the grid actually samples at more than one value.
    pub fn varied_axes(&self) -> Vec<ParamAxis> {
        ParamAxis::ALL
            .into_iter()
            .filter(|a| !self.axis(*a).is_degenerate())
            .collect()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn line_index(&self, line: &str) -> Option<usize> {
        self.line_index.get(line).copied()
    }

    pub fn n_lines(&self) -> usize {
        self.lines.len()
    }

    pub fn shape(&self) -> NodeIndex {
        self.shape
    }

    pub fn node_count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Row-major position of a node, or `None` if any index is out of range.
    pub fn linear_index(&self, idx: &NodeIndex) -> Option<usize> {
        let mut linear = 0;
        for i in 0..N_PARAMS {
            if idx[i] >= self.shape[i] {
                return None;
            }
            linear += idx[i] * self.strides[i];
        }
        Some(linear)
    }

    /// Inverse of [`Grid::linear_index`].
    pub fn unravel(&self, linear: usize) -> NodeIndex {
        unravel(linear, &self.shape, &self.strides)
    }

    /// Predicted fluxes at a node, in [`Grid::lines`] order.
    pub fn node_fluxes(&self, idx: &NodeIndex) -> Result<&[f64], GridError> {
        let linear = self
            .linear_index(idx)
            .ok_or(GridError::NodeOutOfRange { index: *idx })?;
        Ok(self.fluxes_at(linear))
    }

    pub(crate) fn fluxes_at(&self, linear: usize) -> &[f64] {
        let n = self.lines.len();
        &self.fluxes[linear * n..(linear + 1) * n]
    }

    /// Predicted flux per line at a node.
    pub fn predict_at_node(&self, idx: &NodeIndex) -> Result<BTreeMap<String, f64>, GridError> {
        let fluxes = self.node_fluxes(idx)?;
        Ok(self.lines.iter().cloned().zip(fluxes.iter().copied()).collect())
    }

    /// Physical parameter values of a node.
    pub fn node_coordinates(&self, idx: &NodeIndex) -> ParameterVector {
        ParameterVector::new(std::array::from_fn(|i| self.axes[i].values()[idx[i]]))
    }

    /// Sub-grid with `axis` collapsed to the node equal to `value`.
    pub fn fix(&self, axis: ParamAxis, value: f64) -> Result<Grid, GridError> {
        let a = axis.index();
        let k = self.axes[a]
            .node_index(value)
            .ok_or(GridError::UnknownNode { axis, value })?;

        let mut axes = self.axes.clone();
        axes[a] = GridAxis::new(axis, self.axes[a].scale(), vec![self.axes[a].values()[k]]);
        let mut shape = self.shape;
        shape[a] = 1;
        let strides = strides_for(&shape);
        let n_nodes: usize = shape.iter().product();

        let mut fluxes = Vec::with_capacity(n_nodes * self.lines.len());
        for linear in 0..n_nodes {
            let mut idx = unravel(linear, &shape, &strides);
            idx[a] = k;
            let src = self.linear_index(&idx).ok_or(GridError::NodeOutOfRange { index: idx })?;
            fluxes.extend_from_slice(self.fluxes_at(src));
        }

        Ok(Grid {
            axes,
            lines: self.lines.clone(),
            line_index: self.line_index.clone(),
            shape,
            strides,
            fluxes,
        })
    }
}

fn resolve_axis_columns(columns: &[String]) -> Result<[AxisColumn; N_PARAMS], GridError> {
    let upper: Vec<String> = columns
        .iter()
        .map(|c| c.trim().trim_start_matches('\u{feff}').to_ascii_uppercase())
        .collect();
    let find = |name: &str| upper.iter().position(|c| c == name);

    let mut out = [AxisColumn {
        col: 0,
        log10_stored: false,
    }; N_PARAMS];
    for axis in ParamAxis::ALL {
        let direct = axis.column_aliases().iter().find_map(|alias| find(alias));
        out[axis.index()] = match (direct, axis) {
            (Some(col), _) => AxisColumn {
                col,
                log10_stored: false,
            },
            (None, ParamAxis::Z) => match find("LOGZ") {
                Some(col) => AxisColumn {
                    col,
                    log10_stored: true,
                },
                None => {
                    return Err(GridError::MissingColumn {
                        column: axis.column_aliases()[0].to_string(),
                    });
                }
            },
            (None, _) => {
                return Err(GridError::MissingColumn {
                    column: axis.column_aliases()[0].to_string(),
                });
            }
        };
    }
    Ok(out)
}

/// Column index and grid line id for each requested line.
///
/// A line with no exact column falls back to the most similar column that no
/// other requested line claims, with a warning.
fn resolve_line_columns(
    columns: &[String],
    lines: &[String],
) -> Result<(Vec<usize>, Vec<String>), GridError> {
    let canonical: Vec<String> = columns.iter().map(|c| canonical_line_id(c)).collect();
    let mut unclaimed: Vec<usize> = (0..canonical.len())
        .filter(|&i| !lines.contains(&canonical[i]))
        .collect();

    let mut cols = Vec::with_capacity(lines.len());
    let mut ids = Vec::with_capacity(lines.len());
    for line in lines {
        if let Some(col) = canonical.iter().position(|c| c == line) {
            cols.push(col);
            ids.push(line.clone());
            continue;
        }
        let labels: Vec<&str> = unclaimed.iter().map(|&i| canonical[i].as_str()).collect();
        let pick = closest_label(line, &labels).ok_or_else(|| GridError::MissingColumn {
            column: line.clone(),
        })?;
        let col = unclaimed.remove(pick);
        warn!(
            requested = %line,
            using = %canonical[col],
            "line not in grid; using the most similar column"
        );
        cols.push(col);
        ids.push(canonical[col].clone());
    }
    Ok((cols, ids))
}

fn build_axes(
    coords: &[[f64; N_PARAMS]],
    scales: &[AxisScale; N_PARAMS],
) -> Result<[GridAxis; N_PARAMS], GridError> {
    let mut axes = Vec::with_capacity(N_PARAMS);
    for axis in ParamAxis::ALL {
        let i = axis.index();
        let mut values: Vec<f64> = coords.iter().map(|c| c[i]).collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| same_node(*a, *b));

        if scales[i] == AxisScale::Logarithmic {
            if let Some(&bad) = values.iter().find(|v| **v <= 0.0) {
                return Err(GridError::NonPositiveLogNode { axis, value: bad });
            }
        }
        axes.push(GridAxis::new(axis, scales[i], values));
    }
    let axes: [GridAxis; N_PARAMS] = axes
        .try_into()
        .unwrap_or_else(|_| unreachable!("one axis per parameter"));
    Ok(axes)
}

pub(crate) fn strides_for(shape: &NodeIndex) -> NodeIndex {
    let mut strides = [1usize; N_PARAMS];
    for i in (0..N_PARAMS - 1).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

pub(crate) fn unravel(mut linear: usize, shape: &NodeIndex, strides: &NodeIndex) -> NodeIndex {
    let mut idx = [0usize; N_PARAMS];
    for i in 0..N_PARAMS {
        idx[i] = linear / strides[i];
        linear %= strides[i];
        debug_assert!(idx[i] < shape[i]);
    }
    idx
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn small_axes() -> [Vec<f64>; N_PARAMS] {
        [
            vec![0.002, 0.008, 0.02],
            vec![-3.5, -2.5, -1.5],
            vec![0.1, 0.3],
            vec![1.0, 2.0],
            vec![0.5, 1.0],
        ]
    }

    fn toy_model(p: &ParameterVector) -> Vec<f64> {
        let lz = p[ParamAxis::Z].log10();
        vec![
            1.0,
            2.0 + lz + 0.5 * p[ParamAxis::LogU],
            3.0 + p[ParamAxis::Xi] + p[ParamAxis::LogNh] * p[ParamAxis::CO],
        ]
    }

    fn toy_table() -> RawGridTable {
        RawGridTable::tabulate(&small_axes(), &["HB", "OIII5007", "OII3727"], toy_model)
    }

    pub(crate) fn toy_grid() -> Grid {
        let raw = RawGridTable::tabulate(&small_axes(), &["hb", "o3_5007", "OII3727"], toy_model);
        Grid::load(&raw, &GridSchema::new(&["HB", "OIII5007", "OII3727"])).unwrap()
    }

    #[test]
    fn line_columns_skip_axis_columns() {
        let raw = RawGridTable::new(
            ["LOGZ", "logU", "xi", "nH", "C/O", "hb", "o3_5007"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            vec![],
        );
        assert_eq!(raw.line_columns(), vec!["HB".to_string(), "OIII5007".to_string()]);
    }

    #[test]
    fn load_builds_sorted_axes_and_canonical_lines() {
        let grid = toy_grid();
        assert_eq!(grid.shape(), [3, 3, 2, 2, 2]);
        assert_eq!(grid.node_count(), 72);
        assert_eq!(grid.lines(), &["HB", "OIII5007", "OII3727"]);
        assert_eq!(grid.axis(ParamAxis::LogU).values(), &[-3.5, -2.5, -1.5]);
        assert_eq!(grid.varied_axes().len(), 5);
    }

    #[test]
    fn node_lookup_round_trips_through_linear_index() {
        let grid = toy_grid();
        for linear in 0..grid.node_count() {
            let idx = grid.unravel(linear);
            assert_eq!(grid.linear_index(&idx), Some(linear));
        }
    }

    #[test]
    fn predict_at_node_matches_model() {
        let grid = toy_grid();
        let idx = [1, 2, 0, 1, 1];
        let p = grid.node_coordinates(&idx);
        let expect = toy_model(&p);
        let got = grid.predict_at_node(&idx).unwrap();
        assert_eq!(got["HB"], expect[0]);
        assert_eq!(got["OIII5007"], expect[1]);
        assert_eq!(got["OII3727"], expect[2]);
    }

    #[test]
    fn shuffled_rows_load_identically() {
        let mut raw = toy_table();
        raw.rows.reverse();
        let grid = Grid::load(&raw, &GridSchema::new(&["HB", "OIII5007", "OII3727"])).unwrap();
        assert_eq!(grid, toy_grid());
    }

    #[test]
    fn node_out_of_range_is_an_error() {
        let grid = toy_grid();
        assert!(matches!(
            grid.node_fluxes(&[3, 0, 0, 0, 0]),
            Err(GridError::NodeOutOfRange { .. })
        ));
    }

    #[test]
    fn missing_line_column_is_malformed() {
        let raw = toy_table();
        let err = Grid::load(&raw, &GridSchema::new(&["HB", "HA"])).unwrap_err();
        assert_eq!(
            err,
            GridError::MissingColumn {
                column: "HA".to_string()
            }
        );
    }

    #[test]
    fn near_miss_line_label_uses_the_similar_column() {
        let raw = toy_table();
        let grid = Grid::load(&raw, &GridSchema::new(&["HB", "OIII5008"])).unwrap();
        assert_eq!(grid.lines(), ["HB".to_string(), "OIII5007".to_string()]);
        let exact = Grid::load(&raw, &GridSchema::new(&["HB", "OIII5007"])).unwrap();
        assert_eq!(grid, exact);
    }

    #[test]
    fn one_column_serves_one_near_miss() {
        let raw = toy_table();
        let err = Grid::load(&raw, &GridSchema::new(&["OIII5008", "OIII5009"])).unwrap_err();
        assert_eq!(
            err,
            GridError::MissingColumn {
                column: "OIII5009".to_string()
            }
        );
    }

    #[test]
    fn missing_row_is_not_rectilinear() {
        let mut raw = toy_table();
        raw.rows.pop();
        let err = Grid::load(&raw, &GridSchema::new(&["HB"])).unwrap_err();
        assert!(matches!(err, GridError::NotRectilinear { rows: 71, expected: 72 }));
    }

    #[test]
    fn scattered_table_is_not_rectilinear() {
        // Every row brings a new value on every axis: 10^4 rows, (10^4)^5 nominal nodes.
        let rows: Vec<Vec<f64>> = (0..10_000)
            .map(|i| {
                let x = i as f64;
                let step = x * 1e-4;
                vec![0.001 + x * 1e-6, -4.0 + step, step, 1.0 + step, 0.1 + step, 1.0]
            })
            .collect();
        let raw = RawGridTable::new(
            ["Z", "LOGU", "XI", "NH", "CO", "HB"].map(String::from).to_vec(),
            rows,
        );
        let err = Grid::load(&raw, &GridSchema::new(&["HB"])).unwrap_err();
        assert_eq!(
            err,
            GridError::NotRectilinear {
                rows: 10_000,
                expected: usize::MAX
            }
        );
    }

    #[test]
    fn duplicate_row_is_rejected() {
        let mut raw = toy_table();
        let last = raw.rows.len() - 1;
        raw.rows[last] = raw.rows[0].clone();
        let err = Grid::load(&raw, &GridSchema::new(&["HB"])).unwrap_err();
        assert_eq!(err, GridError::DuplicateNode { row: last });
    }

    #[test]
    fn non_finite_flux_is_rejected() {
        let mut raw = toy_table();
        raw.rows[5][6] = f64::NAN;
        let err = Grid::load(&raw, &GridSchema::new(&["HB", "OIII5007"])).unwrap_err();
        assert!(matches!(err, GridError::NonFiniteValue { row: 5, .. }));
    }

    #[test]
    fn logz_column_stands_in_for_z() {
        let mut raw = toy_table();
        raw.columns[0] = "LOGZ".to_string();
        for row in raw.rows.iter_mut() {
            row[0] = row[0].log10();
        }
        let grid = Grid::load(&raw, &GridSchema::new(&["HB"])).unwrap();
        let z = grid.axis(ParamAxis::Z).values();
        assert!((z[1] - 0.008).abs() < 1e-12);
    }

    #[test]
    fn log_axis_requires_positive_nodes() {
        let mut axes = small_axes();
        axes[2] = vec![0.0, 0.3];
        let raw = RawGridTable::tabulate(&axes, &["HB"], |_| vec![1.0]);
        let schema = GridSchema::new(&["HB"]).with_scale(ParamAxis::Xi, AxisScale::Logarithmic);
        let err = Grid::load(&raw, &schema).unwrap_err();
        assert!(matches!(err, GridError::NonPositiveLogNode { axis: ParamAxis::Xi, .. }));
    }

    #[test]
    fn reference_line_normalises_fluxes() {
        let raw = RawGridTable::tabulate(&small_axes(), &["HB", "OIII5007"], |p| {
            vec![2.0, 6.0 + p[ParamAxis::LogU]]
        });
        let schema = GridSchema::new(&["HB", "OIII5007"]).with_reference_line("hb");
        let grid = Grid::load(&raw, &schema).unwrap();
        let at = grid.predict_at_node(&[0, 0, 0, 0, 0]).unwrap();
        assert_eq!(at["HB"], 1.0);
        assert!((at["OIII5007"] - (6.0 - 3.5) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn fix_collapses_axis_to_node() {
        let grid = toy_grid();
        let fixed = grid.fix(ParamAxis::Xi, 0.3).unwrap();
        assert!(fixed.axis(ParamAxis::Xi).is_degenerate());
        assert_eq!(fixed.node_count(), 36);
        let full = grid.node_fluxes(&[2, 1, 1, 0, 1]).unwrap();
        let sub = fixed.node_fluxes(&[2, 1, 0, 0, 1]).unwrap();
        assert_eq!(full, sub);
        assert!(matches!(
            grid.fix(ParamAxis::Xi, 0.2),
            Err(GridError::UnknownNode { .. })
        ));
    }
}
