//! Error types.
//!
//! Library code returns [`FitError`] (and [`GridError`] for grid validation).
//! The binary converts those into [`AppError`], which carries the process exit
//! code:
//!
//! - `2`: bad input (malformed grid, invalid observations, bad flags)
//! - `3`: not enough data to fit
//! - `4`: numerical / optimisation failure

use crate::domain::ParamAxis;

/// Validation failures raised while loading or slicing a model grid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// The raw table has no rows.
    #[error("grid table is empty")]
    EmptyGrid,

    /// A required axis or line column is absent.
    #[error("grid table is missing required column '{column}'")]
    MissingColumn {
        /// Name of the missing column (first accepted alias for axes).
        column: String,
    },

    /// A row does not have one value per column.
    #[error("grid row {row} has {got} values, expected {expected}")]
    RowWidth {
        /// Zero-based data row.
        row: usize,
        /// Number of values in the row.
        got: usize,
        /// Number of header columns.
        expected: usize,
    },

    /// A value used by the grid is NaN or infinite.
    #[error("grid row {row} has a non-finite value in column '{column}'")]
    NonFiniteValue {
        /// Zero-based data row.
        row: usize,
        /// Column holding the bad value.
        column: String,
    },

    /// A logarithmically spaced axis has a node at or below zero.
    #[error("axis {axis} is log-spaced but has a non-positive node {value}")]
    NonPositiveLogNode {
        /// Offending axis.
        axis: ParamAxis,
        /// Offending node value.
        value: f64,
    },

    /// The same parameter combination appears more than once.
    #[error("grid row {row} duplicates an existing parameter combination")]
    DuplicateNode {
        /// Zero-based data row of the duplicate.
        row: usize,
    },

    /// Rows do not form the full Cartesian product of the axis values.
    #[error("grid is not rectilinear: {rows} rows for {expected} parameter combinations")]
    NotRectilinear {
        /// Number of data rows.
        rows: usize,
        /// Product of the axis lengths.
        expected: usize,
    },

    /// The normalisation line is zero (or negative) at some node.
    #[error("reference line '{line}' is not positive at grid row {row}")]
    ZeroReferenceFlux {
        /// Reference line id.
        line: String,
        /// Zero-based data row.
        row: usize,
    },

    /// A node index is outside the axis lengths.
    #[error("node index {index:?} is outside the grid")]
    NodeOutOfRange {
        /// Requested index tuple.
        index: [usize; 5],
    },

    /// `Grid::fix` was asked for a value that is not a node of the axis.
    #[error("{value} is not a node of axis {axis}")]
    UnknownNode {
        /// Axis being fixed.
        axis: ParamAxis,
        /// Requested value.
        value: f64,
    },
}

/// Error type for fitting operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    /// The grid failed validation.
    #[error("malformed grid: {0}")]
    MalformedGrid(#[from] GridError),

    /// A query coordinate lies outside the sampled range of an axis.
    #[error("{axis} = {value} lies outside the grid range [{min}, {max}]")]
    OutOfGridBounds {
        /// Axis that was exceeded.
        axis: ParamAxis,
        /// Query value (physical units).
        value: f64,
        /// Smallest node value.
        min: f64,
        /// Largest node value.
        max: f64,
    },

    /// Too few usable lines for the number of free parameters.
    #[error("insufficient data: {lines} usable lines for {free} free parameters")]
    InsufficientData {
        /// Lines able to contribute to the cost.
        lines: usize,
        /// Free parameters (varied axes plus a solved scale).
        free: usize,
    },

    /// A line measurement cannot be used as given.
    #[error("invalid observation for line '{line}': {reason}")]
    InvalidObservation {
        /// Line id.
        line: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A fit option is out of range.
    #[error("invalid fit configuration: {0}")]
    InvalidConfig(String),

    /// The local minimiser could not be run.
    #[error("optimisation failed: {0}")]
    Optimization(String),
}

/// Error surfaced by the `nebula` binary, with the exit code to use.
#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        let code = match &err {
            FitError::MalformedGrid(_)
            | FitError::InvalidObservation { .. }
            | FitError::InvalidConfig(_) => 2,
            FitError::InsufficientData { .. } => 3,
            FitError::OutOfGridBounds { .. } | FitError::Optimization(_) => 4,
        };
        AppError::new(code, err.to_string())
    }
}

impl From<GridError> for AppError {
    fn from(err: GridError) -> Self {
        FitError::from(err).into()
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_message_names_axis() {
        let err = FitError::OutOfGridBounds {
            axis: ParamAxis::LogU,
            value: -0.5,
            min: -4.0,
            max: -1.0,
        };
        assert_eq!(
            err.to_string(),
            "log U = -0.5 lies outside the grid range [-4, -1]"
        );
    }

    #[test]
    fn grid_error_wraps_into_malformed_grid() {
        let err: FitError = GridError::EmptyGrid.into();
        assert_eq!(err.to_string(), "malformed grid: grid table is empty");
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let app: AppError = FitError::InsufficientData { lines: 2, free: 4 }.into();
        assert_eq!(app.exit_code(), 3);
        let app: AppError = GridError::EmptyGrid.into();
        assert_eq!(app.exit_code(), 2);
        let app: AppError = FitError::Optimization("boom".into()).into();
        assert_eq!(app.exit_code(), 4);
    }

    #[test]
    fn errors_are_send_and_sync() {
        fn assert_impl<T: Send + Sync + std::error::Error>() {}
        assert_impl::<FitError>();
        assert_impl::<GridError>();
        assert_impl::<AppError>();
    }
}
