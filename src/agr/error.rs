use thiserror::Error;

/// Errors raised by the analysis core.
///
/// A degenerate clustering (all noise, a single cluster) is not an error; it
/// is recorded as [`super::model::SilhouetteScore::Undefined`].
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The parameter grid is empty or holds values the clusterer cannot use.
    #[error("invalid search space: {0}")]
    InvalidSearchSpace(String),

    /// Not enough rows for the requested operation.
    #[error("insufficient data: requires at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// Requested MFA dimension is zero or exceeds the available columns.
    #[error("invalid component count: requested {requested}, but only {available} available")]
    InvalidComponentCount { requested: usize, available: usize },

    /// Column groups overlap, leave columns out, or point past the matrix.
    #[error("invalid group specification: {0}")]
    InvalidGroupSpecification(String),

    /// Two sequences that describe the same rows disagree in length.
    #[error("length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("label column {index} is out of range for {n_columns} columns")]
    InvalidLabelColumn { index: isize, n_columns: usize },

    /// A pipeline stage received a frame of the wrong kind.
    #[error("stage {stage} expects a {expected} frame")]
    StageInputMismatch {
        stage: &'static str,
        expected: &'static str,
    },

    #[error("operation cancelled")]
    Cancelled,

    /// The density clusterer rejected its parameters.
    #[error("clustering failed: {0}")]
    Clustering(String),

    #[error(transparent)]
    Linalg(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
