//! Pipeline Error Taxonomy
//!
//! One enum for every stage. `category()` maps each variant onto the four
//! caller-facing classes (usage / data / training / scoring) plus internal.

use serde::Serialize;

use super::bundle::BundleError;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Caller-facing error class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    UsageError,
    DataError,
    TrainingError,
    ScoringError,
    InternalError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UsageError => "usage_error",
            ErrorCategory::DataError => "data_error",
            ErrorCategory::TrainingError => "training_error",
            ErrorCategory::ScoringError => "scoring_error",
            ErrorCategory::InternalError => "internal_error",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    // Usage
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Data
    #[error("Cannot read input '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("No usable rows remain after cleaning")]
    EmptyFrame,

    #[error("No sensor columns resolved (requested: {requested:?}, available: {available:?})")]
    EmptyColumnSet {
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("Insufficient data: {rows} rows, at least {required} required for one window")]
    InsufficientData { rows: usize, required: usize },

    // Training
    #[error("Degenerate model: reconstruction loss is NaN/Inf for every window")]
    DegenerateModel,

    #[error("Degenerate error distribution: no finite reconstruction errors")]
    DegenerateErrorDistribution,

    // Scoring
    #[error("Model bundle unavailable: {0}")]
    Bundle(#[from] BundleError),

    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnMismatch { expected: usize, actual: usize },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    // Internal
    #[error("Illegal job transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<csv::Error> for PipelineError {
    fn from(err: csv::Error) -> Self {
        PipelineError::Malformed(err.to_string())
    }
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Usage(_) | PipelineError::InvalidConfig(_) => ErrorCategory::UsageError,

            PipelineError::Unreadable { .. }
            | PipelineError::Malformed(_)
            | PipelineError::EmptyFrame
            | PipelineError::EmptyColumnSet { .. }
            | PipelineError::InsufficientData { .. } => ErrorCategory::DataError,

            PipelineError::DegenerateModel | PipelineError::DegenerateErrorDistribution => {
                ErrorCategory::TrainingError
            }

            PipelineError::Bundle(e) if e.is_storage_failure() => ErrorCategory::InternalError,
            PipelineError::Bundle(_)
            | PipelineError::ColumnMismatch { .. }
            | PipelineError::ShapeMismatch(_) => ErrorCategory::ScoringError,

            PipelineError::IllegalTransition { .. }
            | PipelineError::Io(_)
            | PipelineError::Json(_)
            | PipelineError::Internal(_) => ErrorCategory::InternalError,
        }
    }

    /// Short machine-readable tag for the variant
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Usage(_) => "usage",
            PipelineError::InvalidConfig(_) => "invalid_config",
            PipelineError::Unreadable { .. } => "unreadable_input",
            PipelineError::Malformed(_) => "malformed_input",
            PipelineError::EmptyFrame => "empty_frame",
            PipelineError::EmptyColumnSet { .. } => "empty_column_set",
            PipelineError::InsufficientData { .. } => "insufficient_data",
            PipelineError::DegenerateModel => "degenerate_model",
            PipelineError::DegenerateErrorDistribution => "degenerate_error_distribution",
            PipelineError::Bundle(_) => "bundle_unavailable",
            PipelineError::ColumnMismatch { .. } => "column_mismatch",
            PipelineError::ShapeMismatch(_) => "shape_mismatch",
            PipelineError::IllegalTransition { .. } => "illegal_transition",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "serialization",
            PipelineError::Internal(_) => "internal",
        }
    }
}
