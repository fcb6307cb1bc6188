//! Error types for the analysis pipeline

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid sample metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design: {reason}")]
    InvalidDesign { reason: String },

    #[error("Invalid contrast specification: {reason}")]
    InvalidContrast { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid regulatory network: {reason}")]
    InvalidNetwork { reason: String },

    #[error("Missing column '{column}' in {file}")]
    MissingColumn { column: String, file: String },

    #[error("Parse error in {file} at line {line}: {reason}")]
    Parse {
        file: String,
        line: usize,
        reason: String,
    },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("Convergence failed in {operation}: {reason}")]
    ConvergenceFailure { operation: String, reason: String },

    #[error("Numerical error in {operation}: {details}")]
    NumericalError { operation: String, details: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Plot rendering failed: {reason}")]
    Plot { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, AnalysisError>;
