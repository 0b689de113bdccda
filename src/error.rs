//! Error types for the backtester.

use thiserror::Error;

/// Main error type for the backtester.
///
/// Solver non-convergence is deliberately not represented here: a failed
/// solve is an expected outcome and is carried as a status on
/// [`crate::optimizer::OptimizationResult`] instead.
#[derive(Error, Debug)]
pub enum QuantoroError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient history: need {required} trading days, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    #[error("Alpha scores are required when an alpha tilt is configured")]
    MissingAlphaScores,

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, QuantoroError>;
