//! Error types for the misID pipeline

use thiserror::Error;

/// misID pipeline error type.
///
/// Every variant is fatal: failures come from deterministic input or configuration
/// problems, so callers surface them instead of retrying.
#[derive(Error, Debug)]
pub enum Error {
    /// Sample name has no entry in the sample -> hadron registry.
    #[error("unrecognized sample: {0}")]
    UnrecognizedSample(String),

    /// Unknown tagging region symbol.
    #[error("invalid region kind: {0}")]
    InvalidRegionKind(String),

    /// A required column is absent from a table.
    #[error("missing column: {0}")]
    MissingColumn(String),

    /// Density estimation received a sample whose weights are all zero.
    #[error("degenerate sample: {0}")]
    DegenerateSample(String),

    /// Observable value outside the declared support.
    #[error("value outside support: {0}")]
    OutOfSupport(String),

    /// Cut expression parse error.
    #[error("expression error: {0}")]
    Expression(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Columnar storage (Arrow / Parquet) error.
    #[error("storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
