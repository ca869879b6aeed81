//! Error types for floweval operations.
//!
//! Defines the error taxonomy for the evaluation pipeline:
//! - Repository acquisition (clone/update, transient vs terminal)
//! - Scoring configuration loading and registry validation
//! - Input roster parsing
//!
//! Everything below the batch orchestrator is absorbed into a result
//! classification; only `ConfigError` is allowed to abort the process,
//! and only before any repository has been touched.

use thiserror::Error;

/// Errors that can occur while acquiring a repository working copy.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// The URL could not be parsed into a repository identity.
    #[error("Invalid repository URL: {0}")]
    InvalidUrl(String),

    /// Git rejected the request in a way that retrying cannot fix
    /// (missing repository, authentication, malformed remote).
    #[error("Terminal git failure for {url}: {stderr}")]
    Terminal { url: String, stderr: String },

    /// All transient-failure retries were used up.
    #[error("Clone failed after {attempts} attempts for {url}: {stderr}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        stderr: String,
    },

    /// The git binary could not be spawned at all.
    #[error("Failed to spawn git: {0}")]
    Spawn(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors in the scoring configuration or check registry, fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read scoring config '{path}': {message}")]
    Unreadable { path: String, message: String },

    #[error("Failed to parse scoring config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A present config file must state the aggregation mode explicitly.
    #[error("Aggregation mode unset: expected 'weighted' or 'mean'")]
    AggregationUnset,

    #[error("Unknown aggregation mode '{0}': expected 'weighted' or 'mean'")]
    UnknownAggregation(String),

    /// A registered scoring dimension without checks would divide by zero.
    #[error("Dimension '{0}' has no registered checks")]
    EmptyDimension(String),

    #[error("Non-positive weight for '{key}': {value}")]
    InvalidWeight { key: String, value: f64 },

    #[error("Missing weight for score column '{0}'")]
    MissingWeight(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors reading or writing the input/output row files.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Input file not found: {0}")]
    NotFound(String),

    #[error("Row {line} is not a JSON object")]
    NotAnObject { line: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
