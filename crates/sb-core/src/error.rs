//! Error types for the six-b skim

use thiserror::Error;

/// Skim error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// Invalid job configuration. Always names the offending field and value.
    #[error("invalid {field} '{value}': {reason}")]
    Config {
        /// Configuration field (CLI option or config key).
        field: String,
        /// Value as given by the operator.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Input event source error
    #[error("Input error: {0}")]
    Input(String),

    /// Output writer error
    #[error("Output error: {0}")]
    Output(String),

    /// Output schema violation (unknown branch, late declaration, ...)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Calibration resource error
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// A selection stage returned more jets or matches than it was given
    #[error("Selection error: {0}")]
    Selection(String),
}

impl Error {
    /// Build a [`Error::Config`].
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Config { field: field.into(), value: value.into(), reason: reason.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
