//! Error types for the simcat core.
//!
//! Errors fall into two tiers. Not-found and precondition failures (unknown
//! model, run still in progress, read-only workset, ...) are normal negative
//! outcomes and are logged as warnings. Database, file system and subprocess
//! failures are logged with full context and surfaced to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the simcat core.
#[derive(Debug, Error)]
pub enum SimcatError {
    // Lookup errors
    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    #[error("Workset not found: {workset}, model: {model}")]
    WorksetNotFound { model: String, workset: String },

    #[error("Model run not found: {run}, model: {model}")]
    RunNotFound { model: String, run: String },

    #[error("Model run not completed: {run}, status: {status}")]
    RunNotCompleted { run: String, status: String },

    #[error("Parameter not found: {parameter}, model: {model}")]
    ParameterNotFound { model: String, parameter: String },

    #[error("Output table not found: {table}, model: {model}")]
    TableNotFound { model: String, table: String },

    #[error("{source_name} does not contain parameter: {parameter}")]
    ParameterNotInSource {
        source_name: String,
        parameter: String,
    },

    // Workset invariants
    #[error("Workset is read-only: {workset}")]
    WorksetReadOnly { workset: String },

    #[error("Workset {workset} already contains parameter: {parameter}")]
    ParameterAlreadyExists { workset: String, parameter: String },

    #[error("Source workset must be read-only: {workset}")]
    SourceWorksetNotReadOnly { workset: String },

    // Validation errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Cleanup rejected for {path:?}: {reason}")]
    CleanupRejected { path: PathBuf, reason: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("CSV error: {message}")]
    Csv {
        message: String,
        #[source]
        source: Option<csv::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for simcat operations.
pub type Result<T> = std::result::Result<T, SimcatError>;

// Conversion implementations for common error types

impl From<std::io::Error> for SimcatError {
    fn from(err: std::io::Error) -> Self {
        SimcatError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SimcatError {
    fn from(err: serde_json::Error) -> Self {
        SimcatError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SimcatError {
    fn from(err: rusqlite::Error) -> Self {
        SimcatError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for SimcatError {
    fn from(err: csv::Error) -> Self {
        SimcatError::Csv {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl SimcatError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SimcatError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SimcatError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for "unknown model / run / workset / parameter / table" outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SimcatError::ModelNotFound { .. }
                | SimcatError::WorksetNotFound { .. }
                | SimcatError::RunNotFound { .. }
                | SimcatError::ParameterNotFound { .. }
                | SimcatError::TableNotFound { .. }
                | SimcatError::ParameterNotInSource { .. }
                | SimcatError::FileNotFound(_)
        )
    }

    /// True for failed preconditions: the request was understood but the
    /// current state of the data does not allow it.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SimcatError::RunNotCompleted { .. }
                | SimcatError::WorksetReadOnly { .. }
                | SimcatError::ParameterAlreadyExists { .. }
                | SimcatError::SourceWorksetNotReadOnly { .. }
                | SimcatError::Validation { .. }
                | SimcatError::CleanupRejected { .. }
        )
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Custom error codes (application-defined, -32000 to -32099):
    /// - -32002: Not found (model, run, workset, parameter, table)
    /// - -32005: Precondition or validation failure
    /// - -32603: Internal error
    pub fn to_rpc_error_code(&self) -> i32 {
        if self.is_not_found() {
            -32002
        } else if self.is_precondition() {
            -32005
        } else {
            -32603
        }
    }
}

/// Log a failed operation at the level its tier calls for.
pub(crate) fn log_failure(context: &str, err: &SimcatError) {
    if err.is_not_found() || err.is_precondition() {
        tracing::warn!("{}: {}", context, err);
    } else {
        tracing::error!("{}: {:?}", context, err);
    }
}
