// ⚠️ Error taxonomy
// Data and Config errors abort the run; nothing is retried.

use thiserror::Error;

/// Errors raised by the matching engine
#[derive(Error, Debug)]
pub enum OrgMatchError {
    /// Malformed or missing identity fields in an input snapshot
    #[error("data error: {0}")]
    Data(String),

    /// Rule definition or run configuration is invalid
    #[error("config error: {0}")]
    Config(String),

    /// A metric came out non-finite
    #[error("computation error: {0}")]
    Computation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl OrgMatchError {
    pub fn data(msg: impl Into<String>) -> Self {
        OrgMatchError::Data(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        OrgMatchError::Config(msg.into())
    }

    /// True for the fail-fast input/configuration classes
    pub fn is_input_error(&self) -> bool {
        matches!(self, OrgMatchError::Data(_) | OrgMatchError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, OrgMatchError>;
