use thiserror::Error;

/// A page could not be fetched. Retried at page granularity by the driver.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network failure, timeout or non-success status.
    #[error("transport error: {0}")]
    Transport(String),

    /// The source answered, but not with what its contract promises
    /// (an HTML error page, truncated JSON, a missing element).
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// A single upsert failed. Counted per record; never retried in-run.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid natural key for {table}: {reason}")]
    InvalidKey { table: String, reason: String },

    #[error("write to {table} failed for key {key}: {message}")]
    WriteFailed {
        table: String,
        key: String,
        message: String,
    },

    /// The store itself is gone. The driver ends the run on this.
    #[error("destination store unavailable: {0}")]
    StoreUnavailable(String),
}

impl WriteError {
    pub fn invalid_key(table: &str, reason: impl Into<String>) -> Self {
        WriteError::InvalidKey {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub fn write_failed(table: &str, key: impl Into<String>, message: impl Into<String>) -> Self {
        WriteError::WriteFailed {
            table: table.to_string(),
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Why a run stopped early.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed at page {page} after {attempts} attempt(s): {source}")]
    FetchFailed {
        page: usize,
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("destination store unavailable: {0}")]
    StoreUnavailable(String),
}
