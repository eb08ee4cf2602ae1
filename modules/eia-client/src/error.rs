use thiserror::Error;

pub type Result<T> = std::result::Result<T, EiaError>;

#[derive(Debug, Error)]
pub enum EiaError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// The API answered with an HTML page (usually a gateway error) where
    /// JSON was expected. The first bytes of the body are kept for the log.
    #[error("API returned HTML instead of JSON: {0}")]
    HtmlBody(String),
}

impl From<reqwest::Error> for EiaError {
    fn from(err: reqwest::Error) -> Self {
        EiaError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for EiaError {
    fn from(err: serde_json::Error) -> Self {
        EiaError::Parse(err.to_string())
    }
}
