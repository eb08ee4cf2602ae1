use thiserror::Error;

pub type Result<T> = std::result::Result<T, VastError>;

#[derive(Debug, Error)]
pub enum VastError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("API returned HTML instead of JSON")]
    HtmlBody,
}

impl From<reqwest::Error> for VastError {
    fn from(err: reqwest::Error) -> Self {
        VastError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for VastError {
    fn from(err: serde_json::Error) -> Self {
        VastError::Parse(err.to_string())
    }
}
