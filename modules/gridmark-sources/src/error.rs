use thiserror::Error;

/// A source could not be constructed from its configuration.
#[derive(Debug, Error)]
pub enum SourceSetupError {
    #[error("invalid {field} selector {selector:?}: {message}")]
    InvalidSelector {
        field: &'static str,
        selector: String,
        message: String,
    },

    #[error("invalid URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("pricing platform {0} has no URLs configured")]
    NoUrls(String),
}
