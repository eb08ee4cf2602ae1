use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridmarkError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0} environment variable is required")]
    MissingEnv(String),

    #[error("Unknown pricing platform: {0}")]
    UnknownPlatform(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
