//! Error types for the CLI

/// CLI Result type
pub type Result<T> = std::result::Result<T, Error>;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An orchestrator or control-plane failure
    #[error(transparent)]
    Flagship(#[from] flagship_instance::Error),

    /// Rendering a descriptor as YAML failed
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The HTTP client could not be built
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// The re-typed name given to `delete` does not match the instance
    #[error("refusing to delete {expected:?}: confirmation was {got:?}")]
    ConfirmationMismatch {
        /// Instance name to delete
        expected: String,
        /// Name typed as confirmation
        got: String,
    },

    /// A required flag or environment variable is missing
    #[error("configuration error: {message}")]
    Config {
        /// What is missing
        message: String,
    },
}

impl Error {
    /// Configuration error with the given message
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}
