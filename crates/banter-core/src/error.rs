use thiserror::Error;

use crate::settings::ValidationError;

#[derive(Debug, Error)]
pub enum BanterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Settings file error ({path}): {reason}")]
    Settings { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BanterError {
    /// True for errors caused by user input rather than the process itself.
    pub fn is_user_error(&self) -> bool {
        matches!(self, BanterError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, BanterError>;
