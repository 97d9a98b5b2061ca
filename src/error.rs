use thiserror::Error;

pub type Result<T> = std::result::Result<T, SalvageError>;

#[derive(Debug, Error)]
pub enum SalvageError {
    #[error("Invalid HTTP status code: {0}")]
    InvalidStatus(u16),

    #[error("Invalid configuration for {key}: {message}")]
    InvalidConfig { key: String, message: String },
}

impl SalvageError {
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }
}
