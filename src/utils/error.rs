use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Link is not a valid marketplace URL: {url}")]
    InvalidLink { url: String },

    #[error("Link is already monitored: {url}")]
    DuplicateLink { url: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Rejections that should be reported back to the issuing client
    /// instead of being treated as server faults.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AppError::InvalidLink { .. } | AppError::DuplicateLink { .. }
        )
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
