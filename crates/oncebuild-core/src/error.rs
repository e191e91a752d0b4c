use thiserror::Error;

#[derive(Debug, Error)]
pub enum OncebuildError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time zone: {0}")]
    InvalidTimeZone(String),

    #[error("Invalid start time: {0}")]
    InvalidStartTime(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OncebuildError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            OncebuildError::Config(_) => "CONFIG_ERROR",
            OncebuildError::InvalidTimeZone(_) => "INVALID_TIME_ZONE",
            OncebuildError::InvalidStartTime(_) => "INVALID_START_TIME",
            OncebuildError::Validation(_) => "VALIDATION_ERROR",
            OncebuildError::Serialization(_) => "SERIALIZATION_ERROR",
            OncebuildError::Io(_) => "IO_ERROR",
            OncebuildError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OncebuildError>;
