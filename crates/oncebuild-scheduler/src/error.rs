use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Reading or writing the snapshot file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The snapshot exists but does not hold a scheduled-build collection.
    #[error("Corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// The request names no usable target.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The requested fire time lies further in the past than the submission margin allows.
    #[error("Fire time {fire_at} is more than {margin_secs}s in the past")]
    DateInPast { fire_at: String, margin_secs: u64 },

    /// No pending entry with the given ID exists.
    #[error("Scheduled build not found: {id}")]
    EntryNotFound { id: String },

    /// The execution service could not be reached or refused the request.
    #[error("Trigger failed: {0}")]
    Trigger(String),

    /// A computed delay could not be represented as a wait duration.
    #[error("Delay out of range: {0}")]
    DelayOutOfRange(String),

    #[error(transparent)]
    Core(#[from] oncebuild_core::OncebuildError),
}

impl SchedulerError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Io(_) => "IO_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::CorruptSnapshot(_) => "CORRUPT_SNAPSHOT",
            SchedulerError::InvalidTarget(_) => "INVALID_TARGET",
            SchedulerError::DateInPast { .. } => "DATE_IN_PAST",
            SchedulerError::EntryNotFound { .. } => "NOT_FOUND",
            SchedulerError::Trigger(_) => "TRIGGER_FAILED",
            SchedulerError::DelayOutOfRange(_) => "DELAY_OUT_OF_RANGE",
            SchedulerError::Core(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
