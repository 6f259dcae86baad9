use thiserror::Error;

/// Errors raised by the tracker core.
///
/// Sensor and remote-store failures on the step sample path are absorbed by
/// [`crate::counter::DailyCounterStore`] and surfaced as status instead; the
/// variants still exist so collaborators can report them.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Step sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Remote store error at '{path}': {message}")]
    Store { path: String, message: String },

    #[error("Malformed record at '{path}': {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid date: {0}")]
    InvalidDate(#[from] chrono::ParseError),
}

impl TrackerError {
    pub fn store(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for failures the next write attempt may clear on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::SensorUnavailable(_))
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
