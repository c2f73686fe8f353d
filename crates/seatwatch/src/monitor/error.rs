//! Error types for the monitoring subsystem.

use thiserror::Error;

/// Errors that can occur while checking or tracking a course.
#[derive(Debug, Error, Clone)]
pub enum MonitorError {
    /// Course identifier absent from the page after an exhaustive search
    #[error("Course {course} not found: {message}")]
    NotFound { course: String, message: String },

    /// Page session unreachable or the page script could not run
    #[error("Could not communicate with portal page: {message}")]
    Communication { message: String },

    /// Progressive search exceeded its wall-clock ceiling
    #[error("Search for {course} timed out after {elapsed_secs:.1}s")]
    Timeout { course: String, elapsed_secs: f64 },

    /// User-entered course identifier is not `CODE.SECTION`
    #[error("Invalid course format '{input}', use a format like CSE498R.11 or EEE111.4")]
    MalformedInput { input: String },

    /// The course is already being monitored
    #[error("{course} is already being monitored")]
    Duplicate { course: String },

    /// A check cycle is already running
    #[error("A check cycle is already in progress")]
    CycleInFlight,

    /// Persistent store could not be read or written
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MonitorError {
    /// Returns true if the request itself was refused, rather than the portal or store failing.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            MonitorError::MalformedInput { .. }
                | MonitorError::Duplicate { .. }
                | MonitorError::CycleInFlight
        )
    }

    /// Returns true if the failure should be recorded against a single course.
    pub fn degrades_course(&self) -> bool {
        matches!(
            self,
            MonitorError::NotFound { .. }
                | MonitorError::Communication { .. }
                | MonitorError::Timeout { .. }
        )
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Communication {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for MonitorError {
    fn from(err: url::ParseError) -> Self {
        MonitorError::Communication {
            message: format!("invalid portal URL: {err}"),
        }
    }
}

impl From<rusqlite::Error> for MonitorError {
    fn from(err: rusqlite::Error) -> Self {
        MonitorError::Storage {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Storage {
            message: err.to_string(),
        }
    }
}
