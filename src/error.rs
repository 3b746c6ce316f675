//! Error types for the scheduling engine

use thiserror::Error;

/// Result type for scheduling operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Error taxonomy for the scheduling core
///
/// Configuration errors abort before the simulation seeds. Invariant
/// violations surface from component calls and are downgraded by event
/// handlers to logged drops so one bad event cannot crash a run.
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// Invalid input configuration (rejected before seeding)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Malformed time-of-day string
    #[error("Invalid time string '{0}', expected HH:MM")]
    InvalidTime(String),

    /// Malformed date string
    #[error("Invalid date string '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// Referenced task does not exist
    #[error("Task '{0}' not found")]
    TaskNotFound(String),

    /// Referenced instance does not exist in its timeline
    #[error("Instance '{instance}' not found in task '{task}'")]
    InstanceNotFound { task: String, instance: String },

    /// A resource was assigned an interval overlapping an existing one
    #[error("Resource '{resource}' already occupied during [{start}, {end})")]
    OverlappingInterval {
        resource: String,
        start: chrono::NaiveDateTime,
        end: chrono::NaiveDateTime,
    },

    /// Temporal event store failure
    #[error("Event store error: {0}")]
    Storage(String),

    /// Checkpoint snapshot failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Saved-flow persistence failure
    #[error("Flow persistence error: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for ScheduleError {
    fn from(err: std::io::Error) -> Self {
        ScheduleError::Storage(err.to_string())
    }
}
