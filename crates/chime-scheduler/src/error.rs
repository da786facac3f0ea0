use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A trigger record failed validation.
    #[error("Invalid trigger: {0}")]
    InvalidTrigger(#[from] TriggerError),

    /// No trigger with the given ID exists in the store.
    #[error("Trigger not found: {id}")]
    TriggerNotFound { id: u32 },

    /// Drafts have no stable id yet and cannot be saved, armed or fired.
    #[error("Trigger has not been persisted yet")]
    Draft,
}

/// Validation failures when turning a raw record into a [`crate::Trigger`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("hour {0} is not between 0 and 23")]
    HourOutOfRange(i64),

    #[error("minute {0} is not between 0 and 59")]
    MinuteOutOfRange(i64),

    #[error("repeat interval {0} is not between 1 and 127")]
    IntervalOutOfRange(i64),

    #[error("trigger id {0} is negative or too large")]
    InvalidId(i64),

    #[error("timer id {0} is negative or too large")]
    InvalidTimerId(i64),

    #[error("unknown trigger action {0}")]
    UnknownAction(i64),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
