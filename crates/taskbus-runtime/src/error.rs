//! Error types for tasks and activation
//!
//! A [`TaskError`] never leaves the supervisor: it is logged, possibly
//! retried, and reported in the task's outcome. A [`RuntimeError`] is raised
//! before any task runs and is meant to abort startup.

use taskbus_config::ConfigurationError;
use taskbus_events::{BusBuildError, CodecError, EventBusError, HandlerError};
use thiserror::Error;

/// Failure of a task body or of a handler registered through a context.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task reported a failure
    #[error("{0}")]
    Failed(String),

    /// A payload could not be encoded or decoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The bus refused an operation
    #[error(transparent)]
    Bus(#[from] EventBusError),

    /// The task's configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigurationError),

    /// A context without a handler function was used as a subscription
    #[error("context '{0}' has no handler function")]
    MissingHandler(String),

    /// The task panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Shorthand for [`TaskError::Failed`].
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

impl From<TaskError> for HandlerError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Codec(e) => HandlerError::Codec(e),
            TaskError::Bus(e) => HandlerError::Bus(e),
            other => HandlerError::Failed(other.to_string()),
        }
    }
}

/// Startup failure.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Registration or configuration problem
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The bus could not be built
    #[error(transparent)]
    Bus(#[from] BusBuildError),
}
