//! Configuration errors
//!
//! These errors are fatal at startup: they are reported before any task is
//! activated and abort the construction of the runtime.

use thiserror::Error;

/// Startup configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// A second registration used a name that is already taken.
    #[error("duplicate {kind} registration: {name}")]
    DuplicateRegistration {
        /// What was being registered ("adapter", "task").
        kind: &'static str,
        /// The conflicting name.
        name: String,
    },

    /// The configured bus adapter is not registered.
    #[error("unknown bus adapter '{name}' (available: {})", available.join(", "))]
    UnknownAdapter {
        /// Requested adapter name.
        name: String,
        /// Registered adapter names.
        available: Vec<String>,
    },

    /// A configuration value has the wrong shape.
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

impl ConfigurationError {
    /// Shorthand for [`ConfigurationError::InvalidValue`].
    pub fn invalid(key: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.to_string(),
        }
    }
}
