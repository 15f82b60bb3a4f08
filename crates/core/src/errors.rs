//! Error types for the vigil subsystem.

use std::time::Duration;

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for vigil operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A cache instance name that was never registered
    #[error("cache instance '{instance}' is not registered")]
    UnknownInstance { instance: String },

    /// A data loader name that was never registered
    #[error("data loader '{loader}' is not registered")]
    UnknownLoader { loader: String },

    /// A data loader failed after exhausting its retry budget
    #[error("loader '{loader}' failed: {message}")]
    Loader {
        loader: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An operation exceeded its time budget
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// JSON serialization/deserialization errors
    #[error("serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Prewarm task lifecycle errors
    #[error("prewarm task '{task}' error: {message}")]
    Task { task: String, message: String },
}

// Helper methods for creating errors with context
impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration {
            message: message.into(),
        }
    }

    /// Create an unknown-instance error
    #[must_use]
    pub fn unknown_instance(instance: impl Into<String>) -> Self {
        Error::UnknownInstance {
            instance: instance.into(),
        }
    }

    /// Create an unknown-loader error
    #[must_use]
    pub fn unknown_loader(loader: impl Into<String>) -> Self {
        Error::UnknownLoader {
            loader: loader.into(),
        }
    }

    /// Create a loader error
    #[must_use]
    pub fn loader(loader: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Loader {
            loader: loader.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a loader error with a source error
    #[must_use]
    pub fn loader_with_source(
        loader: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::Loader {
            loader: loader.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a prewarm task error
    #[must_use]
    pub fn task(task: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Task {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Whether this error class is worth retrying
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Loader { .. } | Error::Timeout { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Serialization {
            message: source.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = Error::unknown_instance("sessions");
        assert_eq!(
            err.to_string(),
            "cache instance 'sessions' is not registered"
        );

        let err = Error::timeout("load", Duration::from_secs(30));
        assert!(err.to_string().contains("load"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn transient_classification() {
        assert!(Error::loader("db", "connection reset").is_transient());
        assert!(Error::timeout("load", Duration::from_secs(1)).is_transient());
        assert!(!Error::configuration("bad interval").is_transient());
        assert!(!Error::unknown_loader("db").is_transient());
    }
}
