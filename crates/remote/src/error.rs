//! Error types for remote component operations.
//!
//! Every call on a remote handle can fail independently. Errors are
//! categorized so callers can decide, per connection, whether the failure
//! means the component is gone, the port is missing, or something else.

use netmodel::PortDirection;
use thiserror::Error;

/// Categories of remote errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The remote process did not answer (crashed, killed, network down)
    Communication,
    /// The task or one of its ports does not exist
    NotFound,
    /// The call is not allowed in the task's current state
    State,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether retrying the same call later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Communication | Self::State)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Communication => "Communication failure",
            Self::NotFound => "Remote object not found",
            Self::State => "Invalid task state",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Communication => "Check that the deployment process is still alive",
            Self::NotFound => "Check the task's interface against its model",
            Self::State => "Wait for the task to reach the expected state",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors returned by remote handles and process servers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote side did not answer
    #[error("communication error with {task}: {message}")]
    Communication { task: String, message: String },

    /// A port could not be found on the remote task
    #[error("{direction} port {port} not found on {task}")]
    PortNotFound {
        task: String,
        port: String,
        direction: PortDirection,
    },

    /// The task itself does not exist
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The operation is not valid in the task's current state
    #[error("cannot {operation} {task} in state {state}")]
    InvalidState {
        task: String,
        operation: String,
        state: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    pub fn communication(task: &str, message: impl Into<String>) -> Self {
        Self::Communication {
            task: task.to_string(),
            message: message.into(),
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Communication { .. } => ErrorCategory::Communication,
            Self::PortNotFound { .. } | Self::TaskNotFound(_) => ErrorCategory::NotFound,
            Self::InvalidState { .. } => ErrorCategory::State,
            Self::Other(_) => ErrorCategory::Other,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

/// Result type for remote operations
pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = RemoteError::communication("camera", "connection reset");
        assert_eq!(err.category(), ErrorCategory::Communication);
        assert!(err.is_retryable());

        let err = RemoteError::PortNotFound {
            task: "camera".into(),
            port: "frame".into(),
            direction: PortDirection::Output,
        };
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "output port frame not found on camera");
    }
}
