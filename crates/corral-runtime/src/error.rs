//! Error types for corral-runtime.

use thiserror::Error;

/// Result type alias for corral-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur during container runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Failed to create the container
    #[error("failed to create container: {0}")]
    Create(String),

    /// Failed to start the container
    #[error("failed to start container: {0}")]
    Start(String),

    /// Failed to stop the container
    #[error("failed to stop container: {0}")]
    Stop(String),

    /// Failed to remove the container
    #[error("failed to remove container: {0}")]
    Remove(String),

    /// Failed to inspect the container
    #[error("failed to inspect container: {0}")]
    Inspect(String),

    /// Container is unknown to the runtime
    #[error("container not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout waiting for operation
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl RuntimeError {
    /// Check if this error means the container no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::Start("image pull failed".into());
        assert_eq!(err.to_string(), "failed to start container: image pull failed");

        let err = RuntimeError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "operation timed out after 5s");
    }

    #[test]
    fn test_is_not_found() {
        assert!(RuntimeError::NotFound("abc".into()).is_not_found());
        assert!(!RuntimeError::Remove("abc".into()).is_not_found());
    }
}
