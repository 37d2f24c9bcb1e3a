//! Error types for corral-core.

use crate::driver::DriverError;
use crate::resolver::CycleError;
use crate::state::EnvironmentStatus;
use crate::validator::ValidationError;
use thiserror::Error;

/// Result type alias for corral-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the environment engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Descriptor is malformed
    #[error("invalid environment: {0}")]
    Validation(#[from] ValidationError),

    /// Dependency graph can't be ordered
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// A machine failed to start
    #[error("machine {machine} failed to start: {source}")]
    Start {
        machine: String,
        #[source]
        source: DriverError,
    },

    /// A machine failed to stop
    #[error("machine {machine} failed to stop: {source}")]
    Stop {
        machine: String,
        #[source]
        source: DriverError,
    },

    /// A machine failed to be destroyed.
    ///
    /// The engine never returns this: rollback and stop only log destroy
    /// failures. It exists for callers driving [`MachineDriver::destroy`]
    /// directly who want to report the failure in the same taxonomy.
    ///
    /// [`MachineDriver::destroy`]: crate::MachineDriver::destroy
    #[error("machine {machine} failed to be destroyed: {source}")]
    Destroy {
        machine: String,
        #[source]
        source: DriverError,
    },

    /// Another orchestration of the environment is in progress
    #[error("environment {0} is already starting")]
    AlreadyStarting(String),

    /// Environment state doesn't allow the operation
    #[error("environment {environment} is {status}")]
    NotRunning {
        environment: String,
        status: EnvironmentStatus,
    },

    /// Machine not part of the environment
    #[error("machine {machine} not found in environment {environment}")]
    UnknownMachine { environment: String, machine: String },

    /// Environment not known to the engine
    #[error("environment not found: {0}")]
    UnknownEnvironment(String),

    /// No handler registered for the type tag
    #[error("unsupported environment type: {0}")]
    UnsupportedEnvironmentType(String),

    /// Start was cancelled before completing
    #[error("start of environment {0} was cancelled")]
    Cancelled(String),

    /// Engine no longer accepts operations
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Invalid engine or driver configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// Error caused by the request itself; retrying it unchanged fails again.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            CoreError::Validation(_)
                | CoreError::Cycle(_)
                | CoreError::AlreadyStarting(_)
                | CoreError::NotRunning { .. }
                | CoreError::UnknownMachine { .. }
                | CoreError::UnknownEnvironment(_)
                | CoreError::UnsupportedEnvironmentType(_)
        )
    }

    /// Runtime-layer failure an outer caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::Start { .. } | CoreError::Stop { .. } | CoreError::Destroy { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_runtime::RuntimeError;

    #[test]
    fn test_classification() {
        let err = CoreError::from(ValidationError::NoMachines("ws".into()));
        assert!(err.is_caller_error());
        assert!(!err.is_retryable());

        let err = CoreError::Start {
            machine: "app".into(),
            source: DriverError::Start(RuntimeError::Start("boom".into())),
        };
        assert!(!err.is_caller_error());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("app"));

        assert!(!CoreError::ShuttingDown.is_caller_error());
        assert!(!CoreError::Cancelled("ws".into()).is_retryable());
    }

    #[test]
    fn test_destroy_error_wraps_driver_error() {
        use std::error::Error;

        let err = CoreError::Destroy {
            machine: "db".into(),
            source: DriverError::Destroy(RuntimeError::Remove("device busy".into())),
        };
        assert!(err.is_retryable());
        assert!(!err.is_caller_error());
        assert!(err.to_string().starts_with("machine db failed to be destroyed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_not_running_message() {
        let err = CoreError::NotRunning {
            environment: "ws".into(),
            status: EnvironmentStatus::Stopped,
        };
        assert_eq!(err.to_string(), "environment ws is stopped");
    }
}
