//! Request and response bodies of the HTTP API.
//!
//! Environment descriptors and snapshots are serialized as defined in
//! corral-core; only the envelopes live here.

use corral_core::{CoreError, EnvironmentSnapshot};
use serde::{Deserialize, Serialize};

/// Result of `GET /environments`.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnvironmentList {
    /// Snapshots sorted by environment name.
    pub environments: Vec<EnvironmentSnapshot>,
}

/// Result of `POST /environments/:name/cancel`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResult {
    /// Whether a start was in progress and got cancelled.
    pub cancelled: bool,
}

/// Result of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResult {
    pub status: String,
    pub service: String,
    /// Registered environment types.
    pub environment_types: Vec<String>,
    pub shutting_down: bool,
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable error kind.
    pub kind: String,
    /// Human-readable message.
    pub error: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        let kind = match err {
            CoreError::Validation(_) => "validation",
            CoreError::Cycle(_) => "cycle",
            CoreError::Start { .. } => "start",
            CoreError::Stop { .. } => "stop",
            CoreError::Destroy { .. } => "destroy",
            CoreError::AlreadyStarting(_) => "already_starting",
            CoreError::NotRunning { .. } => "not_running",
            CoreError::UnknownMachine { .. } => "unknown_machine",
            CoreError::UnknownEnvironment(_) => "unknown_environment",
            CoreError::UnsupportedEnvironmentType(_) => "unsupported_type",
            CoreError::Cancelled(_) => "cancelled",
            CoreError::ShuttingDown => "shutting_down",
            CoreError::Config(_) => "config",
        };
        Self {
            kind: kind.to_string(),
            error: err.to_string(),
        }
    }
}
