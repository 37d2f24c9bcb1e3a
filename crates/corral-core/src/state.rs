//! Machine and environment states and the snapshots handed to readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MachineState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MachineState::Created => "created",
            MachineState::Starting => "starting",
            MachineState::Running => "running",
            MachineState::Stopping => "stopping",
            MachineState::Stopped => "stopped",
            MachineState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Aggregate state of an environment, derived from its machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentStatus {
    Starting,
    Running,
    PartiallyFailed,
    Stopping,
    Stopped,
}

impl fmt::Display for EnvironmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvironmentStatus::Starting => "starting",
            EnvironmentStatus::Running => "running",
            EnvironmentStatus::PartiallyFailed => "partially failed",
            EnvironmentStatus::Stopping => "stopping",
            EnvironmentStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Stage of an environment as recorded by the engine.
///
/// Only the stage is stored; the reported [`EnvironmentStatus`] is derived
/// from it together with the machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl Phase {
    /// No orchestration or teardown is in progress.
    pub(crate) fn is_settled(self) -> bool {
        matches!(self, Phase::Running | Phase::Stopped)
    }
}

/// Derive the environment status from its stage and machine states.
pub(crate) fn derive_status<I>(phase: Phase, machines: I) -> EnvironmentStatus
where
    I: IntoIterator<Item = MachineState>,
{
    let any_failed = machines.into_iter().any(|s| s == MachineState::Failed);
    match phase {
        Phase::Starting | Phase::Running if any_failed => EnvironmentStatus::PartiallyFailed,
        Phase::Starting => EnvironmentStatus::Starting,
        Phase::Running => EnvironmentStatus::Running,
        Phase::Stopping => EnvironmentStatus::Stopping,
        Phase::Stopped => EnvironmentStatus::Stopped,
    }
}

/// Failure reported for an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// First machine that failed, if a machine caused the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    pub reason: String,
}

/// State of one machine at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSnapshot {
    pub name: String,
    pub state: MachineState,
    pub dev: bool,
    /// Container backing the machine while it exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

/// Immutable view of an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub name: String,
    #[serde(rename = "type")]
    pub env_type: String,
    pub status: EnvironmentStatus,
    /// Machines in declaration order.
    pub machines: Vec<MachineSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EnvironmentSnapshot {
    pub fn machine(&self, name: &str) -> Option<&MachineSnapshot> {
        self.machines.iter().find(|m| m.name == name)
    }

    /// State of `name`, if the machine exists.
    pub fn machine_state(&self, name: &str) -> Option<MachineState> {
        self.machine(name).map(|m| m.state)
    }

    /// Whether every machine is in `state`.
    pub fn all_machines(&self, state: MachineState) -> bool {
        self.machines.iter().all(|m| m.state == state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MachineState::*;

    #[test]
    fn test_derive_status() {
        assert_eq!(
            derive_status(Phase::Starting, [Running, Starting]),
            EnvironmentStatus::Starting
        );
        assert_eq!(
            derive_status(Phase::Starting, [Running, Failed]),
            EnvironmentStatus::PartiallyFailed
        );
        assert_eq!(
            derive_status(Phase::Running, [Running, Running]),
            EnvironmentStatus::Running
        );
        assert_eq!(
            derive_status(Phase::Running, [Running, Failed]),
            EnvironmentStatus::PartiallyFailed
        );
        assert_eq!(
            derive_status(Phase::Stopping, [Failed]),
            EnvironmentStatus::Stopping
        );
        assert_eq!(derive_status(Phase::Stopped, [Failed]), EnvironmentStatus::Stopped);
    }

    #[test]
    fn test_settled_phases() {
        assert!(Phase::Running.is_settled());
        assert!(Phase::Stopped.is_settled());
        assert!(!Phase::Starting.is_settled());
        assert!(!Phase::Stopping.is_settled());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&EnvironmentStatus::PartiallyFailed).unwrap();
        assert_eq!(json, "\"partially_failed\"");
        assert_eq!(EnvironmentStatus::Stopped.to_string(), "stopped");
    }
}
