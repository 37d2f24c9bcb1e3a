//! The container runtime abstraction.

use crate::error::Result;
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a container, as assigned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Wrap a runtime-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form used in logs (first 12 characters, like `docker ps`).
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live status of a container as reported by `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Created but never started
    Created,
    /// Running
    Running,
    /// Paused
    Paused,
    /// Restarting after a crash
    Restarting,
    /// Exited (stopped)
    Exited,
    /// Being removed or dead
    Dead,
}

impl ContainerStatus {
    /// Parse the `State.Status` string reported by docker.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "restarting" => Some(Self::Restarting),
            "exited" => Some(Self::Exited),
            "dead" | "removing" => Some(Self::Dead),
            _ => None,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Created => write!(f, "created"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Paused => write!(f, "paused"),
            ContainerStatus::Restarting => write!(f, "restarting"),
            ContainerStatus::Exited => write!(f, "exited"),
            ContainerStatus::Dead => write!(f, "dead"),
        }
    }
}

/// A container engine that can run machines.
///
/// Every operation may take anywhere from milliseconds to minutes (image
/// pulls, slow stops). Implementations carry their own retry semantics;
/// callers bound each call with their own timeout.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short name of the backend, for logs.
    fn name(&self) -> &'static str;

    /// Create (but do not start) a container.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId>;

    /// Start a created container.
    async fn start_container(&self, id: &ContainerId) -> Result<()>;

    /// Stop a running container.
    async fn stop_container(&self, id: &ContainerId) -> Result<()>;

    /// Remove a container, stopping it first if needed.
    async fn remove_container(&self, id: &ContainerId) -> Result<()>;

    /// Report the live status of a container.
    async fn inspect(&self, id: &ContainerId) -> Result<ContainerStatus>;

    /// Make sure a network exists. Backends without networking may ignore this.
    async fn ensure_network(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Remove a network. Backends without networking may ignore this.
    async fn remove_network(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_id_short() {
        let id = ContainerId::new("4f2a9c1b7d3e5a6f8091");
        assert_eq!(id.short(), "4f2a9c1b7d3e");
        assert_eq!(ContainerId::new("abc").short(), "abc");
    }

    #[test]
    fn test_container_status_parse() {
        assert_eq!(ContainerStatus::parse("running\n"), Some(ContainerStatus::Running));
        assert_eq!(ContainerStatus::parse("Exited"), Some(ContainerStatus::Exited));
        assert_eq!(ContainerStatus::parse("removing"), Some(ContainerStatus::Dead));
        assert_eq!(ContainerStatus::parse("bogus"), None);
    }

    #[test]
    fn test_container_status_display() {
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(ContainerStatus::Exited.to_string(), "exited");
    }
}
