//! Normalized container configuration handed to a runtime.

use crate::builder::ContainerSpecBuilder;
use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a runtime needs to create one container.
///
/// Produced by the machine driver from a machine configuration after all
/// provider-supplied variables, volumes and hosts have been merged in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name, unique on the host.
    pub name: String,
    /// Image reference to run.
    pub image: String,
    /// Environment variables in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Bind mounts in `host:container[:mode]` form.
    pub binds: Vec<String>,
    /// Extra `/etc/hosts` entries in `host:ip` form.
    pub extra_hosts: Vec<String>,
    /// Ports to expose, e.g. `8080/tcp`.
    pub exposed_ports: Vec<String>,
    /// Memory limit in bytes.
    pub memory_bytes: Option<i64>,
    /// Memory + swap limit in bytes, `-1` for unlimited swap.
    pub memory_swap_bytes: Option<i64>,
    /// Network to attach the container to.
    pub network: Option<String>,
    /// Aliases the container is reachable by on `network`.
    pub network_aliases: Vec<String>,
    /// Container labels.
    pub labels: BTreeMap<String, String>,
    /// Entrypoint override.
    pub entrypoint: Vec<String>,
    /// Command override.
    pub command: Vec<String>,
}

impl ContainerSpec {
    /// Start building a spec for `name` running `image`.
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> ContainerSpecBuilder {
        ContainerSpecBuilder::new(name, image)
    }

    /// Validate the spec.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(RuntimeError::Config("container name is required".into()));
        }
        if self.image.is_empty() {
            return Err(RuntimeError::Config(format!(
                "container {} has no image",
                self.name
            )));
        }
        if let Some(var) = self.env.iter().find(|v| !v.contains('=') || v.starts_with('=')) {
            return Err(RuntimeError::Config(format!(
                "malformed environment variable {var:?}, expected KEY=VALUE"
            )));
        }
        if let Some(bind) = self.binds.iter().find(|b| !b.contains(':')) {
            return Err(RuntimeError::Config(format!(
                "malformed bind mount {bind:?}, expected host:container"
            )));
        }
        if matches!(self.memory_bytes, Some(m) if m <= 0) {
            return Err(RuntimeError::Config("memory limit must be > 0".into()));
        }
        Ok(())
    }
}
