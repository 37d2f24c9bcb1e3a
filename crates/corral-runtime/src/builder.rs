//! Builder pattern for ergonomic ContainerSpec configuration.

use crate::error::Result;
use crate::spec::ContainerSpec;

/// Fluent builder for [`ContainerSpec`].
///
/// # Example
///
/// ```
/// use corral_runtime::ContainerSpec;
///
/// let spec = ContainerSpec::builder("ws1-app", "eclipse/ubuntu_jdk8")
///     .env("JAVA_OPTS=-Xmx512m")
///     .bind("/home/user/.m2:/root/.m2")
///     .expose("8080/tcp")
///     .network("ws1", "app")
///     .build()
///     .unwrap();
/// assert_eq!(spec.network.as_deref(), Some("ws1"));
/// ```
#[derive(Debug, Clone)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    /// Create a new builder for the given container name and image.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            spec: ContainerSpec {
                name: name.into(),
                image: image.into(),
                ..Default::default()
            },
        }
    }

    /// Add an environment variable in `KEY=VALUE` form.
    pub fn env(mut self, var: impl Into<String>) -> Self {
        self.spec.env.push(var.into());
        self
    }

    /// Add several environment variables.
    pub fn envs<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.env.extend(vars.into_iter().map(Into::into));
        self
    }

    /// Add a bind mount in `host:container[:mode]` form.
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.spec.binds.push(bind.into());
        self
    }

    /// Add several bind mounts.
    pub fn binds<I, S>(mut self, binds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.binds.extend(binds.into_iter().map(Into::into));
        self
    }

    /// Add extra `/etc/hosts` entries.
    pub fn extra_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec.extra_hosts.extend(hosts.into_iter().map(Into::into));
        self
    }

    /// Expose a port, e.g. `8080/tcp`.
    pub fn expose(mut self, port: impl Into<String>) -> Self {
        self.spec.exposed_ports.push(port.into());
        self
    }

    /// Set the memory limit in bytes.
    pub fn memory_bytes(mut self, bytes: i64) -> Self {
        self.spec.memory_bytes = Some(bytes);
        self
    }

    /// Set the memory + swap limit in bytes (`-1` for unlimited swap).
    pub fn memory_swap_bytes(mut self, bytes: i64) -> Self {
        self.spec.memory_swap_bytes = Some(bytes);
        self
    }

    /// Attach to `network`, reachable as `alias`.
    pub fn network(mut self, network: impl Into<String>, alias: impl Into<String>) -> Self {
        self.spec.network = Some(network.into());
        self.spec.network_aliases.push(alias.into());
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.labels.insert(key.into(), value.into());
        self
    }

    /// Override the entrypoint.
    pub fn entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.spec.entrypoint = entrypoint;
        self
    }

    /// Override the command.
    pub fn command(mut self, command: Vec<String>) -> Self {
        self.spec.command = command;
        self
    }

    /// Get the current spec (for inspection before building).
    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Validate and return the spec.
    pub fn build(self) -> Result<ContainerSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
