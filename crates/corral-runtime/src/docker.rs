//! Docker backend driving the `docker` CLI.
//!
//! Each runtime operation maps to one `docker` subcommand executed through
//! `tokio::process`, so no daemon socket bindings are needed and the
//! calling task is never blocked.

use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerStatus};
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;

/// Seconds docker waits for a graceful stop before killing the container.
const DEFAULT_STOP_GRACE_SECS: u32 = 10;

/// Container runtime backed by the docker command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
    stop_grace_secs: u32,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Use `docker` from `PATH`.
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific docker binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            stop_grace_secs: DEFAULT_STOP_GRACE_SECS,
        }
    }

    /// Set the graceful stop period passed to `docker stop -t`.
    pub fn stop_grace_secs(mut self, secs: u32) -> Self {
        self.stop_grace_secs = secs;
        self
    }

    /// Build the argument list for `docker create`.
    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

        for var in &spec.env {
            args.push("--env".into());
            args.push(var.clone());
        }
        for bind in &spec.binds {
            args.push("--volume".into());
            args.push(bind.clone());
        }
        for host in &spec.extra_hosts {
            args.push("--add-host".into());
            args.push(host.clone());
        }
        for port in &spec.exposed_ports {
            args.push("--expose".into());
            args.push(port.clone());
        }
        if !spec.exposed_ports.is_empty() {
            args.push("--publish-all".into());
        }
        if let Some(memory) = spec.memory_bytes {
            args.push("--memory".into());
            args.push(memory.to_string());
        }
        if let Some(swap) = spec.memory_swap_bytes {
            args.push("--memory-swap".into());
            args.push(swap.to_string());
        }
        if let Some(network) = &spec.network {
            args.push("--network".into());
            args.push(network.clone());
            for alias in &spec.network_aliases {
                args.push("--network-alias".into());
                args.push(alias.clone());
            }
        }
        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        if !spec.entrypoint.is_empty() {
            // docker only takes the executable here, the rest goes before the command
            args.push("--entrypoint".into());
            args.push(spec.entrypoint[0].clone());
        }

        args.push(spec.image.clone());
        args.extend(spec.entrypoint.iter().skip(1).cloned());
        args.extend(spec.command.iter().cloned());
        args
    }

    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.kill_on_drop(true);
        tracing::trace!(command = ?cmd, "Executing docker command");
        Ok(cmd.output().await?)
    }

    /// Run a command and map a non-zero exit status through `on_error`.
    async fn run_checked<I, S>(
        &self,
        args: I,
        on_error: fn(String) -> RuntimeError,
    ) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = self.run(args).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        tracing::debug!(status = %output.status, stderr = %stderr, "Docker command failed");
        if is_missing_container(&stderr) {
            return Err(RuntimeError::NotFound(stderr));
        }
        Err(on_error(format!("{} ({})", stderr, output.status)))
    }
}

fn is_missing_container(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container") || lower.contains("no such object")
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        spec.validate()?;
        tracing::debug!(container = %spec.name, image = %spec.image, "Creating container");
        let stdout = self
            .run_checked(Self::create_args(spec), RuntimeError::Create)
            .await?;
        let id = stdout
            .lines()
            .last()
            .filter(|line| !line.is_empty())
            .ok_or_else(|| RuntimeError::Create("docker create printed no container id".into()))?;
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        tracing::debug!(container = %id.short(), "Starting container");
        self.run_checked(["start", id.as_str()], RuntimeError::Start)
            .await
            .map(|_| ())
    }

    async fn stop_container(&self, id: &ContainerId) -> Result<()> {
        tracing::debug!(container = %id.short(), "Stopping container");
        let grace = self.stop_grace_secs.to_string();
        self.run_checked(["stop", "-t", grace.as_str(), id.as_str()], RuntimeError::Stop)
            .await
            .map(|_| ())
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        tracing::debug!(container = %id.short(), "Removing container");
        self.run_checked(["rm", "--force", "--volumes", id.as_str()], RuntimeError::Remove)
            .await
            .map(|_| ())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let stdout = self
            .run_checked(
                ["inspect", "--format", "{{.State.Status}}", id.as_str()],
                RuntimeError::Inspect,
            )
            .await?;
        ContainerStatus::parse(&stdout)
            .ok_or_else(|| RuntimeError::Inspect(format!("unknown container status {stdout:?}")))
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        let exists = self.run(["network", "inspect", name]).await?.status.success();
        if exists {
            return Ok(());
        }
        tracing::debug!(network = %name, "Creating network");
        match self.run_checked(["network", "create", name], RuntimeError::Create).await {
            Ok(_) => Ok(()),
            // another environment start may have raced us
            Err(RuntimeError::Create(msg)) if msg.contains("already exists") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        tracing::debug!(network = %name, "Removing network");
        match self.run_checked(["network", "rm", name], RuntimeError::Remove).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::Remove(msg)) if msg.contains("not found") => Ok(()),
            Err(e) => Err(e),
        }
    }
}
