//! Machine lifecycle driver.
//!
//! Turns a [`MachineConfig`] into a [`ContainerSpec`], merging in the values
//! of the configured providers, and drives the container runtime through
//! start, stop and destroy. Every runtime call is bounded by the timeout the
//! caller passes in. The driver never retries.

use crate::config::DriverConfig;
use crate::model::{MachineConfig, SourceKind};
use crate::providers::{
    EnvVariablesProvider, ExtraHostsProvider, ExtraVolumesProvider, HostsProvider,
    HttpProxyEnvProvider, VolumesProvider,
};
use corral_runtime::{
    ContainerId, ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError, MACHINE_LABEL,
};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Label carrying the owning environment's name.
pub const ENVIRONMENT_LABEL: &str = "corral.environment";

/// Label set on the dev machine's container.
pub const DEV_LABEL: &str = "corral.dev";

/// Runtime failure of a driver operation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("start failed: {0}")]
    Start(#[source] RuntimeError),

    #[error("stop failed: {0}")]
    Stop(#[source] RuntimeError),

    #[error("destroy failed: {0}")]
    Destroy(#[source] RuntimeError),

    #[error("inspect failed: {0}")]
    Inspect(#[source] RuntimeError),

    /// The task running the operation ended without a result.
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl DriverError {
    /// Underlying runtime error, if any.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            DriverError::Start(e)
            | DriverError::Stop(e)
            | DriverError::Destroy(e)
            | DriverError::Inspect(e) => Some(e),
            DriverError::Aborted(_) => None,
        }
    }

    /// Whether the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.runtime_error(), Some(RuntimeError::Timeout(_)))
    }
}

/// Per-environment values shared by all machines of one start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvContext {
    environment: String,
    network: Option<String>,
}

impl EnvContext {
    pub fn new(environment: impl Into<String>, network: Option<String>) -> Self {
        Self {
            environment: environment.into(),
            network,
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Network every machine joins, with its machine name as alias.
    pub fn network(&self) -> Option<&str> {
        self.network.as_deref()
    }

    /// Container name of `machine` within this environment.
    pub fn container_name(&self, machine: &str) -> String {
        format!("{}-{}", sanitize(&self.environment), sanitize(machine))
    }
}

/// Replace characters docker refuses in container and network names.
///
/// A name that had to be rewritten gets the first eight hex digits of its
/// sha256 appended, so `my ws` and `my-ws` map to different names.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if cleaned == name {
        return cleaned;
    }
    let digest = format!("{:x}", Sha256::digest(name.as_bytes()));
    format!("{cleaned}-{}", &digest[..8])
}

/// A started machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineHandle {
    machine: String,
    container: ContainerId,
    dev: bool,
}

impl MachineHandle {
    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    pub fn is_dev(&self) -> bool {
        self.dev
    }
}

/// Starts, stops and destroys machines on a container runtime.
pub struct MachineDriver {
    runtime: Arc<dyn ContainerRuntime>,
    env_providers: Vec<Arc<dyn EnvVariablesProvider>>,
    volume_providers: Vec<Arc<dyn VolumesProvider>>,
    host_providers: Vec<Arc<dyn HostsProvider>>,
    memory_swap_multiplier: f64,
    create_network: bool,
}

impl MachineDriver {
    /// Driver without providers, swap or per-environment network.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            env_providers: Vec::new(),
            volume_providers: Vec::new(),
            host_providers: Vec::new(),
            memory_swap_multiplier: 0.0,
            create_network: false,
        }
    }

    /// Driver wired with the stock proxy, volume and host providers.
    pub fn from_config(runtime: Arc<dyn ContainerRuntime>, config: &DriverConfig) -> Self {
        Self::new(runtime)
            .with_env_provider(Arc::new(HttpProxyEnvProvider::from_config(config)))
            .with_volumes_provider(Arc::new(ExtraVolumesProvider::parse(
                config.extra_volumes.as_deref(),
            )))
            .with_hosts_provider(Arc::new(ExtraHostsProvider::parse(
                config.extra_hosts.as_deref(),
            )))
            .memory_swap_multiplier(config.memory_swap_multiplier)
            .create_network(config.create_network)
    }

    pub fn with_env_provider(mut self, provider: Arc<dyn EnvVariablesProvider>) -> Self {
        self.env_providers.push(provider);
        self
    }

    pub fn with_volumes_provider(mut self, provider: Arc<dyn VolumesProvider>) -> Self {
        self.volume_providers.push(provider);
        self
    }

    pub fn with_hosts_provider(mut self, provider: Arc<dyn HostsProvider>) -> Self {
        self.host_providers.push(provider);
        self
    }

    pub fn memory_swap_multiplier(mut self, multiplier: f64) -> Self {
        self.memory_swap_multiplier = multiplier;
        self
    }

    pub fn create_network(mut self, enabled: bool) -> Self {
        self.create_network = enabled;
        self
    }

    /// Name of the runtime backend.
    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Context for a start attempt of `environment`.
    pub fn context(&self, environment: &str) -> EnvContext {
        let network = self
            .create_network
            .then(|| format!("corral-{}", sanitize(environment)));
        EnvContext::new(environment, network)
    }

    /// Translate `config` into the container to run.
    pub fn container_spec(
        &self,
        config: &MachineConfig,
        ctx: &EnvContext,
    ) -> Result<ContainerSpec, RuntimeError> {
        let image = match config.source.kind {
            SourceKind::Image => config
                .source
                .location
                .as_deref()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    RuntimeError::Config(format!("machine {} has no image reference", config.name))
                })?,
            SourceKind::Dockerfile => {
                return Err(RuntimeError::Config(format!(
                    "machine {} needs an image build, which is not supported",
                    config.name
                )))
            }
        };

        let mut builder = ContainerSpec::builder(ctx.container_name(&config.name), image)
            .envs(self.env_providers.iter().flat_map(|p| p.get()))
            .env(format!("CORRAL_ENVIRONMENT={}", ctx.environment()))
            .env(format!("CORRAL_MACHINE={}", config.name))
            .envs(config.env_variables.iter().map(|(k, v)| format!("{k}={v}")))
            .binds(self.volume_providers.iter().flat_map(|p| p.get()))
            .extra_hosts(self.host_providers.iter().flat_map(|p| p.get()))
            .label(MACHINE_LABEL, config.name.as_str())
            .label(ENVIRONMENT_LABEL, ctx.environment())
            .entrypoint(config.entrypoint.clone())
            .command(config.command.clone());

        for (key, value) in &config.labels {
            builder = builder.label(key.as_str(), value.as_str());
        }
        if config.dev {
            builder = builder.label(DEV_LABEL, "true");
        }
        for port in config.servers.iter().map(|s| &s.port).chain(&config.expose) {
            builder = builder.expose(port.as_str());
        }
        if let Some(mb) = config.limits.memory_mb {
            let memory = i64::from(mb) * 1024 * 1024;
            builder = builder
                .memory_bytes(memory)
                .memory_swap_bytes(swap_bytes(memory, self.memory_swap_multiplier));
        }
        if let Some(network) = ctx.network() {
            builder = builder.network(network, config.name.as_str());
        }

        builder.build()
    }

    /// Create and start the container of `config`.
    ///
    /// A container that was created but failed to start is removed before
    /// the error is returned.
    pub async fn start(
        &self,
        config: &MachineConfig,
        ctx: &EnvContext,
        timeout: Duration,
    ) -> Result<MachineHandle, DriverError> {
        let started = Instant::now();
        let spec = self
            .container_spec(config, ctx)
            .map_err(DriverError::Start)?;

        if let Some(network) = ctx.network() {
            bounded(timeout, self.runtime.ensure_network(network))
                .await
                .map_err(DriverError::Start)?;
        }

        let container = match bounded(timeout, self.runtime.create_container(&spec)).await {
            Ok(container) => container,
            Err(e) => {
                // A timed-out create may still have been committed by the
                // runtime; its name would block every later start.
                self.remove_by_name(&config.name, &spec.name, timeout).await;
                return Err(DriverError::Start(e));
            }
        };

        let remaining = timeout.saturating_sub(started.elapsed());
        if let Err(e) = bounded(remaining, self.runtime.start_container(&container)).await {
            tracing::debug!(
                machine = %config.name,
                container = %container.short(),
                error = %e,
                "Removing container that failed to start"
            );
            if let Err(cleanup) = bounded(timeout, self.runtime.remove_container(&container)).await
            {
                tracing::warn!(
                    machine = %config.name,
                    container = %container.short(),
                    error = %cleanup,
                    "Failed to remove container after start failure"
                );
            }
            return Err(DriverError::Start(e));
        }

        tracing::debug!(
            machine = %config.name,
            container = %container.short(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Machine started"
        );

        Ok(MachineHandle {
            machine: config.name.clone(),
            container,
            dev: config.dev,
        })
    }

    async fn remove_by_name(&self, machine: &str, name: &str, timeout: Duration) {
        match bounded(timeout, self.runtime.remove_container(&ContainerId::new(name))).await {
            Ok(()) => {
                tracing::debug!(machine, container = %name, "Removed container left by failed create");
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                tracing::warn!(
                    machine,
                    container = %name,
                    error = %e,
                    "Failed to remove container after create failure"
                );
            }
        }
    }

    /// Start the existing, stopped container of `handle` again.
    pub async fn resume(&self, handle: &MachineHandle, timeout: Duration) -> Result<(), DriverError> {
        bounded(timeout, self.runtime.start_container(&handle.container))
            .await
            .map_err(DriverError::Start)
    }

    /// Stop the container of `handle`. A container that no longer exists
    /// counts as stopped.
    pub async fn stop(&self, handle: &MachineHandle, timeout: Duration) -> Result<(), DriverError> {
        match bounded(timeout, self.runtime.stop_container(&handle.container)).await {
            Err(e) if e.is_not_found() => {
                tracing::debug!(machine = %handle.machine, "Container already gone");
                Ok(())
            }
            result => result.map_err(DriverError::Stop),
        }
    }

    /// Remove the container of `handle` with its anonymous volumes.
    pub async fn destroy(
        &self,
        handle: &MachineHandle,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        match bounded(timeout, self.runtime.remove_container(&handle.container)).await {
            Err(e) if e.is_not_found() => Ok(()),
            result => result.map_err(DriverError::Destroy),
        }
    }

    /// Live status of the container behind `handle`.
    pub async fn inspect(&self, handle: &MachineHandle) -> Result<ContainerStatus, DriverError> {
        self.runtime
            .inspect(&handle.container)
            .await
            .map_err(DriverError::Inspect)
    }

    /// Remove the environment network, if any. Failures are logged.
    pub async fn release(&self, ctx: &EnvContext, timeout: Duration) {
        let Some(network) = ctx.network() else {
            return;
        };
        if let Err(e) = bounded(timeout, self.runtime.remove_network(network)).await {
            tracing::warn!(network, error = %e, "Failed to remove environment network");
        }
    }
}

impl std::fmt::Debug for MachineDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineDriver")
            .field("runtime", &self.runtime.name())
            .field("env_providers", &self.env_providers.len())
            .field("volume_providers", &self.volume_providers.len())
            .field("host_providers", &self.host_providers.len())
            .field("memory_swap_multiplier", &self.memory_swap_multiplier)
            .field("create_network", &self.create_network)
            .finish()
    }
}

/// Swap limit for `memory` bytes: -1 means unlimited.
fn swap_bytes(memory: i64, multiplier: f64) -> i64 {
    if multiplier < 0.0 {
        -1
    } else {
        (memory as f64 * (1.0 + multiplier)) as i64
    }
}

async fn bounded<T, F>(timeout: Duration, fut: F) -> Result<T, RuntimeError>
where
    F: Future<Output = Result<T, RuntimeError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| RuntimeError::Timeout(timeout))?
}
