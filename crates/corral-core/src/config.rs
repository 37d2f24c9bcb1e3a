//! Engine and driver configuration types.

use crate::error::CoreError;
use std::time::Duration;

/// Configuration of the environment engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum machine starts in flight per environment (default: 4, 0 = unbounded).
    pub max_concurrent_starts: usize,
    /// Bound on a single machine start (default: 300s).
    pub start_timeout: Duration,
    /// Bound on a single machine stop (default: 60s).
    pub stop_timeout: Duration,
    /// Bound on a single machine destroy (default: 60s).
    pub destroy_timeout: Duration,
    /// Events buffered per subscriber before it starts lagging (default: 256).
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_starts: 4,
            start_timeout: Duration::from_secs(300),
            stop_timeout: Duration::from_secs(60),
            destroy_timeout: Duration::from_secs(60),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.start_timeout.is_zero() {
            return Err(CoreError::Config("start_timeout must be > 0".into()));
        }
        if self.stop_timeout.is_zero() {
            return Err(CoreError::Config("stop_timeout must be > 0".into()));
        }
        if self.destroy_timeout.is_zero() {
            return Err(CoreError::Config("destroy_timeout must be > 0".into()));
        }
        if self.event_capacity == 0 {
            return Err(CoreError::Config("event_capacity must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the per-environment start concurrency (0 = unbounded).
    pub fn max_concurrent_starts(mut self, limit: usize) -> Self {
        self.config.max_concurrent_starts = limit;
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.config.start_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.config.stop_timeout = timeout;
        self
    }

    pub fn destroy_timeout(mut self, timeout: Duration) -> Self {
        self.config.destroy_timeout = timeout;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<EngineConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration of the machine driver and its providers.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Value of `http_proxy` injected into every machine.
    pub http_proxy: Option<String>,
    /// Value of `https_proxy` injected into every machine.
    pub https_proxy: Option<String>,
    /// Value of `no_proxy` injected into every machine.
    pub no_proxy: Option<String>,
    /// Comma-separated `host:container[:mode]` binds added to every machine.
    pub extra_volumes: Option<String>,
    /// Comma-separated `host:ip` entries added to every machine.
    pub extra_hosts: Option<String>,
    /// Swap as a multiple of memory (-1 = unlimited, 0 = none). Default: 0.
    pub memory_swap_multiplier: f64,
    /// Give each environment its own network (default: true).
    pub create_network: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            http_proxy: None,
            https_proxy: None,
            no_proxy: None,
            extra_volumes: None,
            extra_hosts: None,
            memory_swap_multiplier: 0.0,
            create_network: true,
        }
    }
}

impl DriverConfig {
    /// Create a new config builder.
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        let multiplier = self.memory_swap_multiplier;
        if !multiplier.is_finite() || (multiplier < 0.0 && multiplier != -1.0) {
            return Err(CoreError::Config(format!(
                "memory_swap_multiplier must be -1 or >= 0, got {multiplier}"
            )));
        }
        Ok(())
    }
}

/// Builder for DriverConfig.
#[derive(Debug, Default)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    pub fn http_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.http_proxy = Some(proxy.into());
        self
    }

    pub fn https_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.config.https_proxy = Some(proxy.into());
        self
    }

    pub fn no_proxy(mut self, hosts: impl Into<String>) -> Self {
        self.config.no_proxy = Some(hosts.into());
        self
    }

    pub fn extra_volumes(mut self, volumes: impl Into<String>) -> Self {
        self.config.extra_volumes = Some(volumes.into());
        self
    }

    pub fn extra_hosts(mut self, hosts: impl Into<String>) -> Self {
        self.config.extra_hosts = Some(hosts.into());
        self
    }

    pub fn memory_swap_multiplier(mut self, multiplier: f64) -> Self {
        self.config.memory_swap_multiplier = multiplier;
        self
    }

    pub fn create_network(mut self, enabled: bool) -> Self {
        self.config.create_network = enabled;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<DriverConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
