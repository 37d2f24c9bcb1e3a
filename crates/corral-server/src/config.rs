//! Configuration for the corral server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use corral_core::{DriverConfig, EngineConfig};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for the corral server.
#[derive(Debug, Clone)]
pub struct CorralConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Docker CLI binary.
    pub docker_binary: PathBuf,

    /// Seconds docker waits for a container to exit before killing it.
    pub stop_grace_secs: u32,

    /// Engine settings.
    pub engine: EngineConfig,

    /// Driver and provider settings.
    pub driver: DriverConfig,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid engine configuration: {0}")]
    Engine(String),

    #[error("invalid driver configuration: {0}")]
    Driver(String),

    #[error("invalid value {value:?} for {var}")]
    InvalidValue { var: &'static str, value: String },
}

impl Default for CorralConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            docker_binary: PathBuf::from("docker"),
            stop_grace_secs: 10,
            engine: EngineConfig::default(),
            driver: DriverConfig::default(),
        }
    }
}

impl CorralConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CORRAL_HTTP_HOST` | `0.0.0.0` |
    /// | `CORRAL_HTTP_PORT` | `8080` |
    /// | `CORRAL_DOCKER_BINARY` | `docker` |
    /// | `CORRAL_STOP_GRACE_SECS` | `10` |
    /// | `CORRAL_MAX_CONCURRENT_STARTS` | `4` (0 = unbounded) |
    /// | `CORRAL_START_TIMEOUT_SECS` | `300` |
    /// | `CORRAL_STOP_TIMEOUT_SECS` | `60` |
    /// | `CORRAL_DESTROY_TIMEOUT_SECS` | `60` |
    /// | `CORRAL_EVENT_CAPACITY` | `256` |
    /// | `CORRAL_HTTP_PROXY` | unset |
    /// | `CORRAL_HTTPS_PROXY` | unset |
    /// | `CORRAL_NO_PROXY` | unset |
    /// | `CORRAL_EXTRA_VOLUMES` | unset (`host:container[:mode],...`) |
    /// | `CORRAL_EXTRA_HOSTS` | unset (`host:ip,...`) |
    /// | `CORRAL_MEMORY_SWAP_MULTIPLIER` | `0` (-1 = unlimited) |
    /// | `CORRAL_CREATE_NETWORK` | `true` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let host: IpAddr = parse_or(&lookup, "CORRAL_HTTP_HOST", default.http_addr.ip())?;
        let port: u16 = parse_or(&lookup, "CORRAL_HTTP_PORT", default.http_addr.port())?;

        let secs = |var: &'static str, fallback: Duration| -> Result<Duration, ConfigError> {
            parse_or(&lookup, var, fallback.as_secs()).map(Duration::from_secs)
        };

        let engine = EngineConfig {
            max_concurrent_starts: parse_or(
                &lookup,
                "CORRAL_MAX_CONCURRENT_STARTS",
                default.engine.max_concurrent_starts,
            )?,
            start_timeout: secs("CORRAL_START_TIMEOUT_SECS", default.engine.start_timeout)?,
            stop_timeout: secs("CORRAL_STOP_TIMEOUT_SECS", default.engine.stop_timeout)?,
            destroy_timeout: secs("CORRAL_DESTROY_TIMEOUT_SECS", default.engine.destroy_timeout)?,
            event_capacity: parse_or(&lookup, "CORRAL_EVENT_CAPACITY", default.engine.event_capacity)?,
        };

        let driver = DriverConfig {
            http_proxy: get("CORRAL_HTTP_PROXY"),
            https_proxy: get("CORRAL_HTTPS_PROXY"),
            no_proxy: get("CORRAL_NO_PROXY"),
            extra_volumes: get("CORRAL_EXTRA_VOLUMES"),
            extra_hosts: get("CORRAL_EXTRA_HOSTS"),
            memory_swap_multiplier: parse_or(
                &lookup,
                "CORRAL_MEMORY_SWAP_MULTIPLIER",
                default.driver.memory_swap_multiplier,
            )?,
            create_network: parse_or(&lookup, "CORRAL_CREATE_NETWORK", default.driver.create_network)?,
        };

        Ok(Self {
            http_addr: SocketAddr::new(host, port),
            docker_binary: get("CORRAL_DOCKER_BINARY")
                .map(PathBuf::from)
                .unwrap_or(default.docker_binary),
            stop_grace_secs: parse_or(&lookup, "CORRAL_STOP_GRACE_SECS", default.stop_grace_secs)?,
            engine,
            driver,
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine
            .validate()
            .map_err(|e| ConfigError::Engine(e.to_string()))?;
        self.driver
            .validate()
            .map_err(|e| ConfigError::Driver(e.to_string()))?;
        Ok(())
    }

    /// Log warnings for settings that are valid but likely wrong.
    pub fn validate_warn(&self) {
        if self.docker_binary.is_absolute() && !self.docker_binary.exists() {
            tracing::warn!("Docker binary not found: {:?}", self.docker_binary);
        }
        if self.engine.max_concurrent_starts == 0 {
            tracing::warn!("Machine starts are unbounded per environment");
        }
    }
}

/// Parse `var` when set and non-blank, otherwise use `fallback`.
fn parse_or<T, F>(lookup: &F, var: &'static str, fallback: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).filter(|v| !v.trim().is_empty()) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(fallback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CorralConfig::default();
        assert_eq!(config.http_addr.port(), 8080);
        assert_eq!(config.docker_binary, PathBuf::from("docker"));
        assert_eq!(config.engine.max_concurrent_starts, 4);
        assert!(config.driver.create_network);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = CorralConfig::from_lookup(lookup(&[])).unwrap();
        let default = CorralConfig::default();
        assert_eq!(config.http_addr, default.http_addr);
        assert_eq!(config.engine.start_timeout, default.engine.start_timeout);
        assert!(config.driver.http_proxy.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = CorralConfig::from_lookup(lookup(&[
            ("CORRAL_HTTP_HOST", "127.0.0.1"),
            ("CORRAL_HTTP_PORT", "9090"),
            ("CORRAL_MAX_CONCURRENT_STARTS", "0"),
            ("CORRAL_START_TIMEOUT_SECS", "30"),
            ("CORRAL_HTTP_PROXY", "http://proxy:3128"),
            ("CORRAL_EXTRA_VOLUMES", "/srv:/srv"),
            ("CORRAL_MEMORY_SWAP_MULTIPLIER", "-1"),
            ("CORRAL_CREATE_NETWORK", "false"),
        ]))
        .unwrap();

        assert_eq!(config.http_addr.to_string(), "127.0.0.1:9090");
        assert_eq!(config.engine.max_concurrent_starts, 0);
        assert_eq!(config.engine.start_timeout, Duration::from_secs(30));
        assert_eq!(config.driver.http_proxy.as_deref(), Some("http://proxy:3128"));
        assert_eq!(config.driver.extra_volumes.as_deref(), Some("/srv:/srv"));
        assert_eq!(config.driver.memory_swap_multiplier, -1.0);
        assert!(!config.driver.create_network);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_value_reported() {
        let err = CorralConfig::from_lookup(lookup(&[("CORRAL_HTTP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "CORRAL_HTTP_PORT", .. }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_engine_config() {
        let config = CorralConfig::from_lookup(lookup(&[("CORRAL_EVENT_CAPACITY", "0")])).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Engine(_))));
    }
}
