//! Providers of values injected into every machine.
//!
//! Providers are consulted synchronously on each machine start. An empty
//! set means "nothing to add" and is never an error.

use crate::config::DriverConfig;
use std::collections::BTreeSet;

/// Supplies extra `KEY=VALUE` environment variables.
pub trait EnvVariablesProvider: Send + Sync {
    fn get(&self) -> BTreeSet<String>;
}

/// Supplies extra `host:container[:mode]` bind mounts.
pub trait VolumesProvider: Send + Sync {
    fn get(&self) -> BTreeSet<String>;
}

/// Supplies extra `host:ip` entries for the container's hosts file.
pub trait HostsProvider: Send + Sync {
    fn get(&self) -> BTreeSet<String>;
}

/// Split a comma-separated list, dropping blank entries.
pub fn parse_list(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Proxy settings of the host, passed on to machines.
#[derive(Debug, Clone, Default)]
pub struct HttpProxyEnvProvider {
    http_proxy: Option<String>,
    https_proxy: Option<String>,
    no_proxy: Option<String>,
}

impl HttpProxyEnvProvider {
    pub fn new(
        http_proxy: Option<String>,
        https_proxy: Option<String>,
        no_proxy: Option<String>,
    ) -> Self {
        Self {
            http_proxy,
            https_proxy,
            no_proxy,
        }
    }

    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(
            config.http_proxy.clone(),
            config.https_proxy.clone(),
            config.no_proxy.clone(),
        )
    }
}

impl EnvVariablesProvider for HttpProxyEnvProvider {
    fn get(&self) -> BTreeSet<String> {
        [
            ("http_proxy", &self.http_proxy),
            ("https_proxy", &self.https_proxy),
            ("no_proxy", &self.no_proxy),
        ]
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value.as_deref()?.trim();
            (!value.is_empty()).then(|| format!("{key}={value}"))
        })
        .collect()
    }
}

/// Bind mounts configured for every machine.
#[derive(Debug, Clone, Default)]
pub struct ExtraVolumesProvider {
    volumes: BTreeSet<String>,
}

impl ExtraVolumesProvider {
    /// Parse a `host:container[,host:container...]` list.
    pub fn parse(raw: Option<&str>) -> Self {
        Self {
            volumes: parse_list(raw),
        }
    }
}

impl VolumesProvider for ExtraVolumesProvider {
    fn get(&self) -> BTreeSet<String> {
        self.volumes.clone()
    }
}

/// Host entries configured for every machine.
#[derive(Debug, Clone, Default)]
pub struct ExtraHostsProvider {
    hosts: BTreeSet<String>,
}

impl ExtraHostsProvider {
    /// Parse a `host:ip[,host:ip...]` list.
    pub fn parse(raw: Option<&str>) -> Self {
        Self {
            hosts: parse_list(raw),
        }
    }
}

impl HostsProvider for ExtraHostsProvider {
    fn get(&self) -> BTreeSet<String> {
        self.hosts.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert!(parse_list(None).is_empty());
        assert!(parse_list(Some("")).is_empty());
        assert!(parse_list(Some(" , ,")).is_empty());

        let items = parse_list(Some("/a:/b, /c:/d:ro,"));
        assert_eq!(
            items.into_iter().collect::<Vec<_>>(),
            vec!["/a:/b".to_string(), "/c:/d:ro".to_string()]
        );
    }

    #[test]
    fn test_proxy_provider_skips_empty_values() {
        let provider = HttpProxyEnvProvider::new(
            Some("http://proxy:3128".into()),
            Some("  ".into()),
            None,
        );
        assert_eq!(
            provider.get().into_iter().collect::<Vec<_>>(),
            vec!["http_proxy=http://proxy:3128".to_string()]
        );
        assert!(HttpProxyEnvProvider::default().get().is_empty());
    }

    #[test]
    fn test_proxy_provider_from_config() {
        let config = DriverConfig::builder()
            .https_proxy("http://secure:3128")
            .no_proxy("localhost")
            .build()
            .unwrap();
        let vars = HttpProxyEnvProvider::from_config(&config).get();
        assert!(vars.contains("https_proxy=http://secure:3128"));
        assert!(vars.contains("no_proxy=localhost"));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_volume_and_host_providers() {
        assert!(ExtraVolumesProvider::parse(None).get().is_empty());
        assert_eq!(ExtraVolumesProvider::parse(Some("/x:/y")).get().len(), 1);
        let hosts = ExtraHostsProvider::parse(Some("db.local:10.0.0.2,cache.local:10.0.0.3")).get();
        assert!(hosts.contains("db.local:10.0.0.2"));
        assert_eq!(hosts.len(), 2);
    }
}
