//! Machine and environment descriptions.
//!
//! Both types are immutable once built: editing a recipe produces a new
//! [`EnvironmentDescriptor`] rather than mutating an existing one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Environment type handled by the stock handler.
pub const NATIVE_ENVIRONMENT_TYPE: &str = "native";

/// Machine type run by the docker-backed driver.
pub const DOCKER_MACHINE_TYPE: &str = "docker";

fn default_machine_type() -> String {
    DOCKER_MACHINE_TYPE.to_string()
}

fn default_environment_type() -> String {
    NATIVE_ENVIRONMENT_TYPE.to_string()
}

/// Where a machine's filesystem comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A pullable image reference.
    Image,
    /// A dockerfile to build.
    Dockerfile,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Image => write!(f, "image"),
            SourceKind::Dockerfile => write!(f, "dockerfile"),
        }
    }
}

/// Opaque recipe or image reference of a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSource {
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Image reference or recipe URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Inline recipe content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl MachineSource {
    /// Source pointing at an image reference.
    pub fn image(reference: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Image,
            location: Some(reference.into()),
            content: None,
        }
    }

    /// Source with an inline dockerfile.
    pub fn dockerfile(content: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Dockerfile,
            location: None,
            content: Some(content.into()),
        }
    }
}

/// Resource limits of a machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    /// Memory bound in MiB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
}

/// A server exposed by a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConf {
    /// Port and transport, e.g. `8080/tcp`.
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl ServerConf {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            protocol: None,
            path: None,
        }
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Immutable description of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfig {
    /// Unique within the environment.
    pub name: String,
    pub source: MachineSource,
    /// At most one machine per environment is the dev machine.
    #[serde(default)]
    pub dev: bool,
    /// Runtime family tag.
    #[serde(rename = "type", default = "default_machine_type")]
    pub machine_type: String,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub servers: Vec<ServerConf>,
    #[serde(default)]
    pub env_variables: BTreeMap<String, String>,
    /// Machines that must be running before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Links in `name` or `name:alias` form; they order startup like `depends_on`.
    #[serde(default)]
    pub machine_links: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Extra ports to expose besides the server ports.
    #[serde(default)]
    pub expose: Vec<String>,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
}

impl MachineConfig {
    /// Start building a machine running `image`.
    pub fn builder(name: impl Into<String>, image: impl Into<String>) -> MachineConfigBuilder {
        MachineConfigBuilder::new(name, MachineSource::image(image))
    }

    /// Names of the machines this one requires, from `depends_on` and
    /// `machine_links`, deduplicated in declaration order.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::with_capacity(self.depends_on.len() + self.machine_links.len());
        let links = self.machine_links.iter().map(|l| link_target(l));
        for dep in self.depends_on.iter().map(String::as_str).chain(links) {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

/// Target machine of a `name:alias` link.
pub fn link_target(link: &str) -> &str {
    link.split_once(':').map_or(link, |(name, _)| name)
}

/// Builder for [`MachineConfig`].
#[derive(Debug, Clone)]
pub struct MachineConfigBuilder {
    config: MachineConfig,
}

impl MachineConfigBuilder {
    pub fn new(name: impl Into<String>, source: MachineSource) -> Self {
        Self {
            config: MachineConfig {
                name: name.into(),
                source,
                dev: false,
                machine_type: default_machine_type(),
                limits: Limits::default(),
                servers: Vec::new(),
                env_variables: BTreeMap::new(),
                depends_on: Vec::new(),
                machine_links: Vec::new(),
                labels: BTreeMap::new(),
                expose: Vec::new(),
                entrypoint: Vec::new(),
                command: Vec::new(),
            },
        }
    }

    pub fn dev(mut self) -> Self {
        self.config.dev = true;
        self
    }

    pub fn machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.config.machine_type = machine_type.into();
        self
    }

    pub fn memory_mb(mut self, mb: u32) -> Self {
        self.config.limits.memory_mb = Some(mb);
        self
    }

    pub fn server(mut self, server: ServerConf) -> Self {
        self.config.servers.push(server);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env_variables.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, machine: impl Into<String>) -> Self {
        self.config.depends_on.push(machine.into());
        self
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.config.machine_links.push(link.into());
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.labels.insert(key.into(), value.into());
        self
    }

    pub fn expose(mut self, port: impl Into<String>) -> Self {
        self.config.expose.push(port.into());
        self
    }

    pub fn command(mut self, command: Vec<String>) -> Self {
        self.config.command = command;
        self
    }

    pub fn build(self) -> MachineConfig {
        self.config
    }
}

/// Named collection of machines making up one workspace environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentDescriptor {
    name: String,
    /// Case-insensitive tag selecting the handler.
    #[serde(rename = "type", default = "default_environment_type")]
    env_type: String,
    /// Recipe the machines were translated from, kept verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw_config: Option<String>,
    machines: Vec<MachineConfig>,
}

impl EnvironmentDescriptor {
    /// Create a descriptor of the native type.
    pub fn new(name: impl Into<String>, machines: Vec<MachineConfig>) -> Self {
        Self {
            name: name.into(),
            env_type: default_environment_type(),
            raw_config: None,
            machines,
        }
    }

    /// Same descriptor with another type tag.
    pub fn with_type(mut self, env_type: impl Into<String>) -> Self {
        self.env_type = env_type.into();
        self
    }

    /// Same descriptor carrying the raw recipe.
    pub fn with_raw_config(mut self, raw: impl Into<String>) -> Self {
        self.raw_config = Some(raw.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env_type(&self) -> &str {
        &self.env_type
    }

    pub fn raw_config(&self) -> Option<&str> {
        self.raw_config.as_deref()
    }

    /// Machines in declaration order.
    pub fn machines(&self) -> &[MachineConfig] {
        &self.machines
    }

    pub fn machine(&self, name: &str) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn dev_machine(&self) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.dev)
    }

    /// Machines whose dependencies include `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.machines
            .iter()
            .filter(|m| m.dependencies().contains(&name))
            .map(|m| m.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_target() {
        assert_eq!(link_target("db"), "db");
        assert_eq!(link_target("db:database"), "db");
    }

    #[test]
    fn test_dependencies_merge_links() {
        let machine = MachineConfig::builder("web", "nginx")
            .depends_on("app")
            .link("app:backend")
            .link("cache")
            .build();
        assert_eq!(machine.dependencies(), vec!["app", "cache"]);
    }

    #[test]
    fn test_descriptor_lookup() {
        let env = EnvironmentDescriptor::new(
            "ws",
            vec![
                MachineConfig::builder("db", "postgres").build(),
                MachineConfig::builder("app", "tomcat").dev().depends_on("db").build(),
            ],
        );
        assert_eq!(env.env_type(), NATIVE_ENVIRONMENT_TYPE);
        assert_eq!(env.machine("db").map(|m| m.name.as_str()), Some("db"));
        assert!(env.machine("web").is_none());
        assert_eq!(env.dev_machine().map(|m| m.name.as_str()), Some("app"));
        assert_eq!(env.dependents_of("db"), vec!["app"]);
    }

    #[test]
    fn test_descriptor_from_json() {
        let json = r#"{
            "name": "ws",
            "type": "NATIVE",
            "machines": [
                {
                    "name": "db",
                    "source": { "type": "image", "location": "postgres:16" },
                    "limits": { "memoryMb": 512 },
                    "envVariables": { "POSTGRES_PASSWORD": "secret" }
                },
                {
                    "name": "app",
                    "source": { "type": "image", "location": "tomcat:9" },
                    "dev": true,
                    "dependsOn": ["db"],
                    "servers": [{ "port": "8080/tcp", "protocol": "http" }]
                }
            ]
        }"#;
        let env: EnvironmentDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(env.env_type(), "NATIVE");
        assert_eq!(env.machines().len(), 2);

        let db = env.machine("db").unwrap();
        assert_eq!(db.machine_type, DOCKER_MACHINE_TYPE);
        assert_eq!(db.limits.memory_mb, Some(512));
        assert_eq!(db.source.location.as_deref(), Some("postgres:16"));

        let app = env.machine("app").unwrap();
        assert!(app.dev);
        assert_eq!(app.depends_on, vec!["db"]);
        assert_eq!(app.servers[0].protocol.as_deref(), Some("http"));
    }
}
