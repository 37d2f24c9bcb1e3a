//! Structural validation of environment descriptors.
//!
//! Checks run in a fixed order and the first violation is reported:
//!
//! 1. the environment has at least one machine
//! 2. machine names are unique
//! 3. at most one machine is marked dev
//! 4. every dependency names a machine of the environment
//! 5. no machine depends on itself
//!
//! followed by per-machine field checks (names, sources, servers and
//! environment variables).

use crate::model::{link_target, EnvironmentDescriptor, MachineConfig};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use thiserror::Error;

static SERVER_PORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9][0-9]*/(?:tcp|udp)$").expect("valid port pattern"));

static SERVER_PROTOCOL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9+.-]*$").expect("valid protocol pattern"));

/// Reason a descriptor was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("environment {0} doesn't contain any machine")]
    NoMachines(String),

    #[error("machine name {0:?} is used by more than one machine")]
    DuplicateMachine(String),

    #[error("only one dev machine is allowed, found: {}", .0.join(", "))]
    MultipleDevMachines(Vec<String>),

    #[error("machine {machine} depends on unknown machine {dependency}")]
    UnknownDependency { machine: String, dependency: String },

    #[error("machine {0} depends on itself")]
    SelfDependency(String),

    #[error("environment name must not be empty")]
    EmptyEnvironmentName,

    #[error("environment contains a machine with an empty name")]
    EmptyMachineName,

    #[error("machine {0} has a source with neither location nor content")]
    MissingSource(String),

    #[error("machine {machine} has a server with invalid port {port:?}")]
    InvalidServerPort { machine: String, port: String },

    #[error("machine {machine} has a server with invalid protocol {protocol:?}")]
    InvalidServerProtocol { machine: String, protocol: String },

    #[error("machine {0} has an environment variable with an empty name")]
    EmptyVariableName(String),

    #[error("machine {machine} has unsupported type {machine_type:?}")]
    UnsupportedMachineType { machine: String, machine_type: String },

    #[error("machine {machine} uses an unsupported {kind} source")]
    UnsupportedSource { machine: String, kind: String },
}

/// Validate `env`, returning the first violation found.
pub fn validate(env: &EnvironmentDescriptor) -> Result<(), ValidationError> {
    let machines = env.machines();

    if machines.is_empty() {
        return Err(ValidationError::NoMachines(env.name().to_string()));
    }

    let mut names = BTreeSet::new();
    for machine in machines {
        if !names.insert(machine.name.as_str()) {
            return Err(ValidationError::DuplicateMachine(machine.name.clone()));
        }
    }

    let dev: Vec<String> = machines
        .iter()
        .filter(|m| m.dev)
        .map(|m| m.name.clone())
        .collect();
    if dev.len() > 1 {
        return Err(ValidationError::MultipleDevMachines(dev));
    }

    for machine in machines {
        let declared = machine.depends_on.iter().map(String::as_str);
        let linked = machine.machine_links.iter().map(|l| link_target(l));
        for dependency in declared.chain(linked) {
            if !names.contains(dependency) {
                return Err(ValidationError::UnknownDependency {
                    machine: machine.name.clone(),
                    dependency: dependency.to_string(),
                });
            }
        }
    }

    if let Some(machine) = machines
        .iter()
        .find(|m| m.dependencies().contains(&m.name.as_str()))
    {
        return Err(ValidationError::SelfDependency(machine.name.clone()));
    }

    if env.name().trim().is_empty() {
        return Err(ValidationError::EmptyEnvironmentName);
    }

    machines.iter().try_for_each(validate_machine)
}

fn validate_machine(machine: &MachineConfig) -> Result<(), ValidationError> {
    if machine.name.trim().is_empty() {
        return Err(ValidationError::EmptyMachineName);
    }

    let has_location = machine.source.location.as_deref().is_some_and(|s| !s.is_empty());
    let has_content = machine.source.content.as_deref().is_some_and(|s| !s.is_empty());
    if !has_location && !has_content {
        return Err(ValidationError::MissingSource(machine.name.clone()));
    }

    for server in &machine.servers {
        if !SERVER_PORT.is_match(&server.port) {
            return Err(ValidationError::InvalidServerPort {
                machine: machine.name.clone(),
                port: server.port.clone(),
            });
        }
        if let Some(protocol) = &server.protocol {
            if !SERVER_PROTOCOL.is_match(protocol) {
                return Err(ValidationError::InvalidServerProtocol {
                    machine: machine.name.clone(),
                    protocol: protocol.clone(),
                });
            }
        }
    }

    if machine.env_variables.keys().any(|k| k.trim().is_empty()) {
        return Err(ValidationError::EmptyVariableName(machine.name.clone()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MachineSource, ServerConf};

    fn machine(name: &str) -> MachineConfig {
        MachineConfig::builder(name, "alpine").build()
    }

    fn env(machines: Vec<MachineConfig>) -> EnvironmentDescriptor {
        EnvironmentDescriptor::new("ws", machines)
    }

    #[test]
    fn test_valid_environment() {
        let env = env(vec![
            machine("db"),
            MachineConfig::builder("app", "tomcat")
                .dev()
                .depends_on("db")
                .server(ServerConf::new("8080/tcp").protocol("http"))
                .build(),
            MachineConfig::builder("web", "nginx").link("app:backend").build(),
        ]);
        assert_eq!(validate(&env), Ok(()));
    }

    #[test]
    fn test_no_machines() {
        assert_eq!(
            validate(&env(vec![])),
            Err(ValidationError::NoMachines("ws".into()))
        );
    }

    #[test]
    fn test_duplicate_names() {
        assert_eq!(
            validate(&env(vec![machine("db"), machine("db")])),
            Err(ValidationError::DuplicateMachine("db".into()))
        );
    }

    #[test]
    fn test_multiple_dev_machines() {
        let env = env(vec![
            MachineConfig::builder("a", "alpine").dev().build(),
            MachineConfig::builder("b", "alpine").dev().build(),
        ]);
        assert_eq!(
            validate(&env),
            Err(ValidationError::MultipleDevMachines(vec!["a".into(), "b".into()]))
        );
    }

    #[test]
    fn test_zero_dev_machines_accepted() {
        assert_eq!(validate(&env(vec![machine("a"), machine("b")])), Ok(()));
    }

    #[test]
    fn test_unknown_dependency() {
        let env = env(vec![MachineConfig::builder("app", "alpine").depends_on("cache").build()]);
        assert_eq!(
            validate(&env),
            Err(ValidationError::UnknownDependency {
                machine: "app".into(),
                dependency: "cache".into(),
            })
        );
    }

    #[test]
    fn test_unknown_link_target() {
        let env = env(vec![
            machine("db"),
            MachineConfig::builder("app", "alpine").link("cache:redis").build(),
        ]);
        assert!(matches!(
            validate(&env),
            Err(ValidationError::UnknownDependency { dependency, .. }) if dependency == "cache"
        ));
    }

    #[test]
    fn test_self_dependency() {
        let env = env(vec![MachineConfig::builder("app", "alpine").link("app:me").build()]);
        assert_eq!(
            validate(&env),
            Err(ValidationError::SelfDependency("app".into()))
        );
    }

    #[test]
    fn test_checks_run_in_order() {
        // Duplicate names are reported before the dev machine count.
        let env = env(vec![
            MachineConfig::builder("a", "alpine").dev().build(),
            MachineConfig::builder("a", "alpine").dev().depends_on("x").build(),
        ]);
        assert_eq!(
            validate(&env),
            Err(ValidationError::DuplicateMachine("a".into()))
        );
    }

    #[test]
    fn test_missing_source() {
        let mut broken = machine("app");
        broken.source = MachineSource {
            location: None,
            ..MachineSource::image("")
        };
        assert_eq!(
            validate(&env(vec![broken])),
            Err(ValidationError::MissingSource("app".into()))
        );
    }

    #[test]
    fn test_server_port_format() {
        for port in ["8080", "0/tcp", "80/http", "/tcp"] {
            let env = env(vec![MachineConfig::builder("app", "alpine")
                .server(ServerConf::new(port))
                .build()]);
            assert!(
                matches!(validate(&env), Err(ValidationError::InvalidServerPort { .. })),
                "{port} should be rejected"
            );
        }

        let env = env(vec![MachineConfig::builder("app", "alpine")
            .server(ServerConf::new("53/udp"))
            .build()]);
        assert_eq!(validate(&env), Ok(()));
    }

    #[test]
    fn test_server_protocol_format() {
        let env = env(vec![MachineConfig::builder("app", "alpine")
            .server(ServerConf::new("8080/tcp").protocol("HTTP"))
            .build()]);
        assert!(matches!(
            validate(&env),
            Err(ValidationError::InvalidServerProtocol { .. })
        ));
    }

    #[test]
    fn test_empty_variable_name() {
        let env = env(vec![MachineConfig::builder("app", "alpine").env(" ", "x").build()]);
        assert_eq!(
            validate(&env),
            Err(ValidationError::EmptyVariableName("app".into()))
        );
    }

    #[test]
    fn test_empty_machine_name() {
        assert_eq!(
            validate(&env(vec![machine("")])),
            Err(ValidationError::EmptyMachineName)
        );
    }
}
