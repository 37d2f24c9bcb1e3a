//! Environment type dispatch.
//!
//! Each environment type tag maps to an [`EnvironmentHandler`] that knows
//! how to validate, plan and drive environments of that type. The registry
//! is filled once at startup and looked up by the descriptor's type tag,
//! ignoring case.

use crate::driver::MachineDriver;
use crate::model::{EnvironmentDescriptor, SourceKind, DOCKER_MACHINE_TYPE, NATIVE_ENVIRONMENT_TYPE};
use crate::resolver::{self, CycleError, StartPlan};
use crate::validator::{self, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;

/// Capabilities needed to run environments of one type.
pub trait EnvironmentHandler: Send + Sync {
    /// Type tag, lower-case.
    fn env_type(&self) -> &str;

    /// Reject descriptors this handler can't run.
    fn validate(&self, env: &EnvironmentDescriptor) -> Result<(), ValidationError>;

    /// Order the machines into start waves.
    fn plan(&self, env: &EnvironmentDescriptor) -> Result<StartPlan, CycleError>;

    /// Driver starting the machines.
    fn driver(&self) -> Arc<MachineDriver>;
}

/// Handler for descriptors carrying an explicit machine list of
/// image-based docker machines.
#[derive(Debug, Clone)]
pub struct NativeEnvironmentHandler {
    driver: Arc<MachineDriver>,
}

impl NativeEnvironmentHandler {
    pub fn new(driver: MachineDriver) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }
}

impl EnvironmentHandler for NativeEnvironmentHandler {
    fn env_type(&self) -> &str {
        NATIVE_ENVIRONMENT_TYPE
    }

    fn validate(&self, env: &EnvironmentDescriptor) -> Result<(), ValidationError> {
        validator::validate(env)?;

        for machine in env.machines() {
            if !machine.machine_type.eq_ignore_ascii_case(DOCKER_MACHINE_TYPE) {
                return Err(ValidationError::UnsupportedMachineType {
                    machine: machine.name.clone(),
                    machine_type: machine.machine_type.clone(),
                });
            }
            if machine.source.kind != SourceKind::Image {
                return Err(ValidationError::UnsupportedSource {
                    machine: machine.name.clone(),
                    kind: machine.source.kind.to_string(),
                });
            }
        }
        Ok(())
    }

    fn plan(&self, env: &EnvironmentDescriptor) -> Result<StartPlan, CycleError> {
        resolver::plan(env.machines())
    }

    fn driver(&self) -> Arc<MachineDriver> {
        self.driver.clone()
    }
}

/// Handlers by environment type tag.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EnvironmentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding only the native handler.
    pub fn native(driver: MachineDriver) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(NativeEnvironmentHandler::new(driver)));
        registry
    }

    /// Register `handler` under its type tag, returning the handler it replaced.
    pub fn register(
        &mut self,
        handler: Arc<dyn EnvironmentHandler>,
    ) -> Option<Arc<dyn EnvironmentHandler>> {
        let tag = handler.env_type().to_ascii_lowercase();
        tracing::debug!(env_type = %tag, "Registering environment handler");
        self.handlers.insert(tag, handler)
    }

    /// Handler for `env_type`, matched case-insensitively.
    pub fn get(&self, env_type: &str) -> Option<Arc<dyn EnvironmentHandler>> {
        self.handlers.get(&env_type.to_ascii_lowercase()).cloned()
    }

    /// Registered type tags, sorted.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MachineConfig, MachineSource};
    use corral_runtime::MockRuntime;

    fn registry() -> HandlerRegistry {
        HandlerRegistry::native(MachineDriver::new(Arc::new(MockRuntime::new())))
    }

    #[test]
    fn test_lookup_ignores_case() {
        let registry = registry();
        assert!(registry.get("native").is_some());
        assert!(registry.get("NATIVE").is_some());
        assert!(registry.get("compose").is_none());
        assert_eq!(registry.types(), vec!["native"]);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = registry();
        let replaced = registry.register(Arc::new(NativeEnvironmentHandler::new(
            MachineDriver::new(Arc::new(MockRuntime::new())),
        )));
        assert!(replaced.is_some());
        assert_eq!(registry.types().len(), 1);
    }

    #[test]
    fn test_native_rejects_unsupported_machines() {
        let handler = registry().get("native").unwrap();

        let env = EnvironmentDescriptor::new(
            "ws",
            vec![MachineConfig::builder("vm", "alpine").machine_type("ssh").build()],
        );
        assert!(matches!(
            handler.validate(&env),
            Err(ValidationError::UnsupportedMachineType { .. })
        ));

        let mut machine = MachineConfig::builder("app", "alpine").build();
        machine.source = MachineSource::dockerfile("FROM alpine");
        let env = EnvironmentDescriptor::new("ws", vec![machine]);
        assert!(matches!(
            handler.validate(&env),
            Err(ValidationError::UnsupportedSource { .. })
        ));
    }

    #[test]
    fn test_native_plans_waves() {
        let handler = registry().get("native").unwrap();
        let env = EnvironmentDescriptor::new(
            "ws",
            vec![
                MachineConfig::builder("app", "tomcat").depends_on("db").build(),
                MachineConfig::builder("db", "postgres").build(),
            ],
        );
        assert_eq!(handler.validate(&env), Ok(()));
        assert_eq!(handler.plan(&env).unwrap().len(), 2);
    }
}
