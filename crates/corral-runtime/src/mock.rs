//! In-memory runtime for tests.
//!
//! Containers are keyed by the `corral.machine` label when present (falling
//! back to the container name) so tests can script behaviour per machine.
//! Like the docker daemon, the mock refuses duplicate container names and
//! accepts a container name wherever an id is expected.

use crate::error::{Result, RuntimeError};
use crate::runtime::{ContainerId, ContainerRuntime, ContainerStatus};
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Label the mock uses to attribute containers to machines.
pub const MACHINE_LABEL: &str = "corral.machine";

/// One recorded runtime call, identified by machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create(String),
    Start(String),
    Stop(String),
    Remove(String),
    Inspect(String),
}

#[derive(Debug)]
struct MockContainer {
    name: String,
    machine: String,
    status: ContainerStatus,
}

#[derive(Debug, Default)]
struct MockState {
    containers: HashMap<ContainerId, MockContainer>,
    calls: Vec<RuntimeCall>,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_remove: HashSet<String>,
    create_delays: HashMap<String, Duration>,
    start_delays: HashMap<String, Duration>,
    remove_delays: HashMap<String, Duration>,
    networks: HashSet<String>,
}

/// Scriptable in-memory [`ContainerRuntime`].
#[derive(Debug, Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
    in_flight_starts: AtomicUsize,
    peak_starts: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `create` fail for `machine`.
    pub fn fail_create(&self, machine: &str) -> &Self {
        self.lock().fail_create.insert(machine.to_string());
        self
    }

    /// Make `start` fail for `machine`.
    pub fn fail_start(&self, machine: &str) -> &Self {
        self.lock().fail_start.insert(machine.to_string());
        self
    }

    /// Make `stop` fail for `machine`.
    pub fn fail_stop(&self, machine: &str) -> &Self {
        self.lock().fail_stop.insert(machine.to_string());
        self
    }

    /// Make `remove` fail for `machine`.
    pub fn fail_remove(&self, machine: &str) -> &Self {
        self.lock().fail_remove.insert(machine.to_string());
        self
    }

    /// Clear every scripted failure for `machine`.
    pub fn heal(&self, machine: &str) -> &Self {
        let mut state = self.lock();
        state.fail_create.remove(machine);
        state.fail_start.remove(machine);
        state.fail_stop.remove(machine);
        state.fail_remove.remove(machine);
        self
    }

    /// Delay `create` for `machine`. The container exists before the delay,
    /// as it does once the daemon has committed it.
    pub fn delay_create(&self, machine: &str, delay: Duration) -> &Self {
        self.lock().create_delays.insert(machine.to_string(), delay);
        self
    }

    /// Delay `start` for `machine`.
    pub fn delay_start(&self, machine: &str, delay: Duration) -> &Self {
        self.lock().start_delays.insert(machine.to_string(), delay);
        self
    }

    /// Delay `remove` for `machine`.
    pub fn delay_remove(&self, machine: &str, delay: Duration) -> &Self {
        self.lock().remove_delays.insert(machine.to_string(), delay);
        self
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.lock().calls.clone()
    }

    /// Machines that received a call of the given kind, in call order.
    ///
    /// `kind` is the variant constructor, e.g. `RuntimeCall::Start`.
    pub fn machines_called(&self, kind: fn(String) -> RuntimeCall) -> Vec<String> {
        let wanted = std::mem::discriminant(&kind(String::new()));
        self.lock()
            .calls
            .iter()
            .filter(|call| std::mem::discriminant(*call) == wanted)
            .map(|call| match call {
                RuntimeCall::Create(m)
                | RuntimeCall::Start(m)
                | RuntimeCall::Stop(m)
                | RuntimeCall::Remove(m)
                | RuntimeCall::Inspect(m) => m.clone(),
            })
            .collect()
    }

    /// Number of containers that currently exist.
    pub fn container_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Number of containers currently running.
    pub fn running_count(&self) -> usize {
        self.lock()
            .containers
            .values()
            .filter(|c| c.status == ContainerStatus::Running)
            .count()
    }

    /// Highest number of `start` calls that were in flight at once.
    pub fn peak_concurrent_starts(&self) -> usize {
        self.peak_starts.load(Ordering::SeqCst)
    }

    /// Networks created and not yet removed.
    pub fn networks(&self) -> Vec<String> {
        let mut nets: Vec<String> = self.lock().networks.iter().cloned().collect();
        nets.sort();
        nets
    }

    /// Key and machine of the container with id or name `id`.
    fn find(&self, id: &ContainerId) -> Result<(ContainerId, String)> {
        let state = self.lock();
        if let Some(container) = state.containers.get(id) {
            return Ok((id.clone(), container.machine.clone()));
        }
        state
            .containers
            .iter()
            .find(|(_, c)| c.name == id.as_str())
            .map(|(key, c)| (key.clone(), c.machine.clone()))
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerId> {
        spec.validate()?;
        let machine = spec
            .labels
            .get(MACHINE_LABEL)
            .cloned()
            .unwrap_or_else(|| spec.name.clone());

        let (id, delay) = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Create(machine.clone()));
            if state.fail_create.contains(&machine) {
                return Err(RuntimeError::Create(format!("mock create failure for {machine}")));
            }
            if state.containers.values().any(|c| c.name == spec.name) {
                return Err(RuntimeError::Create(format!(
                    "Conflict. The container name \"/{}\" is already in use",
                    spec.name
                )));
            }
            let id = ContainerId::new(Uuid::new_v4().simple().to_string());
            let delay = state.create_delays.get(&machine).copied();
            state.containers.insert(
                id.clone(),
                MockContainer {
                    name: spec.name.clone(),
                    machine,
                    status: ContainerStatus::Created,
                },
            );
            (id, delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(id)
    }

    async fn start_container(&self, id: &ContainerId) -> Result<()> {
        let (key, machine) = self.find(id)?;
        let delay = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Start(machine.clone()));
            state.start_delays.get(&machine).copied()
        };

        let now = self.in_flight_starts.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_starts.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight_starts.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.lock();
        if state.fail_start.contains(&machine) {
            return Err(RuntimeError::Start(format!("mock start failure for {machine}")));
        }
        match state.containers.get_mut(&key) {
            Some(container) => {
                container.status = ContainerStatus::Running;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn stop_container(&self, id: &ContainerId) -> Result<()> {
        let (key, machine) = self.find(id)?;
        let mut state = self.lock();
        state.calls.push(RuntimeCall::Stop(machine.clone()));
        if state.fail_stop.contains(&machine) {
            return Err(RuntimeError::Stop(format!("mock stop failure for {machine}")));
        }
        if let Some(container) = state.containers.get_mut(&key) {
            container.status = ContainerStatus::Exited;
        }
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<()> {
        let (key, machine) = self.find(id)?;
        let delay = {
            let mut state = self.lock();
            state.calls.push(RuntimeCall::Remove(machine.clone()));
            state.remove_delays.get(&machine).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.fail_remove.contains(&machine) {
            return Err(RuntimeError::Remove(format!("mock remove failure for {machine}")));
        }
        state.containers.remove(&key);
        Ok(())
    }

    async fn inspect(&self, id: &ContainerId) -> Result<ContainerStatus> {
        let (key, machine) = self.find(id)?;
        let mut state = self.lock();
        let status = state
            .containers
            .get(&key)
            .map(|c| c.status)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        state.calls.push(RuntimeCall::Inspect(machine));
        Ok(status)
    }

    async fn ensure_network(&self, name: &str) -> Result<()> {
        self.lock().networks.insert(name.to_string());
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.lock().networks.remove(name);
        Ok(())
    }
}
