//! Environment engine: drives environments through their lifecycle.
//!
//! # Starting
//!
//! `start_environment` validates and plans the descriptor synchronously, then
//! hands the plan to a background task. The task starts the plan wave by
//! wave; machines of one wave start concurrently, bounded per environment by
//! [`EngineConfig::max_concurrent_starts`]. A wave is fully joined before the
//! next one begins.
//!
//! When a machine fails, or the start is cancelled, no further wave is
//! launched and every machine that reached `Running` is destroyed. Rollback
//! is best-effort: destroy failures are logged and the environment still
//! ends `Stopped`.
//!
//! # Observing
//!
//! Readers get immutable [`EnvironmentSnapshot`]s, either on demand or
//! through a [`Subscription`] carrying a snapshot with every machine
//! transition and one `Finished` event per start attempt. Stopping an
//! environment sends a `StatusChanged` event on entering `Stopping` and
//! again on reaching `Stopped`.
//!
//! # Example
//!
//! ```ignore
//! use corral_core::{EnvironmentEngine, EngineConfig, HandlerRegistry, MachineDriver};
//! use corral_runtime::DockerCli;
//!
//! let driver = MachineDriver::new(Arc::new(DockerCli::new()));
//! let engine = EnvironmentEngine::new(EngineConfig::default(), HandlerRegistry::native(driver));
//!
//! let handle = engine.start_environment(descriptor).await?;
//! let snapshot = handle.wait().await?;
//!
//! engine.stop_environment(&snapshot.name).await?;
//! ```

use crate::config::EngineConfig;
use crate::driver::{DriverError, EnvContext, MachineDriver, MachineHandle};
use crate::error::{CoreError, Result};
use crate::events::{EnvironmentEvent, Outcome, Subscription};
use crate::handler::HandlerRegistry;
use crate::model::{EnvironmentDescriptor, MachineConfig};
use crate::resolver::StartPlan;
use crate::state::{
    derive_status, EnvironmentSnapshot, EnvironmentStatus, Failure, MachineSnapshot,
    MachineState, Phase,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, oneshot, watch, Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Per-environment state
// ============================================================================

struct MachineSlot {
    config: MachineConfig,
    state: MachineState,
    handle: Option<MachineHandle>,
}

struct EnvState {
    phase: Phase,
    machines: Vec<MachineSlot>,
    failure: Option<Failure>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EnvState {
    fn slot(&self, machine: &str) -> Option<&MachineSlot> {
        self.machines.iter().find(|m| m.config.name == machine)
    }

    fn slot_mut(&mut self, machine: &str) -> Option<&mut MachineSlot> {
        self.machines.iter_mut().find(|m| m.config.name == machine)
    }
}

/// One start attempt of an environment and everything that follows it.
struct Environment {
    name: String,
    env_type: String,
    driver: Arc<MachineDriver>,
    ctx: EnvContext,
    state: watch::Sender<EnvState>,
    /// Cancels this attempt's start; a child of the engine shutdown token.
    cancel: CancellationToken,
    /// Serializes stop and restart.
    ops: Mutex<()>,
}

impl Environment {
    fn new(
        descriptor: &EnvironmentDescriptor,
        driver: Arc<MachineDriver>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        let machines = descriptor
            .machines()
            .iter()
            .map(|config| MachineSlot {
                config: config.clone(),
                state: MachineState::Created,
                handle: None,
            })
            .collect();
        let (state, _) = watch::channel(EnvState {
            phase: Phase::Starting,
            machines,
            failure: None,
            created_at: now,
            updated_at: now,
        });

        Self {
            name: descriptor.name().to_string(),
            env_type: descriptor.env_type().to_ascii_lowercase(),
            ctx: driver.context(descriptor.name()),
            driver,
            state,
            cancel,
            ops: Mutex::new(()),
        }
    }

    fn snapshot_of(&self, state: &EnvState) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            name: self.name.clone(),
            env_type: self.env_type.clone(),
            status: derive_status(state.phase, state.machines.iter().map(|m| m.state)),
            machines: state
                .machines
                .iter()
                .map(|m| MachineSnapshot {
                    name: m.config.name.clone(),
                    state: m.state,
                    dev: m.config.dev,
                    container_id: m.handle.as_ref().map(|h| h.container().to_string()),
                })
                .collect(),
            failure: state.failure.clone(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot_of(&self.state.borrow())
    }

    fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    fn status(&self) -> EnvironmentStatus {
        let state = self.state.borrow();
        derive_status(state.phase, state.machines.iter().map(|m| m.state))
    }

    fn machine_config(&self, machine: &str) -> Option<MachineConfig> {
        self.state.borrow().slot(machine).map(|m| m.config.clone())
    }

    /// Machines holding a container.
    fn started_machines(&self) -> Vec<(String, MachineHandle)> {
        self.state
            .borrow()
            .machines
            .iter()
            .filter_map(|m| Some((m.config.name.clone(), m.handle.clone()?)))
            .collect()
    }

    /// Apply `f` and return the resulting snapshot.
    fn update(&self, f: impl FnOnce(&mut EnvState)) -> EnvironmentSnapshot {
        let mut snapshot = None;
        self.state.send_modify(|state| {
            f(state);
            state.updated_at = Utc::now();
            snapshot = Some(self.snapshot_of(state));
        });
        snapshot.unwrap_or_else(|| self.snapshot())
    }

    fn set_handle(&self, machine: &str, handle: Option<MachineHandle>) {
        self.update(|state| {
            if let Some(slot) = state.slot_mut(machine) {
                slot.handle = handle;
            }
        });
    }

    fn set_phase(&self, phase: Phase) -> EnvironmentSnapshot {
        self.update(|state| state.phase = phase)
    }

    /// Wait until no start or teardown is in progress.
    async fn settled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| state.phase.is_settled()).await;
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Orchestrates environments of every registered type.
///
/// Cheap to clone; clones share the same environments.
#[derive(Clone)]
pub struct EnvironmentEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    registry: HandlerRegistry,
    environments: RwLock<HashMap<String, Arc<Environment>>>,
    events: broadcast::Sender<EnvironmentEvent>,
    shutdown: CancellationToken,
}

impl EnvironmentEngine {
    /// Create an engine dispatching to the handlers of `registry`.
    pub fn new(config: EngineConfig, registry: HandlerRegistry) -> Self {
        tracing::info!(
            max_concurrent_starts = config.max_concurrent_starts,
            start_timeout_secs = config.start_timeout.as_secs(),
            types = ?registry.types(),
            "Creating environment engine"
        );
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                environments: RwLock::new(HashMap::new()),
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Registered environment types.
    pub fn environment_types(&self) -> Vec<String> {
        self.inner.registry.types()
    }

    /// Start `descriptor` in the background.
    ///
    /// Validation, planning, an unknown type and a conflicting start are
    /// reported by this call, before any state is created. Everything after
    /// that is reported through the returned handle and the event stream.
    pub async fn start_environment(&self, descriptor: EnvironmentDescriptor) -> Result<StartHandle> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }

        let handler = inner
            .registry
            .get(descriptor.env_type())
            .ok_or_else(|| CoreError::UnsupportedEnvironmentType(descriptor.env_type().to_string()))?;
        handler.validate(&descriptor)?;
        let plan = handler.plan(&descriptor)?;

        let name = descriptor.name().to_string();
        let env = {
            let mut environments = inner.environments.write().await;
            if inner.shutdown.is_cancelled() {
                return Err(CoreError::ShuttingDown);
            }
            if let Some(existing) = environments.get(&name) {
                match existing.phase() {
                    Phase::Stopped => {}
                    Phase::Starting => return Err(CoreError::AlreadyStarting(name)),
                    Phase::Running | Phase::Stopping => {
                        return Err(CoreError::NotRunning {
                            status: existing.status(),
                            environment: name,
                        })
                    }
                }
            }
            let env = Arc::new(Environment::new(
                &descriptor,
                handler.driver(),
                inner.shutdown.child_token(),
            ));
            environments.insert(name.clone(), env.clone());
            env
        };

        tracing::info!(
            environment = %name,
            env_type = %env.env_type,
            machines = plan.machine_count(),
            waves = plan.len(),
            "Starting environment"
        );

        let (tx, rx) = oneshot::channel();
        let task_inner = inner.clone();
        let task_env = env.clone();
        tokio::spawn(async move {
            let result = task_inner.run_start(task_env, plan).await;
            let _ = tx.send(result);
        });

        Ok(StartHandle {
            environment: name,
            cancel: env.cancel.clone(),
            result: rx,
        })
    }

    /// Stop every machine of `name`.
    ///
    /// A start in progress is cancelled and rolled back first. Non-dev
    /// machines are torn down concurrently, the dev machine last. Individual
    /// failures are logged; the environment always ends `Stopped`. Stopping
    /// a stopped environment does nothing.
    pub async fn stop_environment(&self, name: &str) -> Result<EnvironmentSnapshot> {
        let env = self
            .inner
            .get(name)
            .await
            .ok_or_else(|| CoreError::UnknownEnvironment(name.to_string()))?;
        self.inner.stop(env).await
    }

    /// Stop and start again one machine of a running environment.
    ///
    /// Machines depending on it are left alone.
    pub async fn restart_machine(&self, name: &str, machine: &str) -> Result<EnvironmentSnapshot> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        let env = inner
            .get(name)
            .await
            .ok_or_else(|| CoreError::UnknownEnvironment(name.to_string()))?;

        let _ops = env.ops.lock().await;
        let status = env.status();
        if status != EnvironmentStatus::Running {
            return Err(CoreError::NotRunning {
                environment: name.to_string(),
                status,
            });
        }
        let handle = {
            let state = env.state.borrow();
            let slot = state.slot(machine).ok_or_else(|| CoreError::UnknownMachine {
                environment: name.to_string(),
                machine: machine.to_string(),
            })?;
            slot.handle.clone().ok_or_else(|| CoreError::NotRunning {
                environment: name.to_string(),
                status,
            })?
        };

        let started = Instant::now();
        tracing::info!(environment = %name, machine, "Restarting machine");

        inner.transition(&env, machine, MachineState::Stopping);
        if let Err(e) = env.driver.stop(&handle, inner.config.stop_timeout).await {
            tracing::warn!(environment = %name, machine, error = %e, "Failed to stop machine for restart");
            inner.transition(&env, machine, MachineState::Failed);
            return Err(CoreError::Stop {
                machine: machine.to_string(),
                source: e,
            });
        }
        inner.transition(&env, machine, MachineState::Stopped);

        inner.transition(&env, machine, MachineState::Starting);
        if let Err(e) = env.driver.resume(&handle, inner.config.start_timeout).await {
            tracing::warn!(environment = %name, machine, error = %e, "Failed to start machine after restart");
            inner.transition(&env, machine, MachineState::Failed);
            return Err(CoreError::Start {
                machine: machine.to_string(),
                source: e,
            });
        }
        let snapshot = inner.transition(&env, machine, MachineState::Running);

        tracing::info!(
            environment = %name,
            machine,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Machine restarted"
        );
        Ok(snapshot)
    }

    /// Cancel the start of `name`. Returns `false` when no start is in progress.
    ///
    /// Queued machines are skipped, in-flight starts are awaited, and the
    /// environment is rolled back.
    pub async fn cancel_start(&self, name: &str) -> Result<bool> {
        let env = self
            .inner
            .get(name)
            .await
            .ok_or_else(|| CoreError::UnknownEnvironment(name.to_string()))?;
        if env.phase() != Phase::Starting || env.cancel.is_cancelled() {
            return Ok(false);
        }
        tracing::info!(environment = %name, "Cancelling environment start");
        env.cancel.cancel();
        Ok(true)
    }

    /// Current snapshot of `name`.
    pub async fn environment_state(&self, name: &str) -> Option<EnvironmentSnapshot> {
        self.inner.get(name).await.map(|env| env.snapshot())
    }

    /// Snapshots of every known environment, sorted by name.
    pub async fn list_environments(&self) -> Vec<EnvironmentSnapshot> {
        let environments = self.inner.environments.read().await;
        let mut snapshots: Vec<EnvironmentSnapshot> =
            environments.values().map(|env| env.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Subscribe to the events of `name`, including future start attempts.
    ///
    /// Subscriptions end once the engine shuts down.
    pub fn subscribe(&self, name: &str) -> Subscription {
        Subscription::new(
            name.to_string(),
            self.inner.events.subscribe(),
            self.inner.shutdown.clone(),
        )
    }

    /// Cancel every start, stop every environment and reject new work.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down environment engine");
        self.inner.shutdown.cancel();

        let environments: Vec<Arc<Environment>> =
            self.inner.environments.read().await.values().cloned().collect();
        let count = environments.len();

        let results = join_all(environments.into_iter().map(|env| {
            let name = env.name.clone();
            async move { (name, self.inner.stop(env).await) }
        }))
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(environment = %name, error = %e, "Failed to stop environment during shutdown");
            }
        }

        tracing::info!(count, "Environment engine shut down");
    }

    /// Whether `shutdown` was called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

impl std::fmt::Debug for EnvironmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentEngine")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

impl EngineInner {
    async fn get(&self, name: &str) -> Option<Arc<Environment>> {
        self.environments.read().await.get(name).cloned()
    }

    fn emit(&self, event: EnvironmentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn transition(&self, env: &Environment, machine: &str, state: MachineState) -> EnvironmentSnapshot {
        let snapshot = env.update(|s| {
            if let Some(slot) = s.slot_mut(machine) {
                slot.state = state;
            }
        });
        tracing::debug!(environment = %env.name, machine, state = %state, "Machine state changed");
        self.emit(EnvironmentEvent::MachineStateChanged {
            snapshot: snapshot.clone(),
            machine: machine.to_string(),
            state,
        });
        snapshot
    }

    /// Set the phase of `env` outside a start attempt and announce it.
    fn change_phase(&self, env: &Environment, phase: Phase) -> EnvironmentSnapshot {
        let snapshot = env.set_phase(phase);
        tracing::debug!(environment = %env.name, status = %snapshot.status, "Environment status changed");
        self.emit(EnvironmentEvent::StatusChanged {
            snapshot: snapshot.clone(),
        });
        snapshot
    }

    // ------------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------------

    async fn run_start(self: Arc<Self>, env: Arc<Environment>, plan: StartPlan) -> Result<EnvironmentSnapshot> {
        let started = Instant::now();
        let limiter = (self.config.max_concurrent_starts > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_concurrent_starts)));
        let mut failure: Option<(String, DriverError)> = None;

        for (index, wave) in plan.waves().iter().enumerate() {
            if env.cancel.is_cancelled() {
                break;
            }
            tracing::debug!(environment = %env.name, wave = index, machines = ?wave, "Starting wave");

            let tasks: Vec<_> = wave
                .iter()
                .map(|machine| {
                    let task = tokio::spawn(self.clone().start_machine(
                        env.clone(),
                        machine.clone(),
                        limiter.clone(),
                    ));
                    (machine.clone(), task)
                })
                .collect();

            // Waves are sorted by name, so the first failure recorded here is
            // the first failing machine in name order.
            for (machine, task) in tasks {
                let result = match task.await {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!(environment = %env.name, machine = %machine, error = %e, "Machine start task aborted");
                        self.transition(&env, &machine, MachineState::Failed);
                        Some(Err(DriverError::Aborted(e.to_string())))
                    }
                };
                if let Some(Err(e)) = result {
                    if failure.is_none() {
                        failure = Some((machine, e));
                    }
                }
            }

            if failure.is_some() {
                break;
            }
        }

        if failure.is_none() && !env.cancel.is_cancelled() {
            let snapshot = env.set_phase(Phase::Running);
            tracing::info!(
                environment = %env.name,
                machines = plan.machine_count(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Environment running"
            );
            self.emit(EnvironmentEvent::Finished {
                snapshot: snapshot.clone(),
                outcome: Outcome::Running,
            });
            return Ok(snapshot);
        }

        let (error, outcome, recorded) = match failure {
            Some((machine, source)) => {
                let reason = source.to_string();
                tracing::warn!(
                    environment = %env.name,
                    machine = %machine,
                    error = %reason,
                    "Environment start failed, rolling back"
                );
                let outcome = Outcome::Failed {
                    machine: Some(machine.clone()),
                    reason: reason.clone(),
                };
                let recorded = Failure {
                    machine: Some(machine.clone()),
                    reason,
                };
                (CoreError::Start { machine, source }, outcome, recorded)
            }
            None => {
                tracing::info!(environment = %env.name, "Environment start cancelled, rolling back");
                env.set_phase(Phase::Stopping);
                let recorded = Failure {
                    machine: None,
                    reason: "start cancelled".to_string(),
                };
                (CoreError::Cancelled(env.name.clone()), Outcome::Cancelled, recorded)
            }
        };
        env.update(|state| state.failure = Some(recorded));

        self.teardown(&env, env.started_machines(), false).await;
        env.driver.release(&env.ctx, self.config.destroy_timeout).await;

        let snapshot = env.set_phase(Phase::Stopped);
        tracing::info!(
            environment = %env.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Environment rolled back"
        );
        self.emit(EnvironmentEvent::Finished { snapshot, outcome });
        Err(error)
    }

    /// Start one machine once a slot is free.
    ///
    /// Returns `None` if the start was cancelled before the machine got a
    /// slot.
    async fn start_machine(
        self: Arc<Self>,
        env: Arc<Environment>,
        machine: String,
        limiter: Option<Arc<Semaphore>>,
    ) -> Option<std::result::Result<(), DriverError>> {
        let _permit = match limiter {
            Some(limiter) => tokio::select! {
                biased;
                _ = env.cancel.cancelled() => None,
                permit = limiter.acquire_owned() => permit.ok(),
            },
            None => None,
        };
        if env.cancel.is_cancelled() {
            tracing::debug!(environment = %env.name, machine = %machine, "Skipping queued machine");
            return None;
        }
        let config = env.machine_config(&machine)?;

        self.transition(&env, &machine, MachineState::Starting);
        match env.driver.start(&config, &env.ctx, self.config.start_timeout).await {
            Ok(handle) => {
                tracing::info!(
                    environment = %env.name,
                    machine = %machine,
                    container = %handle.container().short(),
                    "Machine running"
                );
                env.set_handle(&machine, Some(handle));
                self.transition(&env, &machine, MachineState::Running);
                Some(Ok(()))
            }
            Err(e) => {
                tracing::warn!(environment = %env.name, machine = %machine, error = %e, "Machine failed to start");
                self.transition(&env, &machine, MachineState::Failed);
                Some(Err(e))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    async fn stop(&self, env: Arc<Environment>) -> Result<EnvironmentSnapshot> {
        if env.phase() == Phase::Starting {
            tracing::debug!(environment = %env.name, "Cancelling start before stopping");
            env.cancel.cancel();
        }
        env.settled().await;

        let _ops = env.ops.lock().await;
        if env.phase() == Phase::Stopped {
            tracing::debug!(environment = %env.name, "Environment already stopped");
            return Ok(env.snapshot());
        }

        let started = Instant::now();
        tracing::info!(environment = %env.name, "Stopping environment");
        self.change_phase(&env, Phase::Stopping);

        let (dev, others): (Vec<_>, Vec<_>) = env
            .started_machines()
            .into_iter()
            .partition(|(_, handle)| handle.is_dev());
        self.teardown(&env, others, true).await;
        self.teardown(&env, dev, true).await;

        let leftovers: Vec<String> = env
            .state
            .borrow()
            .machines
            .iter()
            .filter(|m| m.state != MachineState::Stopped)
            .map(|m| m.config.name.clone())
            .collect();
        for machine in leftovers {
            self.transition(&env, &machine, MachineState::Stopped);
        }

        env.driver.release(&env.ctx, self.config.destroy_timeout).await;
        let snapshot = self.change_phase(&env, Phase::Stopped);
        tracing::info!(
            environment = %env.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Environment stopped"
        );
        Ok(snapshot)
    }

    /// Tear down `machines` concurrently. Failures are logged, never returned.
    async fn teardown(&self, env: &Environment, machines: Vec<(String, MachineHandle)>, stop_first: bool) {
        join_all(
            machines
                .into_iter()
                .map(|(machine, handle)| self.teardown_machine(env, machine, handle, stop_first)),
        )
        .await;
    }

    async fn teardown_machine(&self, env: &Environment, machine: String, handle: MachineHandle, stop_first: bool) {
        self.transition(env, &machine, MachineState::Stopping);

        if stop_first {
            if let Err(e) = env.driver.stop(&handle, self.config.stop_timeout).await {
                tracing::warn!(environment = %env.name, machine = %machine, error = %e, "Failed to stop machine, destroying it");
            }
        }
        if let Err(e) = env.driver.destroy(&handle, self.config.destroy_timeout).await {
            tracing::error!(
                environment = %env.name,
                machine = %machine,
                container = %handle.container(),
                error = %e,
                "Failed to destroy machine"
            );
        }

        env.set_handle(&machine, None);
        self.transition(env, &machine, MachineState::Stopped);
    }
}

// ============================================================================
// Start handle
// ============================================================================

/// Handle on a background start attempt.
///
/// Dropping the handle does not cancel the start.
#[derive(Debug)]
pub struct StartHandle {
    environment: String,
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<EnvironmentSnapshot>>,
}

impl StartHandle {
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Request cancellation of the start.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the attempt to finish.
    ///
    /// Returns the `Running` snapshot, or the error that made the start
    /// fail after the environment was rolled back.
    pub async fn wait(self) -> Result<EnvironmentSnapshot> {
        let Self {
            environment,
            result,
            ..
        } = self;
        result.await.map_err(|_| CoreError::Cancelled(environment))?
    }
}
