//! Change notifications published by the engine.

use crate::state::{EnvironmentSnapshot, MachineState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Result of one orchestration attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Every machine reached `Running`.
    Running,
    /// A machine failed and the environment was rolled back.
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        machine: Option<String>,
        reason: String,
    },
    /// The start was cancelled and the environment was rolled back.
    Cancelled,
}

/// Notification about an environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EnvironmentEvent {
    /// A machine moved to a new state.
    MachineStateChanged {
        snapshot: EnvironmentSnapshot,
        machine: String,
        state: MachineState,
    },
    /// An orchestration attempt ended. Sent exactly once per attempt.
    Finished {
        snapshot: EnvironmentSnapshot,
        outcome: Outcome,
    },
    /// The environment entered `Stopping` or `Stopped` while being stopped.
    StatusChanged { snapshot: EnvironmentSnapshot },
}

impl EnvironmentEvent {
    /// Name of the environment the event is about.
    pub fn environment(&self) -> &str {
        &self.snapshot().name
    }

    /// Environment state right after the change.
    pub fn snapshot(&self) -> &EnvironmentSnapshot {
        match self {
            EnvironmentEvent::MachineStateChanged { snapshot, .. }
            | EnvironmentEvent::Finished { snapshot, .. }
            | EnvironmentEvent::StatusChanged { snapshot } => snapshot,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, EnvironmentEvent::Finished { .. })
    }
}

/// Stream of events for one environment.
///
/// A subscriber that falls more than the configured capacity behind skips
/// the events it missed. The stream ends when the engine shuts down.
#[derive(Debug)]
pub struct Subscription {
    environment: String,
    receiver: broadcast::Receiver<EnvironmentEvent>,
    closed: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(
        environment: String,
        receiver: broadcast::Receiver<EnvironmentEvent>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            environment,
            receiver,
            closed,
        }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Next event of the environment, or `None` once the engine is shut
    /// down or dropped.
    pub async fn recv(&mut self) -> Option<EnvironmentEvent> {
        loop {
            let received = tokio::select! {
                biased;
                received = self.receiver.recv() => received,
                _ = self.closed.cancelled() => return None,
            };
            match received {
                Ok(event) if event.environment() == self.environment => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        environment = %self.environment,
                        skipped,
                        "Subscriber lagged, events dropped"
                    );
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
