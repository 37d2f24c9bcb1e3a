//! Dependency ordering of machines into start waves.

use crate::model::MachineConfig;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Machines that can never start because they depend on each other.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("launch order of machines {} can't be evaluated: dependency cycle", .machines.join(", "))]
pub struct CycleError {
    machines: Vec<String>,
}

impl CycleError {
    /// Machines on a cycle, sorted by name.
    pub fn machines(&self) -> &[String] {
        &self.machines
    }
}

/// Ordered start waves.
///
/// Every machine of a wave depends only on machines of earlier waves,
/// and each wave is sorted by machine name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartPlan {
    waves: Vec<Vec<String>>,
}

impl StartPlan {
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    pub fn len(&self) -> usize {
        self.waves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Total number of machines across all waves.
    pub fn machine_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Index of the wave containing `machine`.
    pub fn wave_of(&self, machine: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|m| m == machine))
    }

    /// All machines in start order.
    pub fn start_order(&self) -> impl Iterator<Item = &str> {
        self.waves.iter().flatten().map(String::as_str)
    }
}

/// Group `machines` into start waves.
///
/// Dependencies naming machines outside `machines` are ignored; rejecting
/// those is the validator's job. Wave 0 holds every machine without
/// dependencies, wave N every machine whose dependencies all sit in waves
/// before N.
pub fn plan(machines: &[MachineConfig]) -> Result<StartPlan, CycleError> {
    let known: BTreeSet<&str> = machines.iter().map(|m| m.name.as_str()).collect();

    let mut deps: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for machine in machines {
        let entry = deps.entry(machine.name.as_str()).or_default();
        entry.extend(
            machine
                .dependencies()
                .into_iter()
                .filter(|dep| known.contains(dep)),
        );
    }

    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut remaining: BTreeSet<&str> = known;
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let wave: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|m| deps[m].iter().all(|dep| placed.contains(dep)))
            .collect();

        if wave.is_empty() {
            return Err(cycle_error(&deps, &remaining));
        }

        for machine in &wave {
            remaining.remove(machine);
            placed.insert(machine);
        }
        waves.push(wave.into_iter().map(str::to_string).collect());
    }

    Ok(StartPlan { waves })
}

/// Build the error for a stalled plan.
///
/// Machines that merely wait on a cycle are left out; only those that can
/// reach themselves through unplaced dependencies are reported.
fn cycle_error(deps: &BTreeMap<&str, BTreeSet<&str>>, remaining: &BTreeSet<&str>) -> CycleError {
    let mut machines: Vec<String> = remaining
        .iter()
        .filter(|m| reaches(deps, remaining, m, m))
        .map(|m| m.to_string())
        .collect();

    if machines.is_empty() {
        machines = remaining.iter().map(|m| m.to_string()).collect();
    }

    CycleError { machines }
}

fn reaches(
    deps: &BTreeMap<&str, BTreeSet<&str>>,
    remaining: &BTreeSet<&str>,
    from: &str,
    target: &str,
) -> bool {
    let mut seen = BTreeSet::new();
    let mut stack = vec![from];

    while let Some(node) = stack.pop() {
        let Some(next) = deps.get(node) else {
            continue;
        };
        for dep in next.iter().filter(|d| remaining.contains(*d)) {
            if *dep == target {
                return true;
            }
            if seen.insert(*dep) {
                stack.push(*dep);
            }
        }
    }

    false
}
