//! End-to-end engine behaviour against the mock runtime.

use corral_core::{
    CoreError, EngineConfig, EnvironmentDescriptor, EnvironmentEngine, EnvironmentEvent,
    EnvironmentStatus, HandlerRegistry, MachineConfig, MachineDriver, MachineState, Outcome,
    ValidationError,
};
use corral_runtime::{MockRuntime, RuntimeCall};
use std::sync::Arc;
use std::time::Duration;

fn engine_with(mock: &Arc<MockRuntime>, config: EngineConfig) -> EnvironmentEngine {
    let driver = MachineDriver::new(mock.clone());
    EnvironmentEngine::new(config, HandlerRegistry::native(driver))
}

fn engine(mock: &Arc<MockRuntime>) -> EnvironmentEngine {
    engine_with(mock, EngineConfig::default())
}

fn machine(name: &str, deps: &[&str]) -> MachineConfig {
    deps.iter()
        .fold(MachineConfig::builder(name, "alpine:3"), |b, dep| b.depends_on(*dep))
        .build()
}

/// db <- app <- web
fn three_tier() -> EnvironmentDescriptor {
    EnvironmentDescriptor::new(
        "ws",
        vec![
            machine("web", &["app"]),
            machine("app", &["db"]),
            machine("db", &[]),
        ],
    )
}

fn independent(names: &[&str]) -> EnvironmentDescriptor {
    EnvironmentDescriptor::new("ws", names.iter().map(|n| machine(n, &[])).collect())
}

#[tokio::test]
async fn test_all_machines_start_in_dependency_order() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);

    let snapshot = engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(snapshot.status, EnvironmentStatus::Running);
    assert!(snapshot.all_machines(MachineState::Running));
    assert!(snapshot.failure.is_none());
    assert_eq!(mock.machines_called(RuntimeCall::Start), vec!["db", "app", "web"]);
    assert_eq!(mock.running_count(), 3);

    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::Running);
    assert!(state.machines.iter().all(|m| m.container_id.is_some()));
}

#[tokio::test]
async fn test_failed_machine_rolls_back_environment() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_start("app");
    let engine = engine(&mock);

    let err = engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(&err, CoreError::Start { machine, .. } if machine == "app"));

    // db was running and got destroyed, web never started.
    assert!(mock.machines_called(RuntimeCall::Remove).contains(&"db".to_string()));
    assert!(!mock.machines_called(RuntimeCall::Create).contains(&"web".to_string()));
    assert_eq!(mock.container_count(), 0);

    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::Stopped);
    assert_eq!(state.machine_state("db"), Some(MachineState::Stopped));
    assert_eq!(state.machine_state("app"), Some(MachineState::Failed));
    assert_eq!(state.machine_state("web"), Some(MachineState::Created));
    assert_eq!(
        state.failure.as_ref().and_then(|f| f.machine.as_deref()),
        Some("app")
    );
}

#[tokio::test]
async fn test_first_failure_in_name_order_is_reported() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_start("y").fail_start("x");
    let engine = engine(&mock);

    let err = engine
        .start_environment(independent(&["x", "y", "z"]))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Start { machine, .. } if machine == "x"));
    assert_eq!(mock.container_count(), 0);
}

#[tokio::test]
async fn test_rollback_continues_past_destroy_failures() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_remove("x").fail_start("z");
    let engine = engine(&mock);

    let err = engine
        .start_environment(EnvironmentDescriptor::new(
            "ws",
            vec![machine("x", &[]), machine("y", &[]), machine("z", &["x", "y"])],
        ))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Start { machine, .. } if machine == "z"));

    let removed = mock.machines_called(RuntimeCall::Remove);
    assert!(removed.contains(&"x".to_string()));
    assert!(removed.contains(&"y".to_string()));

    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::Stopped);
    assert_eq!(state.machine_state("x"), Some(MachineState::Stopped));
}

#[tokio::test]
async fn test_cycle_rejected_before_any_state() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);

    let err = engine
        .start_environment(EnvironmentDescriptor::new(
            "ws",
            vec![machine("a", &["b"]), machine("b", &["a"])],
        ))
        .await
        .unwrap_err();

    match err {
        CoreError::Cycle(cycle) => assert_eq!(cycle.machines(), ["a", "b"]),
        other => panic!("expected cycle error, got {other:?}"),
    }
    assert!(engine.environment_state("ws").await.is_none());
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_validation_rejected_before_any_state() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);

    let err = engine
        .start_environment(independent(&["db", "db"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::DuplicateMachine(_))
    ));
    assert!(err.is_caller_error());
    assert!(engine.list_environments().await.is_empty());
}

#[tokio::test]
async fn test_unknown_environment_type() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);

    let err = engine
        .start_environment(independent(&["x"]).with_type("compose"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::UnsupportedEnvironmentType(t) if t == "compose"));

    // Type tags match regardless of case.
    engine
        .start_environment(independent(&["x"]).with_type("Native"))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_single_wave_starts_concurrently() {
    let mock = Arc::new(MockRuntime::new());
    mock.delay_start("x", Duration::from_secs(1))
        .delay_start("y", Duration::from_secs(1));
    let engine = engine(&mock);

    let snapshot = engine
        .start_environment(independent(&["y", "x"]))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(snapshot.status, EnvironmentStatus::Running);
    assert_eq!(mock.peak_concurrent_starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_respected() {
    let mock = Arc::new(MockRuntime::new());
    let names = ["a", "b", "c", "d", "e"];
    for name in names {
        mock.delay_start(name, Duration::from_secs(1));
    }
    let engine = engine_with(
        &mock,
        EngineConfig::builder().max_concurrent_starts(2).build().unwrap(),
    );

    engine
        .start_environment(independent(&names))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(mock.peak_concurrent_starts(), 2);
    assert_eq!(mock.running_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_zero_limit_is_unbounded() {
    let mock = Arc::new(MockRuntime::new());
    let names = ["a", "b", "c", "d", "e"];
    for name in names {
        mock.delay_start(name, Duration::from_secs(1));
    }
    let engine = engine_with(
        &mock,
        EngineConfig::builder().max_concurrent_starts(0).build().unwrap(),
    );

    engine
        .start_environment(independent(&names))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(mock.peak_concurrent_starts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_start_timeout_treated_as_failure() {
    let mock = Arc::new(MockRuntime::new());
    mock.delay_start("app", Duration::from_secs(600));
    let engine = engine_with(
        &mock,
        EngineConfig::builder()
            .start_timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
    );

    let err = engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();

    match err {
        CoreError::Start { machine, source } => {
            assert_eq!(machine, "app");
            assert!(source.is_timeout());
        }
        other => panic!("expected start error, got {other:?}"),
    }
    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::Stopped);
    assert_eq!(mock.container_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_start_rejected() {
    let mock = Arc::new(MockRuntime::new());
    mock.delay_start("db", Duration::from_secs(10));
    let engine = engine(&mock);

    let handle = engine.start_environment(three_tier()).await.unwrap();
    let err = engine.start_environment(three_tier()).await.unwrap_err();
    assert!(matches!(err, CoreError::AlreadyStarting(name) if name == "ws"));

    handle.wait().await.unwrap();

    let err = engine.start_environment(three_tier()).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotRunning {
            status: EnvironmentStatus::Running,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_waits_for_in_flight_start_then_destroys() {
    let mock = Arc::new(MockRuntime::new());
    mock.delay_start("db", Duration::from_secs(10));
    let engine = engine(&mock);

    let handle = engine.start_environment(three_tier()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(engine.cancel_start("ws").await.unwrap());

    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, CoreError::Cancelled(name) if name == "ws"));

    assert_eq!(mock.machines_called(RuntimeCall::Start), vec!["db"]);
    assert_eq!(mock.machines_called(RuntimeCall::Remove), vec!["db"]);
    assert!(!mock.machines_called(RuntimeCall::Create).contains(&"app".to_string()));

    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::Stopped);
    assert_eq!(state.machine_state("db"), Some(MachineState::Stopped));
    assert_eq!(state.machine_state("app"), Some(MachineState::Created));
    assert!(!engine.cancel_start("ws").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_skips_queued_machines() {
    let mock = Arc::new(MockRuntime::new());
    for name in ["a", "b", "c"] {
        mock.delay_start(name, Duration::from_secs(10));
    }
    let engine = engine_with(
        &mock,
        EngineConfig::builder().max_concurrent_starts(1).build().unwrap(),
    );

    let handle = engine
        .start_environment(independent(&["a", "b", "c"]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    handle.cancel();

    assert!(matches!(handle.wait().await, Err(CoreError::Cancelled(_))));
    assert_eq!(mock.machines_called(RuntimeCall::Start).len(), 1);
    assert_eq!(mock.container_count(), 0);
}

#[tokio::test]
async fn test_stop_environment_is_idempotent() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let snapshot = engine.stop_environment("ws").await.unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Stopped);
    assert!(snapshot.all_machines(MachineState::Stopped));
    assert_eq!(mock.container_count(), 0);

    let calls = mock.calls().len();
    let snapshot = engine.stop_environment("ws").await.unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Stopped);
    assert_eq!(mock.calls().len(), calls);
}

#[tokio::test]
async fn test_stop_tears_down_dev_machine_last() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    let env = EnvironmentDescriptor::new(
        "ws",
        vec![
            MachineConfig::builder("a", "alpine").dev().build(),
            machine("b", &[]),
            machine("c", &["b"]),
        ],
    );
    engine.start_environment(env).await.unwrap().wait().await.unwrap();

    engine.stop_environment("ws").await.unwrap();

    let stops = mock.machines_called(RuntimeCall::Stop);
    assert_eq!(stops.len(), 3);
    assert_eq!(stops.last().map(String::as_str), Some("a"));
}

#[tokio::test]
async fn test_stop_ignores_machine_failures() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_stop("db").fail_remove("app");
    let engine = engine(&mock);
    engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let snapshot = engine.stop_environment("ws").await.unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Stopped);
    assert!(snapshot.all_machines(MachineState::Stopped));
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_start_cancels_it() {
    let mock = Arc::new(MockRuntime::new());
    mock.delay_start("db", Duration::from_secs(10));
    let engine = engine(&mock);

    let handle = engine.start_environment(three_tier()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = engine.stop_environment("ws").await.unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Stopped);
    assert!(matches!(handle.wait().await, Err(CoreError::Cancelled(_))));
    assert_eq!(mock.container_count(), 0);
}

#[tokio::test]
async fn test_stop_unknown_environment() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    assert!(matches!(
        engine.stop_environment("nope").await,
        Err(CoreError::UnknownEnvironment(_))
    ));
}

#[tokio::test]
async fn test_restart_machine() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    let snapshot = engine.restart_machine("ws", "app").await.unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Running);
    assert_eq!(snapshot.machine_state("app"), Some(MachineState::Running));

    // Only app was touched; its dependent web keeps running untouched.
    assert_eq!(mock.machines_called(RuntimeCall::Stop), vec!["app"]);
    let starts = mock.machines_called(RuntimeCall::Start);
    assert_eq!(starts.iter().filter(|m| *m == "app").count(), 2);
    assert_eq!(starts.iter().filter(|m| *m == "web").count(), 1);
    assert_eq!(mock.running_count(), 3);
}

#[tokio::test]
async fn test_restart_rejections() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);

    assert!(matches!(
        engine.restart_machine("ws", "app").await,
        Err(CoreError::UnknownEnvironment(_))
    ));

    engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(matches!(
        engine.restart_machine("ws", "cache").await,
        Err(CoreError::UnknownMachine { machine, .. }) if machine == "cache"
    ));

    engine.stop_environment("ws").await.unwrap();
    assert!(matches!(
        engine.restart_machine("ws", "app").await,
        Err(CoreError::NotRunning {
            status: EnvironmentStatus::Stopped,
            ..
        })
    ));
}

#[tokio::test]
async fn test_failed_restart_marks_environment_partially_failed() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    mock.fail_start("app");
    let err = engine.restart_machine("ws", "app").await.unwrap_err();
    assert!(matches!(err, CoreError::Start { .. }));

    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::PartiallyFailed);
    assert_eq!(state.machine_state("app"), Some(MachineState::Failed));

    // A partially failed environment can still be stopped.
    let snapshot = engine.stop_environment("ws").await.unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Stopped);
}

#[tokio::test]
async fn test_events_for_successful_start() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    let mut events = engine.subscribe("ws");
    let mut other = engine.subscribe("other");

    let handle = engine.start_environment(three_tier()).await.unwrap();

    let mut received = Vec::new();
    while let Some(event) = events.recv().await {
        let finished = event.is_finished();
        received.push(event);
        if finished {
            break;
        }
    }
    handle.wait().await.unwrap();

    let finished: Vec<_> = received.iter().filter(|e| e.is_finished()).collect();
    assert_eq!(finished.len(), 1);
    assert!(matches!(
        finished[0],
        EnvironmentEvent::Finished {
            outcome: Outcome::Running,
            ..
        }
    ));

    let db_states: Vec<MachineState> = received
        .iter()
        .filter_map(|e| match e {
            EnvironmentEvent::MachineStateChanged { machine, state, .. } if machine == "db" => {
                Some(*state)
            }
            _ => None,
        })
        .collect();
    assert_eq!(db_states, vec![MachineState::Starting, MachineState::Running]);
    assert_eq!(received.len(), 7);

    // Events of other environments are filtered out.
    let nothing = tokio::time::timeout(Duration::from_millis(50), other.recv()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_events_for_failed_start() {
    let mock = Arc::new(MockRuntime::new());
    mock.fail_start("app");
    let engine = engine(&mock);
    let mut events = engine.subscribe("ws");

    let handle = engine.start_environment(three_tier()).await.unwrap();
    let _ = handle.wait().await;

    let mut outcome = None;
    while let Some(event) = events.recv().await {
        if let EnvironmentEvent::Finished { outcome: o, snapshot } = event {
            assert_eq!(snapshot.status, EnvironmentStatus::Stopped);
            outcome = Some(o);
            break;
        }
    }
    assert!(matches!(
        outcome,
        Some(Outcome::Failed { machine: Some(m), .. }) if m == "app"
    ));
}

#[tokio::test]
async fn test_stop_announces_stopping_and_stopped() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    engine.start_environment(three_tier()).await.unwrap().wait().await.unwrap();

    let mut events = engine.subscribe("ws");
    engine.stop_environment("ws").await.unwrap();

    let mut statuses = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        if let EnvironmentEvent::StatusChanged { snapshot } = event {
            statuses.push(snapshot.status);
        }
    }
    assert_eq!(
        statuses,
        vec![EnvironmentStatus::Stopping, EnvironmentStatus::Stopped]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_create_leaves_nothing_behind() {
    let mock = Arc::new(MockRuntime::new());
    mock.delay_create("app", Duration::from_secs(600));
    let engine = engine_with(
        &mock,
        EngineConfig::builder()
            .start_timeout(Duration::from_secs(5))
            .build()
            .unwrap(),
    );

    let err = engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(&err, CoreError::Start { machine, source } if machine == "app" && source.is_timeout()));
    assert_eq!(mock.container_count(), 0);

    mock.delay_create("app", Duration::ZERO);
    let snapshot = engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(snapshot.status, EnvironmentStatus::Running);
    assert_eq!(mock.running_count(), 3);
}

#[tokio::test]
async fn test_restart_after_stop_starts_new_attempt() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);

    engine.start_environment(three_tier()).await.unwrap().wait().await.unwrap();
    engine.stop_environment("ws").await.unwrap();
    let snapshot = engine
        .start_environment(three_tier())
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(snapshot.status, EnvironmentStatus::Running);
    assert_eq!(mock.running_count(), 3);
}

#[tokio::test]
async fn test_list_environments_sorted() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    for name in ["zeta", "alpha"] {
        engine
            .start_environment(EnvironmentDescriptor::new(name, vec![machine("m", &[])]))
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
    }

    let names: Vec<String> = engine
        .list_environments()
        .await
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[tokio::test]
async fn test_shutdown_stops_everything() {
    let mock = Arc::new(MockRuntime::new());
    let engine = engine(&mock);
    engine.start_environment(three_tier()).await.unwrap().wait().await.unwrap();

    engine.shutdown().await;

    assert!(engine.is_shutting_down());
    assert_eq!(mock.container_count(), 0);
    let state = engine.environment_state("ws").await.unwrap();
    assert_eq!(state.status, EnvironmentStatus::Stopped);
    assert!(matches!(
        engine.start_environment(three_tier()).await,
        Err(CoreError::ShuttingDown)
    ));
}
