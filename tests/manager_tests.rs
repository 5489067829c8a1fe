mod common;

use common::{Script, ScriptedService, eventually, names, registry_of};
use serde_json::{Map, Value, json};
use service_host::config::ServiceConfig;
use service_host::error::{Error, Result};
use service_host::service::{
    HealthStatus, ManagerSettings, ServiceManager, ServiceState, ShutdownOutcome, Trigger,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn build(
    services: &[(&str, Arc<ScriptedService>)],
    enabled: &[&str],
) -> Result<ServiceManager> {
    let registry = registry_of(services);
    ServiceManager::build(
        &registry,
        &names(enabled),
        &BTreeMap::new(),
        ManagerSettings {
            health_check_timeout: Duration::from_millis(100),
        },
    )
    .await
}

#[tokio::test]
async fn test_build_registers_and_configures_in_order() -> Result<()> {
    let a = ScriptedService::new();
    let b = ScriptedService::new();
    let manager = build(&[("a", a.clone()), ("b", b.clone())], &["b", "a"]).await?;

    assert_eq!(manager.names(), vec!["b", "a"]);
    assert_eq!(ScriptedService::count(&a.configures), 1);
    assert_eq!(ScriptedService::count(&b.configures), 1);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.state_of("a"), Some(ServiceState::Initializing));
    assert_eq!(snapshot.state_of("b"), Some(ServiceState::Initializing));
    Ok(())
}

#[tokio::test]
async fn test_unknown_service_aborts_build() {
    let a = ScriptedService::new();
    let err = build(&[("a", a.clone())], &["a", "ghost", "phantom"])
        .await
        .unwrap_err();

    match err {
        Error::UnknownService(unknown) => assert_eq!(unknown, vec!["ghost", "phantom"]),
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(ScriptedService::count(&a.configures), 0);
}

#[tokio::test]
async fn test_bad_options_abort_build() {
    let a = ScriptedService::new();
    let b = ScriptedService::new();
    let registry = registry_of(&[("a", a.clone()), ("b", b.clone())]);

    let mut services = BTreeMap::new();
    let mut options = Map::new();
    options.insert("retries".to_string(), json!("many"));
    services.insert(
        "b".to_string(),
        ServiceConfig {
            enabled: true,
            metadata: Map::new(),
            options,
        },
    );

    let err = ServiceManager::build(
        &registry,
        &names(&["a", "b"]),
        &services,
        ManagerSettings::default(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Configuration { ref service, .. } if service == "b"));
    assert!(err.is_fatal());
    assert_eq!(ScriptedService::count(&a.configures), 0);
}

#[tokio::test]
async fn test_configure_failure_aborts_build() {
    let a = ScriptedService::with(Script {
        configure_error: Some("bucket missing".to_string()),
        ..Default::default()
    });
    let err = build(&[("a", a)], &["a"]).await.unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    assert!(err.to_string().contains("bucket missing"));
}

#[tokio::test]
async fn test_options_get_defaults() -> Result<()> {
    let a = ScriptedService::new();
    let _manager = build(&[("a", a.clone())], &["a"]).await?;

    let options = a.last_options.lock().unwrap().clone().unwrap();
    assert_eq!(options.get_i64("retries"), Some(1));
    assert!(options.get("label").is_none());
    Ok(())
}

#[tokio::test]
async fn test_start_all_isolates_failures() -> Result<()> {
    let bad = ScriptedService::with(Script {
        start_error: Some("port in use".to_string()),
        ..Default::default()
    });
    let good = ScriptedService::new();
    let manager = build(&[("bad", bad), ("good", good)], &["bad", "good"]).await?;

    let snapshot = manager.start_all().await;

    assert_eq!(snapshot.state_of("good"), Some(ServiceState::Running));
    assert_eq!(snapshot.state_of("bad"), Some(ServiceState::Error));

    let error = snapshot.services["bad"].last_error.clone().unwrap();
    assert_eq!(error.trigger, Trigger::StartFailed);
    assert!(error.message.contains("port in use"));
    assert!(snapshot.services["good"].started_at.is_some());
    Ok(())
}

#[tokio::test]
async fn test_start_all_runs_concurrently() -> Result<()> {
    let slow = Script {
        start_delay: Duration::from_millis(300),
        ..Default::default()
    };
    let a = ScriptedService::with(slow.clone());
    let b = ScriptedService::with(slow.clone());
    let c = ScriptedService::with(slow);
    let manager = build(&[("a", a), ("b", b), ("c", c)], &["a", "b", "c"]).await?;

    let started = Instant::now();
    let snapshot = manager.start_all().await;

    assert!(started.elapsed() < Duration::from_millis(800));
    assert_eq!(snapshot.count_in(ServiceState::Running), 3);
    Ok(())
}

#[tokio::test]
async fn test_start_panic_is_recorded_as_error() -> Result<()> {
    let panicky = ScriptedService::with(Script {
        start_panics: true,
        ..Default::default()
    });
    let calm = ScriptedService::new();
    let manager = build(&[("panicky", panicky), ("calm", calm)], &["panicky", "calm"]).await?;

    let snapshot = manager.start_all().await;

    assert_eq!(snapshot.state_of("panicky"), Some(ServiceState::Error));
    assert_eq!(snapshot.state_of("calm"), Some(ServiceState::Running));
    Ok(())
}

#[tokio::test]
async fn test_invalid_transition_leaves_state() -> Result<()> {
    let a = ScriptedService::new();
    let manager = build(&[("a", a.clone())], &["a"]).await?;
    manager.start_all().await;

    let err = manager.start("a").await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: ServiceState::Running,
            trigger: Trigger::Start,
            ..
        }
    ));
    assert_eq!(manager.snapshot().state_of("a"), Some(ServiceState::Running));

    let err = manager.retry("a").await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(ScriptedService::count(&a.starts), 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_then_start_again() -> Result<()> {
    let a = ScriptedService::new();
    let manager = build(&[("a", a.clone())], &["a"]).await?;
    manager.start_all().await;

    assert_eq!(manager.stop("a").await?, ServiceState::Stopped);
    assert!(manager.snapshot().services["a"].stopped_at.is_some());

    // Stopping again is a no-op
    assert_eq!(manager.stop("a").await?, ServiceState::Stopped);
    assert_eq!(ScriptedService::count(&a.stops), 1);

    assert_eq!(manager.start("a").await?, ServiceState::Running);
    assert_eq!(ScriptedService::count(&a.starts), 2);
    Ok(())
}

#[tokio::test]
async fn test_stop_failure_moves_to_error() -> Result<()> {
    let a = ScriptedService::with(Script {
        stop_error: Some("flush failed".to_string()),
        ..Default::default()
    });
    let manager = build(&[("a", a)], &["a"]).await?;
    manager.start_all().await;

    let err = manager.stop("a").await.unwrap_err();
    assert!(matches!(err, Error::ServiceStop { .. }));

    let snapshot = manager.instance_snapshot("a")?;
    assert_eq!(snapshot.state, ServiceState::Error);
    assert_eq!(snapshot.last_error.unwrap().trigger, Trigger::StopFailed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_are_serialized() -> Result<()> {
    let a = ScriptedService::with(Script {
        start_delay: Duration::from_millis(100),
        stop_delay: Duration::from_millis(100),
        ..Default::default()
    });
    let manager = Arc::new(build(&[("a", a.clone())], &["a"]).await?);
    manager.start_all().await;
    manager.stop("a").await?;

    let handles = (0..4)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                if i % 2 == 0 {
                    manager.start("a").await
                } else {
                    manager.stop("a").await
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        let _ = handle.await.unwrap();
    }

    assert_eq!(ScriptedService::count(&a.max_overlap), 1);
    let state = manager.snapshot().state_of("a").unwrap();
    assert!(matches!(state, ServiceState::Running | ServiceState::Stopped));
    Ok(())
}

#[tokio::test]
async fn test_snapshot_does_not_wait_for_transition() -> Result<()> {
    let a = ScriptedService::with(Script {
        start_delay: Duration::from_millis(500),
        ..Default::default()
    });
    let manager = Arc::new(build(&[("a", a)], &["a"]).await?);

    let starter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start("a").await })
    };

    assert!(
        eventually(Duration::from_millis(300), || {
            manager.snapshot().state_of("a") == Some(ServiceState::Starting)
        })
        .await
    );

    let started = Instant::now();
    let health = manager.health("a").await?;
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(health.health.status, HealthStatus::Degraded);

    assert_eq!(starter.await.unwrap()?, ServiceState::Running);
    Ok(())
}

#[tokio::test]
async fn test_snapshots_during_start_all_are_complete() -> Result<()> {
    let slow = ScriptedService::with(Script {
        start_delay: Duration::from_millis(400),
        ..Default::default()
    });
    let failing = ScriptedService::with(Script {
        start_delay: Duration::from_millis(100),
        start_error: Some("bad credentials".to_string()),
        ..Default::default()
    });
    let manager = Arc::new(build(&[("slow", slow), ("failing", failing)], &["slow", "failing"]).await?);

    let starter = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.start_all().await })
    };

    let mut polls = 0;
    while !starter.is_finished() {
        let asked = Instant::now();
        let snapshot = manager.snapshot();
        assert!(asked.elapsed() < Duration::from_millis(50));

        assert_eq!(snapshot.services.len(), 2);
        for name in ["slow", "failing"] {
            let state = snapshot.state_of(name).unwrap();
            assert!(
                matches!(
                    state,
                    ServiceState::Initializing
                        | ServiceState::Starting
                        | ServiceState::Running
                        | ServiceState::Error
                ),
                "{} was {} during start_all",
                name,
                state
            );
        }
        polls += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(polls >= 5);

    let finished = starter.await.unwrap();
    assert_eq!(finished.state_of("slow"), Some(ServiceState::Running));
    assert_eq!(finished.state_of("failing"), Some(ServiceState::Error));
    Ok(())
}

#[tokio::test]
async fn test_retry_recovers_from_error() -> Result<()> {
    let a = ScriptedService::with(Script {
        start_error: Some("not yet".to_string()),
        ..Default::default()
    });
    let manager = build(&[("a", a.clone())], &["a"]).await?;
    manager.start_all().await;
    assert_eq!(manager.snapshot().state_of("a"), Some(ServiceState::Error));

    a.update(|s| s.start_error = None);
    assert_eq!(manager.retry("a").await?, ServiceState::Running);

    assert_eq!(ScriptedService::count(&a.configures), 2);
    assert!(manager.snapshot().services["a"].last_error.is_none());
    Ok(())
}

#[tokio::test]
async fn test_retry_with_failing_configure_stays_in_error() -> Result<()> {
    let a = ScriptedService::with(Script {
        start_error: Some("boom".to_string()),
        ..Default::default()
    });
    let manager = build(&[("a", a.clone())], &["a"]).await?;
    manager.start_all().await;

    a.update(|s| s.configure_error = Some("still broken".to_string()));
    let err = manager.retry("a").await.unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));

    let snapshot = manager.instance_snapshot("a")?;
    assert_eq!(snapshot.state, ServiceState::Error);
    assert_eq!(snapshot.last_error.unwrap().trigger, Trigger::Fault);
    Ok(())
}

#[tokio::test]
async fn test_report_fault_and_restart() -> Result<()> {
    let a = ScriptedService::new();
    let manager = build(&[("a", a.clone())], &["a"]).await?;
    manager.start_all().await;

    assert_eq!(manager.report_fault("a", "lost connection").await?, ServiceState::Error);
    assert_eq!(manager.restart("a").await?, ServiceState::Running);

    assert_eq!(manager.restart("a").await?, ServiceState::Running);
    assert_eq!(ScriptedService::count(&a.stops), 1);
    assert_eq!(ScriptedService::count(&a.starts), 3);
    Ok(())
}

#[tokio::test]
async fn test_stop_all_respects_grace_period() -> Result<()> {
    let stuck = ScriptedService::with(Script {
        stop_delay: Duration::from_millis(400),
        ..Default::default()
    });
    let quick = ScriptedService::new();
    let manager = build(&[("stuck", stuck), ("quick", quick)], &["stuck", "quick"]).await?;
    manager.start_all().await;

    let started = Instant::now();
    let report = manager.stop_all(Duration::from_millis(100)).await;
    assert!(started.elapsed() < Duration::from_millis(350));

    assert_eq!(report.stopped, vec!["quick"]);
    assert_eq!(report.timed_out, vec!["stuck"]);
    assert_eq!(report.outcome(), ShutdownOutcome::TimedOut);

    let snapshot = manager.instance_snapshot("stuck")?;
    assert_eq!(snapshot.state, ServiceState::Error);
    assert!(snapshot.last_error.unwrap().message.contains("timed out"));

    // The late completion of the abandoned stop is discarded
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(manager.snapshot().state_of("stuck"), Some(ServiceState::Error));
    Ok(())
}

#[tokio::test]
async fn test_stop_all_reports_failures() -> Result<()> {
    let failing = ScriptedService::with(Script {
        stop_error: Some("disk full".to_string()),
        ..Default::default()
    });
    let fine = ScriptedService::new();
    let manager = build(&[("failing", failing), ("fine", fine)], &["failing", "fine"]).await?;
    manager.start_all().await;

    let report = manager.stop_all(Duration::from_secs(2)).await;

    assert_eq!(report.stopped, vec!["fine"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].service, "failing");
    assert_eq!(report.outcome(), ShutdownOutcome::Degraded);
    assert_eq!(report.outcome().exit_code(false), 0);
    assert_eq!(report.outcome().exit_code(true), 1);
    Ok(())
}

#[tokio::test]
async fn test_stop_all_skips_services_not_running() -> Result<()> {
    let a = ScriptedService::with(Script {
        start_error: Some("nope".to_string()),
        ..Default::default()
    });
    let manager = build(&[("a", a.clone())], &["a"]).await?;
    manager.start_all().await;

    let report = manager.stop_all(Duration::from_secs(1)).await;
    assert!(report.stopped.is_empty());
    assert_eq!(report.outcome(), ShutdownOutcome::Clean);
    assert_eq!(ScriptedService::count(&a.stops), 0);
    Ok(())
}

#[tokio::test]
async fn test_health_checks_are_bounded() -> Result<()> {
    let slow = ScriptedService::with(Script {
        health_delay: Duration::from_secs(5),
        ..Default::default()
    });
    let sick = ScriptedService::with(Script {
        health: HealthStatus::Unhealthy,
        ..Default::default()
    });
    let broken = ScriptedService::with(Script {
        start_error: Some("nope".to_string()),
        ..Default::default()
    });
    let manager = build(
        &[("slow", slow), ("sick", sick), ("broken", broken)],
        &["slow", "sick", "broken"],
    )
    .await?;
    manager.start_all().await;

    let started = Instant::now();
    let health = manager.health_all().await;
    assert!(started.elapsed() < Duration::from_secs(1));

    assert_eq!(health["slow"].health.status, HealthStatus::Degraded);
    assert!(health["slow"].health.detail.as_deref().unwrap().contains("timed out"));
    assert_eq!(health["sick"].health.status, HealthStatus::Unhealthy);
    assert_eq!(health["broken"].health.status, HealthStatus::Unhealthy);
    assert_eq!(health["broken"].state, ServiceState::Error);
    Ok(())
}

#[tokio::test]
async fn test_dispatch_routing() -> Result<()> {
    let a = ScriptedService::new();
    let manager = build(&[("a", a)], &["a"]).await?;

    let err = manager.dispatch("a", "echo", Value::Null).await.unwrap_err();
    assert!(matches!(
        err,
        Error::ServiceUnavailable {
            state: ServiceState::Initializing,
            ..
        }
    ));

    manager.start_all().await;

    let response = manager.dispatch("a", "echo", json!({"x": 1})).await?;
    assert_eq!(response, json!({"echo": {"x": 1}}));

    let err = manager.dispatch("a", "launch", Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::UnknownOperation { ref service, .. } if service == "a"));

    let err = manager.dispatch("nobody", "echo", Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::ServiceNotFound(_)));

    // An operation failing does not change the service state
    assert!(manager.dispatch("a", "fail", Value::Null).await.is_err());
    assert_eq!(manager.snapshot().state_of("a"), Some(ServiceState::Running));
    Ok(())
}

#[tokio::test]
async fn test_lifecycle_events_follow_transitions() -> Result<()> {
    let a = ScriptedService::new();
    let manager = build(&[("a", a)], &["a"]).await?;
    let mut events = manager.lifecycle().subscribe();

    manager.start_all().await;
    manager.stop("a").await?;

    let mut triggers = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.service, "a");
        triggers.push(event.trigger);
    }
    assert_eq!(
        triggers,
        vec![
            Trigger::Start,
            Trigger::StartSucceeded,
            Trigger::Stop,
            Trigger::StopCompleted
        ]
    );

    // History is newest first and includes registration
    let history = manager.lifecycle().service_events("a", None);
    assert_eq!(history.first().unwrap().to, ServiceState::Stopped);
    assert_eq!(history.last().unwrap().trigger, Trigger::Register);
    Ok(())
}

#[tokio::test]
async fn test_error_is_not_terminal() -> Result<()> {
    let a = ScriptedService::with(Script {
        start_error: Some("first".to_string()),
        ..Default::default()
    });
    let manager = build(&[("a", a.clone())], &["a"]).await?;

    for _ in 0..3 {
        manager.start_all().await;
        assert_eq!(manager.snapshot().state_of("a"), Some(ServiceState::Error));
        let err = manager.retry("a").await.unwrap_err();
        assert!(matches!(err, Error::ServiceStart { .. }));
    }

    a.update(|s| s.start_error = None);
    assert_eq!(manager.retry("a").await?, ServiceState::Running);
    Ok(())
}
