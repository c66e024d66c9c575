//! End-to-end supervision through the public API: commands, the reconciler
//! and the notification stream.
use std::sync::Arc;
use std::time::Duration;

use muxkeeper::BroadcastNotifier;
use muxkeeper::Error;
use muxkeeper::ExecutionPhase;
use muxkeeper::LifecycleError;
use muxkeeper::Notification;
use muxkeeper::PauseReason;
use muxkeeper::Reconciler;
use muxkeeper::TracingNotifier;

use crate::common::build_supervisor;
use crate::common::enable_logger;
use crate::common::restartable;
use crate::common::InMemoryMux;

#[tokio::test(start_paused = true)]
async fn test_crash_loop_pauses_and_resume_recovers() {
    enable_logger();
    let mux = InMemoryMux::new();
    let notifier = BroadcastNotifier::new(16);
    let mut notifications = notifier.subscribe();
    let supervisor = build_supervisor(vec![restartable("api", 2)], mux.clone(), Arc::new(notifier));
    let reconciler = Reconciler::new(supervisor.clone());

    supervisor.start("api").await.unwrap();

    mux.exit("api");
    reconciler.poll_once().await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(mux.is_live("api"));

    mux.exit("api");
    reconciler.poll_once().await;
    let state = supervisor.session("api").unwrap().state;
    assert!(state.restart_paused);
    assert_eq!(state.pause_reason, Some(PauseReason::RetriesExhausted));
    assert_eq!(state.phase, ExecutionPhase::Stopped);

    assert_eq!(
        notifications.recv().await.unwrap(),
        Notification::Crashed {
            key: "api".to_string(),
            consecutive_failures: 1,
            restarting: true
        }
    );
    let paused = notifications.recv().await.unwrap();
    assert_eq!(paused.to_string(), "api restart paused: retries exhausted after 2 consecutive failures");

    supervisor.resume("api").await.unwrap();
    let state = supervisor.session("api").unwrap().state;
    assert_eq!(state.phase, ExecutionPhase::Running);
    assert_eq!(state.consecutive_failures, 0);
    assert!(!state.restart_paused);
    assert_eq!(mux.starts("api"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_manual_stop_is_never_undone_by_polling() {
    let mux = InMemoryMux::new();
    let supervisor = build_supervisor(vec![restartable("api", 3)], mux.clone(), Arc::new(TracingNotifier));
    let reconciler = Reconciler::new(supervisor.clone());

    supervisor.start("api").await.unwrap();
    supervisor.stop("api").await.unwrap();
    for _ in 0..5 {
        reconciler.poll_once().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    assert!(!mux.is_live("api"));
    assert_eq!(mux.starts("api"), 1);
    let state = supervisor.session("api").unwrap().state;
    assert_eq!(state.pause_reason, Some(PauseReason::Manual));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_host_pauses_its_sessions_only() {
    let mux = InMemoryMux::new();
    let sessions = vec![restartable("local", 3), restartable("remote", 3).with_host("web-1")];
    let supervisor = build_supervisor(sessions, mux.clone(), Arc::new(TracingNotifier));
    let reconciler = Reconciler::new(supervisor.clone());
    supervisor.start("local").await.unwrap();

    mux.set_unreachable("web-1", true);
    let err = supervisor.start("remote").await.unwrap_err();
    assert!(matches!(err, Error::Lifecycle(LifecycleError::ConnectionFailure(_))));

    let report = reconciler.poll_once().await;
    assert_eq!(report.hosts_failed, 1);
    assert!(supervisor.host_failures().contains_key("web-1"));
    assert_eq!(supervisor.session("local").unwrap().state.phase, ExecutionPhase::Running);

    mux.set_unreachable("web-1", false);
    reconciler.poll_once().await;
    let state = supervisor.session("remote").unwrap().state;
    assert!(state.restart_paused);
    assert_eq!(state.pause_reason, Some(PauseReason::ConnectionFailure));
    assert!(supervisor.host_failures().is_empty());

    supervisor.resume("remote").await.unwrap();
    assert!(mux.is_live("remote"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_reconciler_and_leaves_sessions_running() {
    let mux = InMemoryMux::new();
    let supervisor = build_supervisor(vec![restartable("api", 3)], mux.clone(), Arc::new(TracingNotifier));
    supervisor.start("api").await.unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let reconciler = supervisor.spawn_reconciler(shutdown_rx);

    mux.exit("api");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(supervisor.pending_restart("api"));

    shutdown_tx.send(()).unwrap();
    supervisor.shutdown();
    reconciler.await.unwrap();

    assert!(!supervisor.pending_restart("api"));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!mux.is_live("api"));
    assert!(matches!(
        supervisor.start("api").await,
        Err(Error::Lifecycle(LifecycleError::OperationCancelled(_)))
    ));
}

#[tokio::test]
async fn test_concurrent_commands_on_one_key_are_serialized() {
    let mux = InMemoryMux::new();
    let supervisor = build_supervisor(vec![restartable("api", 3)], mux.clone(), Arc::new(TracingNotifier));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.restart("api").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(supervisor.generation("api"), 8);
    assert!(mux.is_live("api"));
    assert_eq!(supervisor.session("api").unwrap().state.phase, ExecutionPhase::Running);
}
