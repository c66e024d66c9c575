use tracing_test::traced_test;

use super::*;
use crate::Error;
use crate::SystemError;

fn crashed(restarting: bool) -> Notification {
    Notification::Crashed {
        key: "api".to_string(),
        consecutive_failures: 1,
        restarting,
    }
}

#[test]
fn test_display_distinguishes_restarting_from_terminal_crash() {
    assert_eq!(crashed(true).to_string(), "api crashed, auto-restarting");
    assert_eq!(crashed(false).to_string(), "api crashed (1 consecutive failures)");

    let paused = Notification::RestartPaused {
        key: "api".to_string(),
        reason: PauseReason::RetriesExhausted,
        consecutive_failures: 3,
    };
    assert_eq!(
        paused.to_string(),
        "api restart paused: retries exhausted after 3 consecutive failures"
    );
    assert_eq!(paused.key(), "api");
}

#[test]
#[traced_test]
fn test_tracing_notifier_logs_the_key() {
    TracingNotifier.notify(crashed(true)).unwrap();

    assert!(logs_contain("api crashed, auto-restarting"));
}

#[tokio::test]
async fn test_broadcast_reaches_every_subscriber() {
    let notifier = BroadcastNotifier::new(8);
    let mut first = notifier.subscribe();
    let mut second = notifier.subscribe();
    assert_eq!(notifier.subscriber_count(), 2);

    notifier.notify(crashed(true)).unwrap();

    assert_eq!(first.recv().await.unwrap(), crashed(true));
    assert_eq!(second.recv().await.unwrap(), crashed(true));
}

#[test]
fn test_broadcast_without_subscribers_reports_failure() {
    let notifier = BroadcastNotifier::new(8);

    let err = notifier.notify(crashed(false)).unwrap_err();

    assert!(matches!(err, Error::System(SystemError::SignalSendFailed(_))));
}

#[test]
fn test_mock_notifier_records_calls() {
    let mut mock = MockNotifier::new();
    mock.expect_notify()
        .withf(|n| n.key() == "api")
        .times(1)
        .returning(|_| Ok(()));

    mock.notify(crashed(true)).unwrap();
}
