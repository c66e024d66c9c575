use std::sync::Arc;

use muxkeeper::ExecutionPhase;
use muxkeeper::KeeperConfig;
use muxkeeper::SupervisorBuilder;
use muxkeeper::TracingNotifier;
use serial_test::serial;
use temp_env::with_vars;

use crate::common::InMemoryMux;

const KEEPER_TOML: &str = r#"
[supervisor]
poll_interval_ms = 500
host_query_timeout_ms = 2000

[[sessions]]
key = "web"
command = "python -m http.server 8000"
start_on_launch = true

[sessions.auto_restart]
enabled = true
max_retries = 5
retry_delay_secs = 1

[[sessions]]
key = "batch"
command = "./nightly.sh"
host = "build-01"
"#;

fn load(path: &str) -> KeeperConfig {
    with_vars(
        vec![
            ("MUXKEEPER_CONFIG_PATH", Some(path)),
            ("MUXKEEPER__SUPERVISOR__OUTPUT_LINES", Some("5")),
        ],
        || KeeperConfig::new().and_then(KeeperConfig::validate).unwrap(),
    )
}

#[tokio::test]
#[serial]
async fn test_daemon_boots_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keeper.toml");
    std::fs::write(&path, KEEPER_TOML).unwrap();

    let config = load(path.to_str().unwrap());
    assert_eq!(config.supervisor.poll_interval_ms, 500);
    assert_eq!(config.supervisor.output_lines, 5);

    let mux = InMemoryMux::new();
    let supervisor = SupervisorBuilder::new(config)
        .multiplexer(mux.clone())
        .notifier(Arc::new(TracingNotifier))
        .build()
        .unwrap();

    assert!(supervisor.start_on_launch().await.is_empty());

    assert!(mux.is_live("web"));
    assert!(!mux.is_live("batch"));
    let snapshot = supervisor.snapshot();
    let keys: Vec<&str> = snapshot.iter().map(|entry| entry.config.key.as_str()).collect();
    assert_eq!(keys, vec!["batch", "web"]);
    assert_eq!(snapshot[0].state.phase, ExecutionPhase::Stopped);
    assert_eq!(snapshot[1].state.phase, ExecutionPhase::Running);
    assert_eq!(snapshot[0].config.host.as_deref(), Some("build-01"));
}

#[test]
#[serial]
fn test_invalid_session_in_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("keeper.toml");
    std::fs::write(
        &path,
        r#"
        [[sessions]]
        key = "has space"
        command = "true"
        "#,
    )
    .unwrap();

    with_vars(vec![("MUXKEEPER_CONFIG_PATH", Some(path.to_str().unwrap()))], || {
        let result = KeeperConfig::new().and_then(KeeperConfig::validate);
        assert!(matches!(result, Err(muxkeeper::Error::InvalidConfig(_))));
    });
}
