use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use muxkeeper::AutoRestartConfig;
use muxkeeper::KeeperConfig;
use muxkeeper::LifecycleError;
use muxkeeper::Multiplexer;
use muxkeeper::Notifier;
use muxkeeper::Result;
use muxkeeper::SessionConfig;
use muxkeeper::Supervisor;
use muxkeeper::SupervisorBuilder;
use parking_lot::Mutex;

pub fn enable_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Multiplexer living entirely in memory: a session is "live" between a
/// successful `start` and a `kill` or [`InMemoryMux::exit`].
#[derive(Default)]
pub struct InMemoryMux {
    live: Mutex<HashMap<String, Option<String>>>,
    unreachable: Mutex<HashSet<String>>,
    starts: Mutex<HashMap<String, usize>>,
}

#[allow(dead_code)]
impl InMemoryMux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The supervised process exits by itself.
    pub fn exit(
        &self,
        key: &str,
    ) {
        self.live.lock().remove(key);
    }

    pub fn is_live(
        &self,
        key: &str,
    ) -> bool {
        self.live.lock().contains_key(key)
    }

    pub fn starts(
        &self,
        key: &str,
    ) -> usize {
        self.starts.lock().get(key).copied().unwrap_or(0)
    }

    pub fn set_unreachable(
        &self,
        host: &str,
        unreachable: bool,
    ) {
        let mut hosts = self.unreachable.lock();
        if unreachable {
            hosts.insert(host.to_string());
        } else {
            hosts.remove(host);
        }
    }

    fn reachable(
        &self,
        host: Option<&String>,
    ) -> Result<()> {
        match host {
            Some(host) if self.unreachable.lock().contains(host) => {
                Err(LifecycleError::ConnectionFailure(format!("ssh: connect to host {host}: Connection refused")).into())
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Multiplexer for InMemoryMux {
    async fn list_active(
        &self,
        host: Option<String>,
    ) -> Result<HashSet<String>> {
        self.reachable(host.as_ref())?;
        Ok(self
            .live
            .lock()
            .iter()
            .filter(|(_, live_host)| **live_host == host)
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn exists(
        &self,
        session: &SessionConfig,
    ) -> Result<bool> {
        self.reachable(session.host.as_ref())?;
        Ok(self.is_live(&session.key))
    }

    async fn start(
        &self,
        session: &SessionConfig,
    ) -> Result<()> {
        self.reachable(session.host.as_ref())?;
        *self.starts.lock().entry(session.key.clone()).or_default() += 1;
        let mut live = self.live.lock();
        if live.contains_key(&session.key) {
            return Err(LifecycleError::AlreadyRunning(session.key.clone()).into());
        }
        live.insert(session.key.clone(), session.host.clone());
        Ok(())
    }

    async fn kill(
        &self,
        session: &SessionConfig,
    ) -> Result<()> {
        self.reachable(session.host.as_ref())?;
        match self.live.lock().remove(&session.key) {
            Some(_) => Ok(()),
            None => Err(LifecycleError::NotRunning(session.key.clone()).into()),
        }
    }

    async fn capture_recent_output(
        &self,
        session: &SessionConfig,
        _max_lines: usize,
    ) -> Result<Vec<String>> {
        Ok(vec![format!("{} is up", session.key)])
    }
}

#[allow(dead_code)]
pub fn restartable(
    key: &str,
    max_retries: u32,
) -> SessionConfig {
    SessionConfig::new(key, "./serve --port 8080").with_auto_restart(AutoRestartConfig::enabled(max_retries, 1))
}

pub fn build_supervisor(
    sessions: Vec<SessionConfig>,
    mux: Arc<InMemoryMux>,
    notifier: Arc<dyn Notifier>,
) -> Supervisor {
    let config = KeeperConfig {
        sessions,
        ..Default::default()
    };
    SupervisorBuilder::new(config)
        .multiplexer(mux)
        .notifier(notifier)
        .build()
        .expect("supervisor builds")
}
