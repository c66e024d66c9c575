use std::sync::Arc;

use super::FakeMultiplexer;
use super::RecordingNotifier;
use crate::AutoRestartConfig;
use crate::KeeperConfig;
use crate::Reconciler;
use crate::SessionConfig;
use crate::Supervisor;
use crate::SupervisorBuilder;
use crate::SupervisorConfig;

/// A supervisor over a fake multiplexer, plus handles to both fakes.
pub struct TestContext {
    pub supervisor: Supervisor,
    pub mux: Arc<FakeMultiplexer>,
    pub notifier: Arc<RecordingNotifier>,
}

impl TestContext {
    pub fn new(sessions: Vec<SessionConfig>) -> Self {
        Self::with_config(SupervisorConfig::default(), sessions)
    }

    pub fn with_config(
        config: SupervisorConfig,
        sessions: Vec<SessionConfig>,
    ) -> Self {
        let mux = FakeMultiplexer::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let keeper = KeeperConfig {
            supervisor: config,
            sessions,
            ..Default::default()
        };
        let supervisor = SupervisorBuilder::new(keeper)
            .multiplexer(mux.clone())
            .notifier(notifier.clone())
            .build()
            .expect("test supervisor builds");
        Self {
            supervisor,
            mux,
            notifier,
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(self.supervisor.clone())
    }
}

/// `maxRetries=3, retryDelaySeconds=1`
pub fn restartable(key: &str) -> SessionConfig {
    SessionConfig::new(key, "./serve").with_auto_restart(AutoRestartConfig::enabled(3, 1))
}

pub fn remote(
    key: &str,
    host: &str,
) -> SessionConfig {
    restartable(key).with_host(host)
}
