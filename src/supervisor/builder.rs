//! Assembles a [`Supervisor`] from a [`KeeperConfig`].
//!
//! Defaults are the production collaborators: tmux driven through a
//! [`ProcessExecutor`] and a [`TracingNotifier`]. Both can be replaced
//! before `build()`.
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let supervisor = SupervisorBuilder::new(KeeperConfig::new()?.validate()?)
//!     .notifier(Arc::new(BroadcastNotifier::new(64)))
//!     .build()?;
//! supervisor.start_on_launch().await;
//! let poller = supervisor.spawn_reconciler(shutdown_rx);
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use tracing::warn;

use super::Supervisor;
use super::SupervisorInner;
use crate::BroadcastNotifier;
use crate::GenerationTracker;
use crate::KeeperConfig;
use crate::KeyLock;
use crate::LifecycleError;
use crate::Multiplexer;
use crate::Notifier;
use crate::ProcessExecutor;
use crate::Result;
use crate::RestartPolicy;
use crate::RestartScheduler;
use crate::SessionRegistry;
use crate::TmuxMultiplexer;
use crate::TracingNotifier;

pub struct SupervisorBuilder {
    config: KeeperConfig,
    multiplexer: Option<Arc<dyn Multiplexer>>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl SupervisorBuilder {
    pub fn new(config: KeeperConfig) -> Self {
        Self {
            config,
            multiplexer: None,
            notifier: None,
        }
    }

    pub fn multiplexer(
        mut self,
        multiplexer: Arc<dyn Multiplexer>,
    ) -> Self {
        self.multiplexer = Some(multiplexer);
        self
    }

    pub fn notifier(
        mut self,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Routes notifications into a [`BroadcastNotifier`] holding up to
    /// `supervisor.notification_buffer` undelivered messages. Subscribe on
    /// the returned handle.
    pub fn broadcast_notifier(mut self) -> (Self, BroadcastNotifier) {
        let notifier = BroadcastNotifier::new(self.config.supervisor.notification_buffer);
        self.notifier = Some(Arc::new(notifier.clone()));
        (self, notifier)
    }

    /// Validates the supervisor section and registers every configured
    /// session in the `Stopped` state. Nothing is started.
    pub fn build(self) -> Result<Supervisor> {
        let KeeperConfig {
            supervisor,
            executor,
            sessions,
        } = self.config;
        supervisor.validate()?;

        let multiplexer: Arc<dyn Multiplexer> = match self.multiplexer {
            Some(multiplexer) => multiplexer,
            None => {
                executor.validate()?;
                let tmux_binary = executor.tmux_binary.clone();
                Arc::new(TmuxMultiplexer::new(Arc::new(ProcessExecutor::new(executor)), tmux_binary))
            }
        };

        let notifier: Arc<dyn Notifier> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(TracingNotifier),
        };

        let inner = SupervisorInner {
            policy: RestartPolicy::from_config(&supervisor),
            config: supervisor,
            registry: SessionRegistry::new(),
            locks: KeyLock::new(),
            generations: GenerationTracker::new(),
            scheduler: RestartScheduler::new(),
            multiplexer,
            notifier,
            host_failures: DashMap::new(),
            shut_down: AtomicBool::new(false),
        };
        let supervisor = Supervisor::from_inner(inner);

        for session in sessions {
            supervisor.register(session)?;
        }
        info!(sessions = supervisor.inner.registry.len(), "supervisor built");
        Ok(supervisor)
    }
}

impl Supervisor {
    /// Starts every session configured with `start_on_launch`, one after
    /// the other. Sessions found already running are adopted, not errors.
    ///
    /// Returns the keys that could not be started.
    pub async fn start_on_launch(&self) -> Vec<String> {
        let keys: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|entry| entry.config.start_on_launch)
            .map(|entry| entry.config.key.clone())
            .collect();

        let mut failed = Vec::new();
        for key in keys {
            match self.start(&key).await {
                Ok(()) => {}
                Err(e) if matches!(e.lifecycle(), Some(LifecycleError::AlreadyRunning(_))) => {
                    info!(%key, "adopted running session");
                }
                Err(e) => {
                    warn!(%key, "start on launch failed: {}", e);
                    failed.push(key);
                }
            }
        }
        failed
    }
}
