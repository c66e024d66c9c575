//! The supervisor: one explicitly constructed owner of every collaborator.
//!
//! [`Supervisor`] is a cheap handle (an `Arc`) shared by the Command API, the
//! reconciler task and the restart timers. Nothing about it is process-wide:
//! it is assembled by [`SupervisorBuilder`] and torn down by
//! [`Supervisor::shutdown`].
//!
//! ## Shared state discipline
//! - Lifecycle commands mutate a session only while holding its key lock, and
//!   bump its generation right after acquiring it.
//! - The reconciler mutates a session only if the key is unlocked and its
//!   generation still matches the snapshot taken before the poll. The check
//!   and the write happen under the registry write lock.
mod builder;
mod commands;
pub use builder::*;


use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::metrics::RESTARTS_SCHEDULED;
use crate::GenerationTracker;
use crate::KeyLock;
use crate::LifecycleError;
use crate::Multiplexer;
use crate::Notification;
use crate::Notifier;
use crate::Reconciler;
use crate::Result;
use crate::RestartPolicy;
use crate::RestartScheduler;
use crate::SessionConfig;
use crate::SessionRegistry;
use crate::SessionSnapshot;
use crate::SupervisorConfig;

/// Last failed `list_active` query of one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFailure {
    pub error: String,
    /// When the first failure of the current streak happened
    pub since: Instant,
    pub last_failure: Instant,
    pub consecutive_failures: u32,
}

pub(crate) struct SupervisorInner {
    pub(crate) config: SupervisorConfig,
    pub(crate) registry: SessionRegistry,
    pub(crate) locks: KeyLock,
    pub(crate) generations: GenerationTracker,
    pub(crate) policy: RestartPolicy,
    pub(crate) scheduler: RestartScheduler,
    pub(crate) multiplexer: Arc<dyn Multiplexer>,
    pub(crate) notifier: Arc<dyn Notifier>,
    /// Keyed by host label (`local` for the local machine)
    pub(crate) host_failures: DashMap<String, HostFailure>,
    pub(crate) shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct Supervisor {
    pub(crate) inner: Arc<SupervisorInner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("sessions", &self.inner.registry.len())
            .field("pending_restarts", &self.inner.scheduler.pending_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Supervisor {
    pub(crate) fn from_inner(inner: SupervisorInner) -> Self {
        Self { inner: Arc::new(inner) }
    }

    // -
    // Registration

    /// Adds a session in the `Stopped` state.
    pub fn register(
        &self,
        config: SessionConfig,
    ) -> Result<()> {
        self.ensure_accepting(&config.key)?;
        config.validate()?;
        self.inner.registry.register(config)
    }

    /// Swaps the config of a registered session. Runtime state is kept; the
    /// new config applies from the next lifecycle operation on.
    pub fn update_config(
        &self,
        config: SessionConfig,
    ) -> Result<()> {
        self.ensure_accepting(&config.key)?;
        config.validate()?;
        info!(key = %config.key, "session config updated");
        self.inner.registry.replace_config(config)
    }

    /// Removes a session, its pending restart timer and every queued
    /// lifecycle command for it.
    ///
    /// A command already holding the key lock finishes; its state writes
    /// fail with `KeyNotFound` once the entry is gone.
    pub fn deregister(
        &self,
        key: &str,
    ) -> Result<()> {
        self.inner.scheduler.cancel(key);
        let cancelled = self.inner.locks.cancel_waiters(key);
        match self.inner.registry.deregister(key) {
            Some(_) => {
                debug!(%key, cancelled, "deregistered");
                Ok(())
            }
            None => Err(LifecycleError::KeyNotFound(key.to_string()).into()),
        }
    }

    // -
    // Read accessors

    /// `(config, state)` of every registered session, ordered by key.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        self.inner.registry.snapshot()
    }

    pub fn session(
        &self,
        key: &str,
    ) -> Result<SessionSnapshot> {
        self.inner.registry.read(key, |entry| entry.clone())
    }

    /// The output lines stored by the last refresh, oldest first.
    pub fn recent_output(
        &self,
        key: &str,
    ) -> Result<Vec<String>> {
        self.inner
            .registry
            .read(key, |entry| entry.state.recent_output_lines().map(str::to_string).collect())
    }

    /// Captures fresh output for `key` and stores it unless a lifecycle
    /// command started on the key meanwhile. Returns the captured lines
    /// either way.
    pub async fn refresh_output(
        &self,
        key: &str,
    ) -> Result<Vec<String>> {
        let generation = self.inner.generations.current(key);
        let config = self.inner.registry.config(key)?;
        let lines = self
            .inner
            .multiplexer
            .capture_recent_output(&config, self.inner.config.output_lines)
            .await?;

        let limit = self.inner.config.output_lines;
        let stored = self.inner.registry.update(key, |entry| {
            if self.is_stale(key, generation) {
                return false;
            }
            entry.state.set_recent_output(lines.clone(), limit);
            true
        })?;
        if !stored {
            debug!(%key, generation, "discarded stale output capture");
        }
        Ok(lines)
    }

    /// Hosts whose last `list_active` query failed.
    pub fn host_failures(&self) -> BTreeMap<String, HostFailure> {
        self.inner
            .host_failures
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn pending_restart(
        &self,
        key: &str,
    ) -> bool {
        self.inner.scheduler.is_pending(key)
    }

    pub fn generation(
        &self,
        key: &str,
    ) -> u64 {
        self.inner.generations.current(key)
    }

    // -
    // Lifecycle

    /// Polls on `poll_interval` until `shutdown_signal` fires.
    pub fn spawn_reconciler(
        &self,
        shutdown_signal: watch::Receiver<()>,
    ) -> JoinHandle<()> {
        let reconciler = Reconciler::new(self.clone());
        tokio::spawn(reconciler.run(shutdown_signal))
    }

    /// Cancels every pending restart timer and queued command, then refuses
    /// new commands with `OperationCancelled`. Sessions keep running.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let timers = self.inner.scheduler.cancel_all();
        let waiters: usize = self
            .inner
            .registry
            .snapshot()
            .iter()
            .map(|entry| self.inner.locks.cancel_waiters(&entry.config.key))
            .sum();
        info!(timers, waiters, "supervisor shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    // -
    // Internal helpers

    pub(crate) fn ensure_accepting(
        &self,
        key: &str,
    ) -> Result<()> {
        if self.is_shut_down() {
            return Err(LifecycleError::OperationCancelled(key.to_string()).into());
        }
        Ok(())
    }

    /// Whether an observation dated `generation` must be dropped.
    ///
    /// Callers hold the registry write lock so the answer can not change
    /// before their write lands.
    pub(crate) fn is_stale(
        &self,
        key: &str,
        generation: u64,
    ) -> bool {
        self.inner.generations.current(key) != generation || self.inner.locks.is_held(key)
    }

    /// Arms the auto-restart timer of `key`.
    pub(crate) fn schedule_restart(
        &self,
        key: &str,
        delay: Duration,
    ) {
        let weak: Weak<SupervisorInner> = Arc::downgrade(&self.inner);
        let owned_key = key.to_string();
        self.inner.scheduler.schedule(key, delay, move |timer_id| async move {
            if let Some(inner) = weak.upgrade() {
                Supervisor { inner }.auto_start(&owned_key, timer_id).await;
            }
        });
        RESTARTS_SCHEDULED.with_label_values(&[key]).inc();
    }

    /// Best-effort delivery; failures are logged and dropped.
    pub(crate) fn notify(
        &self,
        notification: Notification,
    ) {
        let key = notification.key().to_string();
        if let Err(e) = self.inner.notifier.notify(notification) {
            warn!(%key, "notification not delivered: {}", e);
        }
    }
}
