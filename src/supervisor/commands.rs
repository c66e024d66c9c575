//! Command API: `start`, `stop`, `restart`, `resume`, and the timer-driven
//! auto start.
//!
//! Every operation takes the key lock, bumps the generation before its first
//! suspension point, and releases the lock on every exit path through
//! [`KeyLockGuard`]'s drop. Dropping the returned future mid-flight unwinds
//! the same way.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::Supervisor;
use crate::metrics::record_command;
use crate::Error;
use crate::ExecutionPhase;
use crate::KeyLockGuard;
use crate::LifecycleError;
use crate::PauseReason;
use crate::Result;
use crate::RuntimeState;
use crate::SessionConfig;

/// Lifecycle errors are recorded as-is; anything else is recorded as an
/// execution failure of the operation.
fn record_failure(
    state: &mut RuntimeState,
    error: &Error,
    now: Instant,
) {
    match error.lifecycle() {
        Some(lifecycle) => state.record_error(lifecycle, now),
        None => state.record_error(
            &LifecycleError::ExecutionFailure {
                exit_code: None,
                output: error.to_string(),
            },
            now,
        ),
    }
}

fn is_not_running(error: &Error) -> bool {
    matches!(error.lifecycle(), Some(LifecycleError::NotRunning(_)))
}

impl Supervisor {
    /// Starts `key` by hand: clears any pause and starts a new failure
    /// sequence.
    ///
    /// # Errors
    /// `AlreadyRunning` if the multiplexer already hosts the session.
    pub async fn start(
        &self,
        key: &str,
    ) -> Result<()> {
        let result = async {
            let (_guard, config) = self.begin(key).await?;
            self.inner.scheduler.cancel(key);
            self.inner.registry.update(key, |entry| {
                entry.state.reset_failures();
                entry.state.unpause();
            })?;
            self.launch(&config).await
        }
        .await;
        record_command("start", &result);
        result
    }

    /// Stops `key` and pauses auto-restart until the next manual start or
    /// resume.
    ///
    /// # Errors
    /// `NotRunning` if the multiplexer has no such session. The session is
    /// then `Stopped` and paused as after a successful stop, with the error
    /// recorded.
    pub async fn stop(
        &self,
        key: &str,
    ) -> Result<()> {
        let result = async {
            let (_guard, config) = self.begin(key).await?;

            // Paused before the kill so a racing poll can not schedule a restart.
            let previous_phase = self.inner.registry.update(key, |entry| {
                entry.state.pause(PauseReason::Manual);
                let previous = entry.state.phase;
                entry.state.phase = ExecutionPhase::Stopping;
                previous
            })?;
            self.inner.scheduler.cancel(key);

            let outcome = self.inner.multiplexer.kill(&config).await;
            let now = Instant::now();
            match outcome {
                Ok(()) => {
                    self.inner.registry.update(key, |entry| {
                        entry.state.phase = ExecutionPhase::Stopped;
                        entry.state.last_exit_time = Some(now);
                        entry.state.clear_error();
                    })?;
                    info!(%key, "session stopped");
                    Ok(())
                }
                Err(e) if is_not_running(&e) => {
                    self.inner.registry.update(key, |entry| {
                        entry.state.phase = ExecutionPhase::Stopped;
                        record_failure(&mut entry.state, &e, now);
                    })?;
                    debug!(%key, "stop of a session that is not running");
                    Err(e)
                }
                Err(e) => {
                    self.inner.registry.update(key, |entry| {
                        entry.state.phase = previous_phase;
                        record_failure(&mut entry.state, &e, now);
                    })?;
                    warn!(%key, "stop failed: {}", e);
                    Err(e)
                }
            }
        }
        .await;
        record_command("stop", &result);
        result
    }

    /// Kills (if running) and starts `key` again with a fresh failure
    /// sequence.
    pub async fn restart(
        &self,
        key: &str,
    ) -> Result<()> {
        let result = async {
            let (_guard, config) = self.begin(key).await?;
            self.inner.scheduler.cancel(key);

            let previous_phase = self.inner.registry.update(key, |entry| {
                let previous = entry.state.phase;
                entry.state.phase = ExecutionPhase::Stopping;
                previous
            })?;

            let outcome = self.inner.multiplexer.kill(&config).await;
            let now = Instant::now();
            if let Err(e) = outcome {
                if !is_not_running(&e) {
                    self.inner.registry.update(key, |entry| {
                        entry.state.phase = previous_phase;
                        record_failure(&mut entry.state, &e, now);
                    })?;
                    warn!(%key, "restart could not stop the session: {}", e);
                    return Err(e);
                }
            }

            self.inner.registry.update(key, |entry| {
                entry.state.phase = ExecutionPhase::Stopped;
                entry.state.last_exit_time = Some(now);
                entry.state.reset_failures();
                entry.state.unpause();
            })?;
            self.launch(&config).await
        }
        .await;
        record_command("restart", &result);
        result
    }

    /// Lifts a pause (of any reason), forgets prior failures and starts.
    pub async fn resume(
        &self,
        key: &str,
    ) -> Result<()> {
        let result = async {
            let (_guard, config) = self.begin(key).await?;
            self.inner.scheduler.cancel(key);
            self.inner.registry.update(key, |entry| {
                entry.state.unpause();
                entry.state.reset_failures();
            })?;
            self.launch(&config).await
        }
        .await;
        record_command("resume", &result);
        result
    }

    /// Body of a restart timer. Keeps the failure counter, and quietly gives
    /// up if the session was removed, paused or started meanwhile.
    pub(crate) async fn auto_start(
        &self,
        key: &str,
        timer_id: u64,
    ) {
        if !self.inner.scheduler.claim(key, timer_id) {
            debug!(%key, timer_id, "restart timer superseded");
            return;
        }
        if self.is_shut_down() {
            return;
        }

        let result = async {
            let (_guard, config) = self.begin(key).await?;
            let runnable = self.inner.registry.read(key, |entry| {
                !entry.state.restart_paused && entry.state.phase != ExecutionPhase::Running
            })?;
            if !runnable {
                debug!(%key, "auto start skipped");
                return Ok(());
            }
            info!(%key, "auto-restarting session");
            self.launch(&config).await
        }
        .await;

        if let Err(e) = &result {
            warn!(%key, "auto start failed: {}", e);
        }
        record_command("auto_start", &result);
    }

    /// Takes the key lock and opens a new generation.
    async fn begin(
        &self,
        key: &str,
    ) -> Result<(KeyLockGuard, Arc<SessionConfig>)> {
        self.ensure_accepting(key)?;
        // Fail fast for unknown keys instead of queueing behind their lock.
        self.inner.registry.config(key)?;

        let guard = self.inner.locks.acquire(key).await?;
        let config = self.inner.registry.config(key)?;
        let generation = self.inner.generations.bump(key);
        debug!(%key, generation, "lifecycle operation begins");
        Ok((guard, config))
    }

    /// Shared start step of every command. Caller holds the key lock.
    ///
    /// A failed start leaves the session `Starting` with the error recorded,
    /// so the next poll treats the absent session as a crash. `AlreadyRunning`
    /// is recorded too but leaves the session `Running`.
    async fn launch(
        &self,
        config: &SessionConfig,
    ) -> Result<()> {
        let key = config.key.as_str();
        let now = Instant::now();
        let previous_start = self.inner.registry.update(key, |entry| {
            entry.state.phase = ExecutionPhase::Starting;
            entry.state.last_start_time.replace(now)
        })?;

        match self.inner.multiplexer.start(config).await {
            Ok(()) => {
                self.inner.registry.update(key, |entry| {
                    entry.state.phase = ExecutionPhase::Running;
                    entry.state.clear_error();
                })?;
                info!(%key, host = ?config.host, "session started");
                Ok(())
            }
            Err(Error::Lifecycle(LifecycleError::AlreadyRunning(k))) => {
                // The running process was not started by this call.
                let error = LifecycleError::AlreadyRunning(k);
                self.inner.registry.update(key, |entry| {
                    entry.state.phase = ExecutionPhase::Running;
                    entry.state.last_start_time = previous_start.or(Some(now));
                    entry.state.record_error(&error, now);
                })?;
                debug!(%key, "session already running");
                Err(error.into())
            }
            Err(e) => {
                let failed_at = Instant::now();
                self.inner.registry.update(key, |entry| {
                    record_failure(&mut entry.state, &e, failed_at);
                })?;
                warn!(%key, host = ?config.host, "start failed: {}", e);
                Err(e)
            }
        }
    }
}
