//! Background reconciliation of observed multiplexer state.
//!
//! One cycle:
//! 1. bail out if the previous cycle is still running,
//! 2. group registered keys by host,
//! 3. per host (concurrently): snapshot the generations of its keys, then
//!    ask the multiplexer which sessions are alive,
//! 4. per key: apply the observation only if the generation is unchanged and
//!    the key is unlocked; hand detected crashes to the [`RestartPolicy`].
//!
//! A host that fails or times out is recorded in the supervisor's host
//! failure map; the other hosts are reconciled normally.
//!
//! [`RestartPolicy`]: crate::RestartPolicy


use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::constants::LOCAL_HOST_LABEL;
use crate::metrics::CRASHES_DETECTED;
use crate::metrics::HOST_QUERY_FAILURES;
use crate::metrics::POLL_CYCLES;
use crate::metrics::POLL_CYCLE_DURATION_SECONDS;
use crate::metrics::RESTARTS_PAUSED;
use crate::metrics::STALE_OBSERVATIONS;
use crate::ExecutionPhase;
use crate::HostFailure;
use crate::Notification;
use crate::RestartDecision;
use crate::Supervisor;

/// What one cycle did; mostly for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Another cycle was still running
    pub skipped: bool,
    pub hosts_queried: usize,
    pub hosts_failed: usize,
    /// Sessions newly seen alive
    pub started: usize,
    pub crashes: usize,
    pub stale: usize,
}

impl CycleReport {
    fn merge(
        &mut self,
        host: HostReport,
    ) {
        self.hosts_queried += 1;
        self.hosts_failed += usize::from(host.failed);
        self.started += host.started;
        self.crashes += host.crashes;
        self.stale += host.stale;
    }
}

#[derive(Debug, Default)]
struct HostReport {
    failed: bool,
    started: usize,
    crashes: usize,
    stale: usize,
}

enum Observation {
    Stale,
    Unchanged,
    CameUp,
    Crashed {
        decision: RestartDecision,
    },
}

/// Resets the in-cycle flag on every exit path, including cancellation.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn try_enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    supervisor: Supervisor,
    in_cycle: AtomicBool,
}

impl Reconciler {
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            supervisor,
            in_cycle: AtomicBool::new(false),
        }
    }

    /// Polls every `poll_interval` until `shutdown_signal` fires or its
    /// sender is dropped. The first cycle runs immediately.
    pub async fn run(
        self,
        mut shutdown_signal: watch::Receiver<()>,
    ) {
        let period = self.supervisor.inner.config.poll_interval();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(?period, "reconciler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown_signal.changed() => {
                    info!("reconciler received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    let report = self.poll_once().await;
                    trace!(?report, "poll cycle finished");
                }
            }
        }
    }

    /// Runs one reconciliation cycle.
    pub async fn poll_once(&self) -> CycleReport {
        let Some(_cycle) = CycleGuard::try_enter(&self.in_cycle) else {
            POLL_CYCLES.with_label_values(&["skipped"]).inc();
            debug!("previous poll cycle still running; skipping");
            return CycleReport {
                skipped: true,
                ..Default::default()
            };
        };
        if self.supervisor.is_shut_down() {
            return CycleReport::default();
        }

        let timer = POLL_CYCLE_DURATION_SECONDS.start_timer();
        let groups = self.supervisor.inner.registry.keys_by_host();
        let hosts = join_all(groups.into_iter().map(|(host, keys)| self.reconcile_host(host, keys))).await;

        let mut report = CycleReport::default();
        for host in hosts {
            report.merge(host);
        }
        timer.observe_duration();
        POLL_CYCLES.with_label_values(&["completed"]).inc();
        report
    }

    async fn reconcile_host(
        &self,
        host: Option<String>,
        keys: Vec<String>,
    ) -> HostReport {
        let inner = &self.supervisor.inner;
        let label = host.clone().unwrap_or_else(|| LOCAL_HOST_LABEL.to_string());

        // Taken before the query: anything begun after this point wins.
        let generations = inner.generations.snapshot_of(&keys);

        let timeout = inner.config.host_query_timeout();
        let active = match tokio::time::timeout(timeout, inner.multiplexer.list_active(host)).await {
            Ok(Ok(active)) => {
                if inner.host_failures.remove(&label).is_some() {
                    info!(host = %label, "host reachable again");
                }
                active
            }
            Ok(Err(e)) => {
                self.record_host_failure(&label, e.to_string());
                return HostReport {
                    failed: true,
                    ..Default::default()
                };
            }
            Err(_) => {
                self.record_host_failure(&label, format!("no answer within {timeout:?}"));
                return HostReport {
                    failed: true,
                    ..Default::default()
                };
            }
        };

        let mut report = HostReport::default();
        for key in keys {
            let generation = generations.get(&key).copied().unwrap_or(0);
            match self.observe(&key, generation, &active).await {
                Observation::Stale => report.stale += 1,
                Observation::Unchanged => {}
                Observation::CameUp => report.started += 1,
                Observation::Crashed { decision } => {
                    report.crashes += 1;
                    self.after_crash(&key, decision);
                }
            }
        }
        report
    }

    /// Applies one key's observation under the generation gate.
    async fn observe(
        &self,
        key: &str,
        generation: u64,
        active: &HashSet<String>,
    ) -> Observation {
        let inner = &self.supervisor.inner;
        let alive = active.contains(key);

        let Ok((config, phase)) = inner
            .registry
            .read(key, |entry| (entry.config.clone(), entry.state.phase))
        else {
            return Observation::Stale;
        };

        let output = if alive && phase != ExecutionPhase::Running {
            match inner
                .multiplexer
                .capture_recent_output(&config, inner.config.output_lines)
                .await
            {
                Ok(lines) => Some(lines),
                Err(e) => {
                    debug!(%key, "could not capture output: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let now = Instant::now();
        let output_limit = inner.config.output_lines;
        let applied = inner.registry.update(key, |entry| {
            if self.supervisor.is_stale(key, generation) {
                return Observation::Stale;
            }
            let state = &mut entry.state;

            if alive {
                if state.phase == ExecutionPhase::Running {
                    return Observation::Unchanged;
                }
                state.phase = ExecutionPhase::Running;
                if state.last_start_time.is_none() {
                    state.last_start_time = Some(now);
                }
                if let Some(lines) = output {
                    state.set_recent_output(lines, output_limit);
                }
                // Alive again: a restart armed for an earlier crash is moot.
                inner.scheduler.cancel(key);
                return Observation::CameUp;
            }

            if !state.phase.expects_running() {
                return Observation::Unchanged;
            }
            state.phase = ExecutionPhase::Stopped;
            state.last_exit_time = Some(now);
            let decision = inner.policy.on_crash(&entry.config.auto_restart, state, now);
            // Under the registry lock: only a `Restart` decision leaves a timer armed.
            match decision {
                RestartDecision::Restart { delay, .. } => self.supervisor.schedule_restart(key, delay),
                _ => {
                    inner.scheduler.cancel(key);
                }
            }
            Observation::Crashed { decision }
        });

        match applied {
            Ok(Observation::Stale) | Err(_) => {
                STALE_OBSERVATIONS.with_label_values(&["superseded"]).inc();
                debug!(%key, generation, "discarded stale observation");
                Observation::Stale
            }
            Ok(Observation::CameUp) => {
                info!(%key, "session observed running");
                Observation::CameUp
            }
            Ok(observation) => observation,
        }
    }

    fn after_crash(
        &self,
        key: &str,
        decision: RestartDecision,
    ) {
        CRASHES_DETECTED.with_label_values(&[key]).inc();
        match decision {
            RestartDecision::Disabled => {
                info!(%key, "session exited; auto-restart disabled");
                let consecutive_failures = self
                    .supervisor
                    .inner
                    .registry
                    .read(key, |entry| entry.state.consecutive_failures)
                    .unwrap_or(0);
                self.supervisor.notify(Notification::Crashed {
                    key: key.to_string(),
                    consecutive_failures,
                    restarting: false,
                });
            }
            RestartDecision::AlreadyPaused => {
                debug!(%key, "session exited while restarts are paused");
            }
            RestartDecision::Paused {
                reason,
                consecutive_failures,
            } => {
                RESTARTS_PAUSED.with_label_values(&[&reason.to_string()]).inc();
                warn!(%key, %reason, consecutive_failures, "auto-restart paused");
                self.supervisor.notify(Notification::RestartPaused {
                    key: key.to_string(),
                    reason,
                    consecutive_failures,
                });
            }
            RestartDecision::Restart {
                delay,
                consecutive_failures,
            } => {
                info!(%key, ?delay, consecutive_failures, "session crashed; restart scheduled");
                if decision.is_first_failure() {
                    self.supervisor.notify(Notification::Crashed {
                        key: key.to_string(),
                        consecutive_failures,
                        restarting: true,
                    });
                }
            }
        }
    }

    fn record_host_failure(
        &self,
        label: &str,
        error: String,
    ) {
        HOST_QUERY_FAILURES.with_label_values(&[label]).inc();
        warn!(host = %label, "host query failed: {}", error);
        let now = Instant::now();
        match self.supervisor.inner.host_failures.entry(label.to_string()) {
            Entry::Occupied(mut occupied) => {
                let failure = occupied.get_mut();
                failure.error = error;
                failure.last_failure = now;
                failure.consecutive_failures += 1;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(HostFailure {
                    error,
                    since: now,
                    last_failure: now,
                    consecutive_failures: 1,
                });
            }
        }
    }
}
