//! Prometheus instrumentation of the supervisor.
//!
//! Collectors are process-wide and registered once into [`REGISTRY`];
//! [`gather`] renders them in the text exposition format for whatever
//! surface the embedding application exposes.

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::Histogram;
use prometheus::HistogramOpts;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use tracing::warn;

use crate::Result;
use crate::SystemError;

lazy_static! {
    pub static ref POLL_CYCLES: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_poll_cycles", "Reconciler cycles by outcome (completed, skipped)"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref POLL_CYCLE_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("muxkeeper_poll_cycle_duration_seconds", "Duration of one reconciler cycle")
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0])
    )
    .expect("metric can not be created");

    pub static ref HOST_QUERY_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_host_query_failures", "Failed list_active queries per host"),
        &["host"]
    )
    .expect("metric can not be created");

    pub static ref STALE_OBSERVATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_stale_observations", "Poll observations discarded before apply"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref CRASHES_DETECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_crashes_detected", "Sessions found absent while expected alive"),
        &["key"]
    )
    .expect("metric can not be created");

    pub static ref RESTARTS_SCHEDULED: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_restarts_scheduled", "Auto-restart timers armed"),
        &["key"]
    )
    .expect("metric can not be created");

    pub static ref RESTARTS_PAUSED: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_restarts_paused", "Auto-restart suppressions by reason"),
        &["reason"]
    )
    .expect("metric can not be created");

    pub static ref COMMAND_OUTCOMES: IntCounterVec = IntCounterVec::new(
        Opts::new("muxkeeper_command_outcomes", "Lifecycle commands by operation and outcome"),
        &["operation", "outcome"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        if let Err(e) = register_metrics(&registry) {
            warn!("failed to register supervisor metrics: {:?}", e);
        }
        registry
    };
}

pub(crate) fn register_metrics(registry: &Registry) -> Result<()> {
    registry.register(Box::new(POLL_CYCLES.clone()))?;
    registry.register(Box::new(POLL_CYCLE_DURATION_SECONDS.clone()))?;
    registry.register(Box::new(HOST_QUERY_FAILURES.clone()))?;
    registry.register(Box::new(STALE_OBSERVATIONS.clone()))?;
    registry.register(Box::new(CRASHES_DETECTED.clone()))?;
    registry.register(Box::new(RESTARTS_SCHEDULED.clone()))?;
    registry.register(Box::new(RESTARTS_PAUSED.clone()))?;
    registry.register(Box::new(COMMAND_OUTCOMES.clone()))?;
    Ok(())
}

/// Records the outcome of one Command API call.
pub(crate) fn record_command<T>(
    operation: &str,
    result: &Result<T>,
) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => match e.lifecycle() {
            Some(lifecycle) if lifecycle.is_connection_class() => "connection_failure",
            Some(_) => "failed",
            None => "error",
        },
    };
    COMMAND_OUTCOMES.with_label_values(&[operation, outcome]).inc();
}

/// Text exposition of every supervisor metric.
pub fn gather() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| SystemError::Metrics(e.to_string()).into())
}
