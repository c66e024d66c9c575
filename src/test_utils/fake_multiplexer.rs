use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::LifecycleError;
use crate::Multiplexer;
use crate::Result;
use crate::SessionConfig;

/// Holds the next `list_active` call until released.
#[derive(Clone, Default)]
pub struct ListingGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl ListingGate {
    /// Resolves once the gated query is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct FakeState {
    /// key -> host of every live session
    live: HashMap<String, Option<String>>,
    output: HashMap<String, Vec<String>>,
    start_failures: HashMap<String, VecDeque<LifecycleError>>,
    kill_failures: HashMap<String, VecDeque<LifecycleError>>,
    unreachable: HashSet<Option<String>>,
    list_delays: HashMap<Option<String>, Duration>,
    listing_gate: Option<ListingGate>,
    op_delay: Duration,
    events: Vec<String>,
    starts: HashMap<String, usize>,
}

/// In-memory multiplexer with scriptable failures and delays.
#[derive(Default)]
pub struct FakeMultiplexer {
    state: Mutex<FakeState>,
}

impl FakeMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The session's process exits on its own.
    pub fn crash(
        &self,
        key: &str,
    ) {
        self.state.lock().live.remove(key);
    }

    /// A session appears that the supervisor did not start.
    pub fn spawn_external(
        &self,
        key: &str,
        host: Option<&str>,
    ) {
        self.state.lock().live.insert(key.to_string(), host.map(str::to_string));
    }

    pub fn is_live(
        &self,
        key: &str,
    ) -> bool {
        self.state.lock().live.contains_key(key)
    }

    pub fn start_count(
        &self,
        key: &str,
    ) -> usize {
        self.state.lock().starts.get(key).copied().unwrap_or(0)
    }

    pub fn fail_next_start(
        &self,
        key: &str,
        error: LifecycleError,
    ) {
        self.state
            .lock()
            .start_failures
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn fail_next_kill(
        &self,
        key: &str,
        error: LifecycleError,
    ) {
        self.state
            .lock()
            .kill_failures
            .entry(key.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn set_unreachable(
        &self,
        host: Option<&str>,
        unreachable: bool,
    ) {
        let host = host.map(str::to_string);
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(host);
        } else {
            state.unreachable.remove(&host);
        }
    }

    pub fn set_list_delay(
        &self,
        host: Option<&str>,
        delay: Duration,
    ) {
        self.state.lock().list_delays.insert(host.map(str::to_string), delay);
    }

    /// Delay inside every `start` and `kill`, between its begin and end
    /// events.
    pub fn set_op_delay(
        &self,
        delay: Duration,
    ) {
        self.state.lock().op_delay = delay;
    }

    pub fn set_output(
        &self,
        key: &str,
        lines: &[&str],
    ) {
        self.state
            .lock()
            .output
            .insert(key.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn gate_next_listing(&self) -> ListingGate {
        let gate = ListingGate::default();
        self.state.lock().listing_gate = Some(gate.clone());
        gate
    }

    /// `"begin start api"`, `"end kill api"`, ...
    pub fn events(&self) -> Vec<String> {
        self.state.lock().events.clone()
    }

    fn record(
        &self,
        event: String,
    ) {
        self.state.lock().events.push(event);
    }
}

#[async_trait]
impl Multiplexer for FakeMultiplexer {
    async fn list_active(
        &self,
        host: Option<String>,
    ) -> Result<HashSet<String>> {
        // The answer reflects the state at query time, however late it arrives.
        let (answer, gate, delay) = {
            let mut state = self.state.lock();
            let answer: Result<HashSet<String>> = if state.unreachable.contains(&host) {
                Err(LifecycleError::ConnectionFailure("connection refused".to_string()).into())
            } else {
                Ok(state
                    .live
                    .iter()
                    .filter(|(_, live_host)| **live_host == host)
                    .map(|(key, _)| key.clone())
                    .collect())
            };
            (answer, state.listing_gate.take(), state.list_delays.get(&host).copied())
        };
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        answer
    }

    async fn exists(
        &self,
        session: &SessionConfig,
    ) -> Result<bool> {
        Ok(self.is_live(&session.key))
    }

    async fn start(
        &self,
        session: &SessionConfig,
    ) -> Result<()> {
        let key = session.key.clone();
        self.record(format!("begin start {key}"));
        let delay = self.state.lock().op_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.state.lock();
            *state.starts.entry(key.clone()).or_default() += 1;
            let scripted = state.start_failures.get_mut(&key).and_then(VecDeque::pop_front);
            if let Some(error) = scripted {
                Err(error.into())
            } else if state.unreachable.contains(&session.host) {
                Err(LifecycleError::ConnectionFailure("connection refused".to_string()).into())
            } else if state.live.contains_key(&key) {
                Err(LifecycleError::AlreadyRunning(key.clone()).into())
            } else {
                state.live.insert(key.clone(), session.host.clone());
                Ok(())
            }
        };
        self.record(format!("end start {key}"));
        result
    }

    async fn kill(
        &self,
        session: &SessionConfig,
    ) -> Result<()> {
        let key = session.key.clone();
        self.record(format!("begin kill {key}"));
        let delay = self.state.lock().op_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.state.lock();
            let scripted = state.kill_failures.get_mut(&key).and_then(VecDeque::pop_front);
            if let Some(error) = scripted {
                Err(error.into())
            } else if state.live.remove(&key).is_some() {
                Ok(())
            } else {
                Err(LifecycleError::NotRunning(key.clone()).into())
            }
        };
        self.record(format!("end kill {key}"));
        result
    }

    async fn capture_recent_output(
        &self,
        session: &SessionConfig,
        max_lines: usize,
    ) -> Result<Vec<String>> {
        let state = self.state.lock();
        let lines = state.output.get(&session.key).cloned().unwrap_or_default();
        let skip = lines.len().saturating_sub(max_lines);
        Ok(lines.into_iter().skip(skip).collect())
    }
}
