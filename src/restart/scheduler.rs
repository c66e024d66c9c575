use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

struct PendingRestart {
    id: u64,
    handle: JoinHandle<()>,
}

/// At most one pending restart timer per session key.
///
/// A timer is cancellable only while it sleeps: once it fires it claims
/// itself via [`RestartScheduler::claim`], after which cancellation no longer
/// reaches it and the start it performs runs to completion under the key lock.
#[derive(Default)]
pub struct RestartScheduler {
    pending: DashMap<String, PendingRestart>,
    next_id: AtomicU64,
}

impl RestartScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer that runs `on_fire(id)` after `delay`, replacing (and
    /// aborting) any timer already pending for `key`.
    ///
    /// `on_fire` receives the timer id it must pass to [`Self::claim`].
    pub fn schedule<F, Fut>(
        &self,
        key: &str,
        delay: Duration,
        on_fire: F,
    ) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // The entry (and its shard lock) is held while spawning so a timer
        // with a zero delay can not try to claim itself before it is stored.
        let entry = self.pending.entry(key.to_string());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(id).await;
        });

        match entry {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(PendingRestart { id, handle });
                previous.handle.abort();
                debug!(%key, previous = previous.id, "replaced pending restart timer");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingRestart { id, handle });
            }
        }
        debug!(%key, id, ?delay, "restart timer scheduled");
        id
    }

    /// Aborts the pending timer of `key`, if any.
    pub fn cancel(
        &self,
        key: &str,
    ) -> bool {
        match self.pending.remove(key) {
            Some((_, pending)) => {
                pending.handle.abort();
                debug!(%key, id = pending.id, "restart timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Called by a firing timer. Returns false if the timer was superseded.
    pub fn claim(
        &self,
        key: &str,
        id: u64,
    ) -> bool {
        self.pending.remove_if(key, |_, pending| pending.id == id).is_some()
    }

    pub fn is_pending(
        &self,
        key: &str,
    ) -> bool {
        self.pending.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Aborts every pending timer.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        keys.iter().filter(|key| self.cancel(key)).count()
    }
}
