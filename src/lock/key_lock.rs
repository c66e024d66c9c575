//! Per-key asynchronous mutual exclusion.
//!
//! Every session key owns an independent FIFO queue. Waiters are stored in a
//! ticket-ordered map rather than as opaque continuations, so a waiter whose
//! `acquire` future is dropped splices itself out in O(log n) without
//! disturbing the order of the others.
//!
//! ```text
//! acquire(k) ──▶ queue[k].holder free? ──yes──▶ KeyLockGuard
//!                        │ no
//!                        ▼
//!               waiters[ticket] = oneshot ──▶ await grant
//!                                                 │
//! KeyLockGuard::drop ──▶ pop_first(waiters) ──────┘
//! ```
//!
//! Ownership is scoped: dropping the [`KeyLockGuard`] releases the key on
//! every exit path, including errors and cancellation of the owning task.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;
use tracing::trace;

use crate::LifecycleError;
use crate::Result;

type Grant = std::result::Result<(), LifecycleError>;

#[derive(Default)]
struct KeyQueue {
    /// Ticket of the current owner
    holder: Option<u64>,
    /// Pending acquisitions, served in ticket order
    waiters: BTreeMap<u64, oneshot::Sender<Grant>>,
}

#[derive(Default)]
struct KeyLockInner {
    queues: Mutex<HashMap<String, KeyQueue>>,
    next_ticket: AtomicU64,
}

impl KeyLockInner {
    /// Hands the key to the oldest live waiter, or frees it.
    ///
    /// Must be called with `queue.holder` owned by the caller.
    fn hand_over(
        queues: &mut HashMap<String, KeyQueue>,
        key: &str,
    ) {
        let Some(queue) = queues.get_mut(key) else {
            return;
        };
        queue.holder = None;

        while let Some((ticket, tx)) = queue.waiters.pop_first() {
            queue.holder = Some(ticket);
            if tx.send(Ok(())).is_ok() {
                trace!(%key, ticket, "key lock handed over");
                return;
            }
            // Receiver already gone: the waiter was cancelled but has not
            // spliced itself out yet. Skip it.
            queue.holder = None;
        }

        if queue.waiters.is_empty() {
            queues.remove(key);
        }
    }

    fn release(
        &self,
        key: &str,
        ticket: u64,
    ) {
        let mut queues = self.queues.lock();
        let owned = queues.get(key).map(|q| q.holder == Some(ticket)).unwrap_or(false);
        if owned {
            Self::hand_over(&mut queues, key);
        }
    }

    /// Cleanup for an `acquire` future dropped while queued, or dropped
    /// after ownership was granted but before it was observed.
    fn abandon(
        &self,
        key: &str,
        ticket: u64,
    ) {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(key) else {
            return;
        };

        if queue.waiters.remove(&ticket).is_some() {
            trace!(%key, ticket, "queued waiter cancelled");
            if queue.holder.is_none() && queue.waiters.is_empty() {
                queues.remove(key);
            }
            return;
        }

        if queue.holder == Some(ticket) {
            debug!(%key, ticket, "granted waiter cancelled before taking ownership");
            Self::hand_over(&mut queues, key);
        }
    }
}

/// Per-key FIFO mutual exclusion with cancellation-safe waiters.
///
/// Cloning is cheap and every clone refers to the same set of queues.
#[derive(Clone, Default)]
pub struct KeyLock {
    inner: Arc<KeyLockInner>,
}

impl KeyLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspends until every earlier holder and waiter for `key` is done.
    ///
    /// Dropping the returned future while it is queued removes it from the
    /// queue without granting it ownership.
    ///
    /// # Errors
    /// `LifecycleError::OperationCancelled` when the queued waiters of `key`
    /// were cancelled through [`KeyLock::cancel_waiters`].
    pub async fn acquire(
        &self,
        key: &str,
    ) -> Result<KeyLockGuard> {
        let (ticket, rx) = {
            let mut queues = self.inner.queues.lock();
            // Tickets are drawn under the queue mutex so ticket order is arrival order.
            let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
            let queue = queues.entry(key.to_string()).or_default();
            if queue.holder.is_none() && queue.waiters.is_empty() {
                queue.holder = Some(ticket);
                trace!(%key, ticket, "key lock acquired without waiting");
                return Ok(self.guard(key, ticket));
            }

            let (tx, rx) = oneshot::channel();
            queue.waiters.insert(ticket, tx);
            (ticket, rx)
        };

        let pending = PendingWaiter {
            lock: self,
            key,
            ticket,
            armed: true,
        };
        pending.wait(rx).await
    }

    /// Whether some task currently owns `key`.
    pub fn is_held(
        &self,
        key: &str,
    ) -> bool {
        self.inner
            .queues
            .lock()
            .get(key)
            .map(|q| q.holder.is_some())
            .unwrap_or(false)
    }

    /// Number of tasks queued behind the current owner of `key`.
    pub fn waiter_count(
        &self,
        key: &str,
    ) -> usize {
        self.inner.queues.lock().get(key).map(|q| q.waiters.len()).unwrap_or(0)
    }

    /// Fails every queued waiter of `key` with `OperationCancelled`.
    ///
    /// The current owner, if any, keeps the key until its guard is dropped.
    /// Returns the number of waiters cancelled.
    pub fn cancel_waiters(
        &self,
        key: &str,
    ) -> usize {
        let waiters = {
            let mut queues = self.inner.queues.lock();
            let Some(queue) = queues.get_mut(key) else {
                return 0;
            };
            let waiters = std::mem::take(&mut queue.waiters);
            if queue.holder.is_none() {
                queues.remove(key);
            }
            waiters
        };

        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(LifecycleError::OperationCancelled(key.to_string())));
        }
        if count > 0 {
            debug!(%key, count, "cancelled queued lock waiters");
        }
        count
    }

    fn guard(
        &self,
        key: &str,
        ticket: u64,
    ) -> KeyLockGuard {
        KeyLockGuard {
            inner: self.inner.clone(),
            key: key.to_string(),
            ticket,
        }
    }
}

/// Removes a queued waiter if its `acquire` future is dropped before the
/// grant is observed.
struct PendingWaiter<'a> {
    lock: &'a KeyLock,
    key: &'a str,
    ticket: u64,
    armed: bool,
}

impl PendingWaiter<'_> {
    async fn wait(
        mut self,
        rx: oneshot::Receiver<Grant>,
    ) -> Result<KeyLockGuard> {
        let outcome = rx.await;
        // Either way the queue no longer references this ticket as a waiter.
        self.armed = false;
        match outcome {
            Ok(Ok(())) => Ok(self.lock.guard(self.key, self.ticket)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(LifecycleError::OperationCancelled(self.key.to_string()).into()),
        }
    }
}

impl Drop for PendingWaiter<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.lock.inner.abandon(self.key, self.ticket);
        }
    }
}

/// Exclusive ownership of one session key. Releases on drop.
pub struct KeyLockGuard {
    inner: Arc<KeyLockInner>,
    key: String,
    ticket: u64,
}

impl KeyLockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for KeyLockGuard {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("KeyLockGuard")
            .field("key", &self.key)
            .field("ticket", &self.ticket)
            .finish()
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        self.inner.release(&self.key, self.ticket);
    }
}
