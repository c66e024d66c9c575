use std::collections::HashMap;

use dashmap::DashMap;
use tracing::trace;

/// Per-key monotonic counter of lifecycle operations begun.
///
/// A poll cycle snapshots the counters before it queries the multiplexer and
/// discards any observation whose key has moved on by the time it is applied.
/// Counters are never removed, so a snapshot taken before a key was
/// deregistered can not match the key after it is registered again.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    generations: DashMap<String, u64>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a lock-protected operation on `key`.
    ///
    /// Must be called synchronously right after the key lock is acquired.
    pub fn bump(
        &self,
        key: &str,
    ) -> u64 {
        let mut generation = self.generations.entry(key.to_string()).or_insert(0);
        *generation += 1;
        trace!(%key, generation = *generation, "generation bumped");
        *generation
    }

    pub fn current(
        &self,
        key: &str,
    ) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    /// Generation of every key seen so far.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.generations
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Generations of `keys` only; unseen keys report 0.
    pub fn snapshot_of<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a String>,
    ) -> HashMap<String, u64> {
        keys.into_iter().map(|key| (key.clone(), self.current(key))).collect()
    }
}
