use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::RuntimeState;
use crate::LifecycleError;
use crate::Result;
use crate::SessionConfig;

/// One registered session: its immutable config and its runtime state
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub config: Arc<SessionConfig>,
    pub state: RuntimeState,
}

/// Read-only copy of a session handed to callers and UIs
pub type SessionSnapshot = SessionEntry;

/// Sole owner of the key → (config, state) map.
///
/// All mutation goes through [`SessionRegistry::update`], so no caller ever
/// observes a half-written `RuntimeState`.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the runtime state for a new key (`Stopped`, zero failures).
    pub fn register(
        &self,
        config: SessionConfig,
    ) -> Result<()> {
        let key = config.key.clone();
        let mut sessions = self.inner.write();
        if sessions.contains_key(&key) {
            return Err(LifecycleError::AlreadyRegistered(key).into());
        }
        info!(%key, host = ?config.host, "session registered");
        sessions.insert(
            key,
            SessionEntry {
                config: Arc::new(config),
                state: RuntimeState::default(),
            },
        );
        Ok(())
    }

    /// Replaces the config of an existing key, keeping its runtime state.
    pub fn replace_config(
        &self,
        config: SessionConfig,
    ) -> Result<()> {
        let mut sessions = self.inner.write();
        match sessions.get_mut(&config.key) {
            Some(entry) => {
                entry.config = Arc::new(config);
                Ok(())
            }
            None => Err(LifecycleError::KeyNotFound(config.key).into()),
        }
    }

    pub fn deregister(
        &self,
        key: &str,
    ) -> Option<SessionEntry> {
        let removed = self.inner.write().remove(key);
        if removed.is_some() {
            info!(%key, "session deregistered");
        }
        removed
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.inner.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn config(
        &self,
        key: &str,
    ) -> Result<Arc<SessionConfig>> {
        self.read(key, |entry| entry.config.clone())
    }

    /// Provides read access to one entry
    pub fn read<R>(
        &self,
        key: &str,
        f: impl FnOnce(&SessionEntry) -> R,
    ) -> Result<R> {
        let sessions = self.inner.read();
        sessions
            .get(key)
            .map(f)
            .ok_or_else(|| LifecycleError::KeyNotFound(key.to_string()).into())
    }

    /// Provides write access to one entry
    pub fn update<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut SessionEntry) -> R,
    ) -> Result<R> {
        let mut sessions = self.inner.write();
        sessions
            .get_mut(key)
            .map(f)
            .ok_or_else(|| LifecycleError::KeyNotFound(key.to_string()).into())
    }

    /// Copy of every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions = self.inner.read();
        let mut entries: Vec<SessionSnapshot> = sessions.values().cloned().collect();
        entries.sort_by(|a, b| a.config.key.cmp(&b.config.key));
        entries
    }

    /// Registered keys grouped by host (`None` is the local host).
    pub fn keys_by_host(&self) -> BTreeMap<Option<String>, Vec<String>> {
        let sessions = self.inner.read();
        let mut groups: BTreeMap<Option<String>, Vec<String>> = BTreeMap::new();
        for (key, entry) in sessions.iter() {
            groups.entry(entry.config.host.clone()).or_default().push(key.clone());
        }
        for keys in groups.values_mut() {
            keys.sort();
        }
        groups
    }
}
