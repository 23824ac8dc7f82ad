//! One-Time Initialization Gate.
//!
//! `ensure_run_once(key, init)` runs `init` at most once per marker scope,
//! across process restarts. The persisted marker is the only source of truth;
//! nothing is cached in memory. Within a process a per-key mutex serialises
//! check, run and persist, so concurrent callers block and then see the marker
//! the winner wrote. A key's mutex lives only while some caller holds it.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::store::MarkerStore;

/// How long a marker stays satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "version")]
pub enum Scope {
    /// Until the app's data is cleared or it is reinstalled.
    #[default]
    Install,
    /// Until the app is upgraded to another version.
    AppVersion(String),
}

impl Scope {
    /// Storage key for `key` under this scope.
    pub fn scoped_key(&self, key: &str) -> String {
        match self {
            Scope::Install => key.to_string(),
            Scope::AppVersion(version) => format!("{key}@{version}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub ran: bool,
}

pub struct OneTimeGate<S> {
    store: S,
    scope: Scope,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: MarkerStore> OneTimeGate<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            scope: Scope::Install,
            locks: DashMap::new(),
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether `key` is satisfied. An unreadable marker counts as unset.
    pub fn is_satisfied(&self, key: &str) -> bool {
        let scoped = self.scope.scoped_key(key);
        match self.store.is_satisfied(&scoped) {
            Ok(satisfied) => satisfied,
            Err(e) => {
                tracing::warn!(key = %scoped, "Marker unreadable, treating as unset: {e}");
                false
            }
        }
    }

    pub fn ensure_run_once<F, E>(&self, key: &str, init: F) -> Result<RunOutcome, GateError<E>>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let scoped = self.scope.scoped_key(key);
        let lock = self.locks.entry(scoped.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock();
            self.run_locked(key, &scoped, init)
        };
        drop(lock);
        // Both sides run under the shard lock, so a count of one means no waiter.
        self.locks.remove_if(&scoped, |_, l| Arc::strong_count(l) == 1);
        result
    }

    fn run_locked<F, E>(&self, key: &str, scoped: &str, init: F) -> Result<RunOutcome, GateError<E>>
    where
        F: FnOnce() -> Result<(), E>,
    {
        if self.is_satisfied(key) {
            tracing::debug!(key = %scoped, "One-time initialization already done");
            return Ok(RunOutcome { ran: false });
        }

        tracing::info!(key = %scoped, "Running one-time initialization");
        init().map_err(GateError::Init)?;
        self.store.mark_satisfied(scoped).map_err(GateError::Persist)?;
        Ok(RunOutcome { ran: true })
    }
}
