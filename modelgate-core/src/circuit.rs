//! Per-`(tenant, provider)` circuit breaker state (§3 `CircuitState`, §4.4).
//!
//! The database row is the single source of truth; [`CircuitCache`] is the
//! ~10s advisory in-memory front documented in §5 ("short in-memory cache
//! fronts reads and is invalidated on every write"). Transitions themselves
//! live in [`crate::resilience::circuit_breaker`]; this module only holds the
//! persisted shape and the cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CircuitState {
    pub state: CircuitStateKind,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_state_change: DateTime<Utc>,
}

impl CircuitState {
    pub fn closed() -> Self {
        Self {
            state: CircuitStateKind::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_state_change: Utc::now(),
        }
    }
}

const CACHE_TTL: Duration = Duration::from_secs(10);

struct Entry {
    state: CircuitState,
    cached_at: Instant,
}

/// `tenant:provider -> CircuitState` with a ~10s TTL front, as specified in
/// §5's "Shared mutable state" list. Reads take a snapshot; any write
/// invalidates the entry immediately so the next read goes to the database.
#[derive(Clone, Default)]
pub struct CircuitCache {
    entries: Arc<DashMap<String, Entry>>,
}

fn key(tenant: &str, provider: &str) -> String {
    format!("{tenant}:{provider}")
}

impl CircuitCache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Returns the cached state if present and not yet expired.
    pub fn get(&self, tenant: &str, provider: &str) -> Option<CircuitState> {
        let k = key(tenant, provider);
        let entry = self.entries.get(&k)?;
        if entry.cached_at.elapsed() > CACHE_TTL {
            drop(entry);
            self.entries.remove(&k);
            return None;
        }
        Some(entry.state.clone())
    }

    /// Installs a freshly-read-or-written state into the cache.
    pub fn put(&self, tenant: &str, provider: &str, state: CircuitState) {
        self.entries.insert(
            key(tenant, provider),
            Entry {
                state,
                cached_at: Instant::now(),
            },
        );
    }

    /// Invalidates one `(tenant, provider)` entry. Called on every database write.
    pub fn invalidate(&self, tenant: &str, provider: &str) {
        self.entries.remove(&key(tenant, provider));
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// In-memory `(tenant, provider) -> CircuitState` table standing in for the
/// `circuit_breaker_state` tenant-database table outside of production
/// wiring (§3.1 `DataAccessPort`, in-memory implementation).
#[derive(Clone, Default)]
pub struct InMemoryCircuitStore {
    rows: Arc<std::sync::Mutex<HashMap<String, CircuitState>>>,
}

impl InMemoryCircuitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, tenant: &str, provider: &str) -> CircuitState {
        self.rows
            .lock()
            .unwrap()
            .get(&key(tenant, provider))
            .cloned()
            .unwrap_or_else(CircuitState::closed)
    }

    pub fn store(&self, tenant: &str, provider: &str, state: CircuitState) {
        self.rows
            .lock()
            .unwrap()
            .insert(key(tenant, provider), state);
    }
}
