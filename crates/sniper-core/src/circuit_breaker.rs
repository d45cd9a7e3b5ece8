//! Circuit breaker for protecting outbound dependencies.
//!
//! Every outbound network dependency (RPC, quote API, honeypot providers)
//! is wrapped in a named breaker. State is persisted to the shared store so
//! a restarted process does not hammer a dependency that was already down.

use crate::store::{keys, SharedStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through.
    Closed,
    /// Failure threshold breached, requests are rejected.
    Open,
    /// Probing whether the dependency recovered.
    HalfOpen,
}

/// Configuration for a circuit breaker instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the monitoring window before opening.
    pub failure_threshold: u32,
    /// Consecutive successes in half-open before closing.
    pub success_threshold: u32,
    /// How long to reject requests after opening, in milliseconds.
    pub open_timeout_ms: u64,
    /// Sliding window over which failures are counted, in milliseconds.
    pub monitoring_window_ms: u64,
    /// Whether state is serialized to the shared store.
    pub persistence_enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_ms: 60_000,
            monitoring_window_ms: 120_000,
            persistence_enabled: true,
        }
    }
}

/// A state transition, broadcast to observers for operator alerting.
#[derive(Debug, Clone)]
pub struct StateChangeEvent {
    pub breaker: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub at: DateTime<Utc>,
}

/// Immutable snapshot of a breaker's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub consecutive_probe_successes: u32,
    pub failures_in_window: usize,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// Persisted form of breaker state, keyed `circuit_breaker:{name}`.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    consecutive_probe_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    failure_timestamps: Vec<DateTime<Utc>>,
}

struct BreakerState {
    state: CircuitState,
    /// Failure instants inside the monitoring window, oldest first.
    failure_timestamps: Vec<DateTime<Utc>>,
    /// Totals since the last reset.
    failure_count: u64,
    success_count: u64,
    /// Consecutive successes while half-open.
    consecutive_probe_successes: u32,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_timestamps: Vec::new(),
            failure_count: 0,
            success_count: 0,
            consecutive_probe_successes: 0,
            last_failure_at: None,
            last_success_at: None,
            next_attempt_at: None,
        }
    }

    fn prune_window(&mut self, window: ChronoDuration, now: DateTime<Utc>) {
        let cutoff = now - window;
        self.failure_timestamps.retain(|t| *t > cutoff);
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The breaker is open; the protected call was never made.
    #[error("circuit breaker '{name}' is open, retry after {retry_after_ms}ms")]
    Open { name: String, retry_after_ms: i64 },

    /// The protected call itself failed. Never swallowed.
    #[error(transparent)]
    Inner(E),
}

/// A named circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<BreakerState>,
    store: Option<Arc<dyn SharedStore>>,
    event_tx: broadcast::Sender<StateChangeEvent>,
}

impl CircuitBreaker {
    /// Create a breaker without persistence.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            config,
            state: RwLock::new(BreakerState::new()),
            store: None,
            event_tx,
        }
    }

    /// Create a breaker whose state is persisted to the shared store.
    pub fn with_persistence(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        store: Arc<dyn SharedStore>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            name: name.into(),
            config,
            state: RwLock::new(BreakerState::new()),
            store: Some(store),
            event_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe to state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChangeEvent> {
        self.event_tx.subscribe()
    }

    /// Recover state from the shared store. Fails soft: an unreadable or
    /// missing snapshot leaves the breaker closed.
    pub async fn load_state(&self) -> bool {
        let store = match &self.store {
            Some(s) if self.config.persistence_enabled => s,
            _ => return false,
        };

        let raw = match store.get(&keys::circuit_breaker(&self.name)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!(breaker = %self.name, error = %e, "Failed to load circuit breaker state");
                return false;
            }
        };

        let persisted: PersistedState = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                warn!(breaker = %self.name, error = %e, "Discarding corrupt circuit breaker state");
                return false;
            }
        };

        let mut state = self.state.write().await;
        state.state = persisted.state;
        state.failure_count = persisted.failure_count;
        state.success_count = persisted.success_count;
        state.consecutive_probe_successes = persisted.consecutive_probe_successes;
        state.last_failure_at = persisted.last_failure_at;
        state.last_success_at = persisted.last_success_at;
        state.next_attempt_at = persisted.next_attempt_at;
        state.failure_timestamps = persisted.failure_timestamps;

        info!(breaker = %self.name, state = ?state.state, "Recovered circuit breaker state");
        true
    }

    /// Execute a protected call.
    ///
    /// If the breaker is open and the open timeout has not elapsed, the call
    /// is rejected without being made. Otherwise the call runs and its
    /// outcome is recorded; the caller always observes the inner error.
    pub async fn execute<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        {
            let mut state = self.state.write().await;
            if state.state == CircuitState::Open {
                let now = Utc::now();
                match state.next_attempt_at {
                    Some(next_attempt) if now < next_attempt => {
                        return Err(CircuitBreakerError::Open {
                            name: self.name.clone(),
                            retry_after_ms: (next_attempt - now).num_milliseconds(),
                        });
                    }
                    _ => {
                        self.transition(&mut state, CircuitState::HalfOpen, now);
                        state.consecutive_probe_successes = 0;
                    }
                }
            }
        }

        match f.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    /// Whether a call made right now would be allowed through.
    pub async fn is_available(&self) -> bool {
        let state = self.state.read().await;
        match state.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => state
                .next_attempt_at
                .map(|next| Utc::now() >= next)
                .unwrap_or(true),
        }
    }

    /// Immutable snapshot of the current counters.
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.state.read().await;
        CircuitBreakerMetrics {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            consecutive_probe_successes: state.consecutive_probe_successes,
            failures_in_window: state.failure_timestamps.len(),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            next_attempt_at: state.next_attempt_at,
        }
    }

    /// Force the breaker closed and clear all counters.
    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        let from = state.state;
        *state = BreakerState::new();
        if from != CircuitState::Closed {
            self.emit(from, CircuitState::Closed);
        }
        info!(breaker = %self.name, "Circuit breaker reset");
        self.persist(&state).await;
    }

    // Private methods

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.success_count += 1;
        state.last_success_at = Some(now);

        if state.state == CircuitState::HalfOpen {
            state.consecutive_probe_successes += 1;
            if state.consecutive_probe_successes >= self.config.success_threshold {
                self.transition(&mut state, CircuitState::Closed, now);
                state.failure_timestamps.clear();
                state.consecutive_probe_successes = 0;
                state.next_attempt_at = None;
            }
        }

        self.persist(&state).await;
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        let now = Utc::now();
        state.failure_count += 1;
        state.last_failure_at = Some(now);
        state.failure_timestamps.push(now);
        state.prune_window(
            ChronoDuration::milliseconds(self.config.monitoring_window_ms as i64),
            now,
        );

        match state.state {
            CircuitState::Closed => {
                if state.failure_timestamps.len() >= self.config.failure_threshold as usize {
                    self.transition(&mut state, CircuitState::Open, now);
                    state.next_attempt_at =
                        Some(now + ChronoDuration::milliseconds(self.config.open_timeout_ms as i64));
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Open, now);
                state.consecutive_probe_successes = 0;
                state.next_attempt_at =
                    Some(now + ChronoDuration::milliseconds(self.config.open_timeout_ms as i64));
            }
            CircuitState::Open => {}
        }

        self.persist(&state).await;
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState, _now: DateTime<Utc>) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        match to {
            CircuitState::Open => error!(
                breaker = %self.name,
                failures_in_window = state.failure_timestamps.len(),
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => {
                info!(breaker = %self.name, "Circuit breaker half-open, probing")
            }
            CircuitState::Closed => info!(breaker = %self.name, "Circuit breaker closed"),
        }
        self.emit(from, to);
    }

    fn emit(&self, from: CircuitState, to: CircuitState) {
        let _ = self.event_tx.send(StateChangeEvent {
            breaker: self.name.clone(),
            from,
            to,
            at: Utc::now(),
        });
    }

    async fn persist(&self, state: &BreakerState) {
        let store = match &self.store {
            Some(s) if self.config.persistence_enabled => s,
            _ => return,
        };

        let persisted = PersistedState {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            consecutive_probe_successes: state.consecutive_probe_successes,
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            next_attempt_at: state.next_attempt_at,
            failure_timestamps: state.failure_timestamps.clone(),
        };

        let raw = match serde_json::to_string(&persisted) {
            Ok(raw) => raw,
            Err(e) => {
                error!(breaker = %self.name, error = %e, "Failed to serialize circuit breaker state");
                return;
            }
        };

        let ttl = std::time::Duration::from_millis(
            self.config.monitoring_window_ms + self.config.open_timeout_ms,
        );
        if let Err(e) = store
            .set(&keys::circuit_breaker(&self.name), &raw, Some(ttl))
            .await
        {
            // Persistence is best-effort; the in-memory breaker stays correct.
            error!(breaker = %self.name, error = %e, "Failed to persist circuit breaker state");
        } else {
            debug!(breaker = %self.name, state = ?state.state, "Persisted circuit breaker state");
        }
    }
}

/// Hands out process-wide named breaker instances.
///
/// Owned by the composition root and passed down as a constructor dependency;
/// one instance per dependency name per process.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    store: Option<Arc<dyn SharedStore>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Option<Arc<dyn SharedStore>>, default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            store,
            default_config,
        }
    }

    /// Get the named breaker, creating it with the default config if needed.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with_config(name, self.default_config.clone())
    }

    /// Get the named breaker, creating it with a specific config if needed.
    pub fn get_with_config(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let breaker = match &self.store {
                    Some(store) => CircuitBreaker::with_persistence(name, config, store.clone()),
                    None => CircuitBreaker::new(name, config),
                };
                Arc::new(breaker)
            })
            .clone()
    }

    /// Load persisted state for every breaker created so far.
    pub async fn load_all(&self) {
        for entry in self.breakers.iter() {
            entry.value().load_state().await;
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }
}
