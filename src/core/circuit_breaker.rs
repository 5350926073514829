//! Distributed circuit breaker state machine.
//!
//! One breaker exists per `(tenant, route, upstream-url)` triple. State is a
//! JSON record in the shared cache so every gateway process observes the same
//! breaker; transitions race across processes, which is acceptable because
//! writes are full-record replacements and duplicate OPEN transitions are
//! harmless.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    core::model::CircuitBreakerConfig,
    metrics,
    ports::SharedCache,
    utils::{normalize_upstream_label, now_millis, url_hash8},
};

/// Breaker states. The wire encoding matches the records other gateway
/// processes write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    /// Gauge encoding: CLOSED=0, OPEN=1, HALF_OPEN=2.
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

/// Persisted breaker record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub last_failure_time: Option<i64>,
    pub last_state_change: i64,
}

impl Default for BreakerStatus {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: 0,
            successes: 0,
            last_failure_time: None,
            last_state_change: 0,
        }
    }
}

/// Cache key for one breaker triple.
pub fn breaker_key(tenant_id: &str, route_id: &str, upstream_url: &str) -> String {
    format!("cb:{tenant_id}:{route_id}:{}", url_hash8(upstream_url))
}

/// Breaker operations over the shared cache.
pub struct CircuitBreakers {
    cache: Arc<dyn SharedCache>,
}

impl CircuitBreakers {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }

    /// Whether a request may be issued against the upstream right now.
    ///
    /// OPEN breakers transition to HALF_OPEN once the configured timeout has
    /// elapsed. Cache failures fail open — the breaker must not cause its
    /// own outage.
    pub async fn can_execute(
        &self,
        config: &CircuitBreakerConfig,
        tenant_id: &str,
        route_id: &str,
        upstream_url: &str,
    ) -> bool {
        let key = breaker_key(tenant_id, route_id, upstream_url);
        let mut status = match self.load(&key).await {
            Some(status) => status,
            None => return true,
        };

        match status.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = now_millis();
                if now - status.last_state_change < config.timeout_ms as i64 {
                    return false;
                }
                let from = status.state;
                status.state = CircuitState::HalfOpen;
                status.successes = 0;
                status.last_state_change = now;
                self.persist(&key, &status, config, tenant_id, route_id, upstream_url, Some(from))
                    .await;
                true
            }
        }
    }

    /// Record a successful upstream response.
    pub async fn record_success(
        &self,
        config: &CircuitBreakerConfig,
        tenant_id: &str,
        route_id: &str,
        upstream_url: &str,
    ) {
        let key = breaker_key(tenant_id, route_id, upstream_url);
        let Some(mut status) = self.load(&key).await else {
            return;
        };

        match status.state {
            CircuitState::HalfOpen => {
                status.successes += 1;
                if status.successes >= config.success_threshold {
                    let from = status.state;
                    status.state = CircuitState::Closed;
                    status.failures = 0;
                    status.successes = 0;
                    status.last_state_change = now_millis();
                    tracing::info!(
                        tenant_id,
                        route_id,
                        upstream = %upstream_url,
                        "circuit breaker closed after successful probes"
                    );
                    self.persist(&key, &status, config, tenant_id, route_id, upstream_url, Some(from))
                        .await;
                } else {
                    self.persist(&key, &status, config, tenant_id, route_id, upstream_url, None)
                        .await;
                }
            }
            CircuitState::Closed if status.failures > 0 => {
                status.failures = 0;
                self.persist(&key, &status, config, tenant_id, route_id, upstream_url, None)
                    .await;
            }
            // Closed with a clean slate: nothing to write.
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Record a failed upstream outcome.
    pub async fn record_failure(
        &self,
        config: &CircuitBreakerConfig,
        tenant_id: &str,
        route_id: &str,
        upstream_url: &str,
    ) {
        let key = breaker_key(tenant_id, route_id, upstream_url);
        let mut status = self.load(&key).await.unwrap_or_default();
        let now = now_millis();
        status.last_failure_time = Some(now);

        match status.state {
            CircuitState::Closed => {
                status.failures += 1;
                if status.failures >= config.failure_threshold {
                    let from = status.state;
                    status.state = CircuitState::Open;
                    status.last_state_change = now;
                    tracing::warn!(
                        tenant_id,
                        route_id,
                        upstream = %upstream_url,
                        failures = status.failures,
                        "circuit breaker opened"
                    );
                    self.persist(&key, &status, config, tenant_id, route_id, upstream_url, Some(from))
                        .await;
                } else {
                    self.persist(&key, &status, config, tenant_id, route_id, upstream_url, None)
                        .await;
                }
            }
            CircuitState::HalfOpen => {
                let from = status.state;
                status.state = CircuitState::Open;
                status.successes = 0;
                status.last_state_change = now;
                tracing::warn!(
                    tenant_id,
                    route_id,
                    upstream = %upstream_url,
                    "circuit breaker reopened by half-open failure"
                );
                self.persist(&key, &status, config, tenant_id, route_id, upstream_url, Some(from))
                    .await;
            }
            // Already open: refresh the record so it does not expire mid-outage.
            CircuitState::Open => {
                self.persist(&key, &status, config, tenant_id, route_id, upstream_url, None)
                    .await;
            }
        }
    }

    /// Current state of a triple, for diagnostics.
    pub async fn current_state(
        &self,
        tenant_id: &str,
        route_id: &str,
        upstream_url: &str,
    ) -> CircuitState {
        let key = breaker_key(tenant_id, route_id, upstream_url);
        self.load(&key).await.unwrap_or_default().state
    }

    /// Load a record; `None` means "treat as default CLOSED without a write".
    async fn load(&self, key: &str) -> Option<BreakerStatus> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(key, error = %e, "undecodable breaker record, treating as closed");
                    Some(BreakerStatus::default())
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "breaker read failed");
                None
            }
        }
    }

    /// Persist a record, refreshing its TTL. Errors are logged and swallowed:
    /// breaker bookkeeping must never fail a request.
    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        key: &str,
        status: &BreakerStatus,
        config: &CircuitBreakerConfig,
        tenant_id: &str,
        route_id: &str,
        upstream_url: &str,
        transition_from: Option<CircuitState>,
    ) {
        let ttl_secs = config.timeout_ms / 1_000 + 60;
        match serde_json::to_string(status) {
            Ok(raw) => {
                if let Err(e) = self.cache.set_ex(key, &raw, ttl_secs).await {
                    tracing::warn!(key, error = %e, "breaker write failed");
                }
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "breaker serialization failed");
            }
        }

        let upstream_label = normalize_upstream_label(upstream_url);
        metrics::set_circuit_breaker_state(
            tenant_id,
            route_id,
            &upstream_label,
            status.state.gauge_value(),
        );
        if let Some(from) = transition_from {
            metrics::record_circuit_breaker_transition(
                tenant_id,
                route_id,
                &upstream_label,
                from.as_str(),
                status.state.as_str(),
            );
        }
    }
}
