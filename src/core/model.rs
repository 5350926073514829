//! Domain model for tenants, routes and their resilience policies.
//!
//! These types are read from the external store and, for the cached views,
//! serialised into the shared cache. All persisted JSON uses camelCase field
//! names so records written by the administrative surface and by other
//! gateway processes interoperate.
use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::upstream::UpstreamUrl;

/// An isolation unit authenticated by its own api-key.
///
/// This is the tenant *view*: it never carries the api-key hash and is what
/// gets cached under `tenant:apikey:{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSettings>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tenant together with its stored api-key hash, as read from the store.
/// The hash never leaves the authenticator.
#[derive(Debug, Clone)]
pub struct TenantRecord {
    pub tenant: Tenant,
    pub api_key_hash: String,
}

/// Per-tenant request quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    pub requests_per_second: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_size: Option<u32>,
}

impl RateLimitSettings {
    /// Effective window limit: the burst size when configured, the sustained
    /// rate otherwise.
    pub fn effective_limit(&self) -> u32 {
        self.burst_size.unwrap_or(self.requests_per_second)
    }
}

/// Scope of one rate-limit window in the shared cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitScope {
    Tenant(String),
    TenantRoute { tenant_id: String, route_id: String },
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tenant(id) => write!(f, "tenant:{id}"),
            Self::TenantRoute { tenant_id, route_id } => {
                write!(f, "tenant:{tenant_id}:route:{route_id}")
            }
        }
    }
}

/// How a route's path is matched against the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    Exact,
    Prefix,
    Regex,
}

impl PathType {
    /// Parse the store's text representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exact" => Some(Self::Exact),
            "prefix" => Some(Self::Prefix),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// Upstream selection strategy for a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadBalancingStrategy {
    #[serde(rename = "round-robin")]
    RoundRobin,
    #[serde(rename = "weighted")]
    Weighted,
    #[serde(rename = "random")]
    Random,
}

impl LoadBalancingStrategy {
    /// Parse the store's text representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "round-robin" => Some(Self::RoundRobin),
            "weighted" => Some(Self::Weighted),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

/// A concrete origin server that can serve a route's requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamConfig {
    /// Absolute origin, validated on admission.
    pub url: UpstreamUrl,
    /// Relative selection weight, `>= 1`. Defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    /// Per-upstream request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// A declarative proxy rule owned by one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub tenant_id: String,
    /// HTTP verb, or `*` to match any method.
    pub method: String,
    pub path: String,
    pub path_type: PathType,
    pub upstreams: Vec<UpstreamConfig>,
    pub load_balancing: LoadBalancingStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resilience: Option<ResilienceConfig>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    /// The circuit-breaker policy, when present and enabled.
    pub fn circuit_breaker(&self) -> Option<&CircuitBreakerConfig> {
        self.resilience
            .as_ref()
            .and_then(|r| r.circuit_breaker.as_ref())
            .filter(|cb| cb.enabled)
    }

    /// The retry policy, when present and enabled.
    pub fn retry(&self) -> Option<&RetryConfig> {
        self.resilience
            .as_ref()
            .and_then(|r| r.retry.as_ref())
            .filter(|r| r.enabled)
    }

    /// The health-check policy, when present and enabled.
    pub fn health_check(&self) -> Option<&HealthCheckConfig> {
        self.resilience
            .as_ref()
            .and_then(|r| r.health_check.as_ref())
            .filter(|h| h.enabled)
    }

    /// The fallback policy, when present and enabled.
    pub fn fallback(&self) -> Option<&FallbackConfig> {
        self.resilience
            .as_ref()
            .and_then(|r| r.fallback.as_ref())
            .filter(|f| f.enabled)
    }

    /// The timeout policy, when present.
    pub fn timeout_policy(&self) -> Option<&TimeoutConfig> {
        self.resilience.as_ref().and_then(|r| r.timeout.as_ref())
    }
}

/// Header and path rewriting applied around the upstream call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestTransform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseTransform>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderOps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_rewrite: Option<PathRewrite>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderOps>,
}

/// Ordered header operations: remove, then set, then add.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeaderOps {
    /// Header names to drop (case-insensitive).
    #[serde(default)]
    pub remove: Vec<String>,
    /// Headers to write unconditionally.
    #[serde(default)]
    pub set: HashMap<String, String>,
    /// Headers to insert only when absent (case-insensitive existence check).
    #[serde(default)]
    pub add: HashMap<String, String>,
}

/// Regex path rewrite. `replacement` supports back-references (`$1`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRewrite {
    pub pattern: String,
    pub replacement: String,
}

/// Per-route resilience policies. Each sub-policy is independently opt-in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackConfig>,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_success_threshold() -> u32 {
    2
}
fn default_breaker_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Consecutive failures in CLOSED before the breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Successes in HALF_OPEN required to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// How long OPEN lasts before a HALF_OPEN probe is allowed, in ms.
    #[serde(default = "default_breaker_timeout_ms", rename = "timeout")]
    pub timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_breaker_timeout_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_retryable_status_codes() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

/// Upstream call deadlines in milliseconds, resolvable per method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub by_method: Option<HashMap<String, u64>>,
}

fn default_healthy_threshold() -> u32 {
    2
}
fn default_unhealthy_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Probe path appended to the upstream URL, e.g. `/health`.
    pub endpoint: String,
    /// Probe cadence in milliseconds; clamped to >= 5000 at run time.
    pub interval_ms: u64,
    /// Per-probe timeout in milliseconds.
    pub timeout_ms: u64,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
}

/// Synthetic response returned when a real upstream response cannot be
/// produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackConfig {
    #[serde(default)]
    pub enabled: bool,
    pub status_code: u16,
    pub content_type: FallbackContentType,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackContentType {
    #[serde(rename = "application/json")]
    Json,
    #[serde(rename = "text/plain")]
    Text,
    #[serde(rename = "text/html")]
    Html,
}

impl FallbackContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Text => "text/plain",
            Self::Html => "text/html",
        }
    }
}
