//! Prometheus metric surface for the gateway.
//!
//! This module wraps the `metrics` crate macros with typed helpers so call
//! sites stay terse and label names stay consistent. A
//! `metrics-exporter-prometheus` recorder is installed at startup; the
//! `/metrics` endpoint renders it in the text exposition format.
//!
//! Provided families (labels in parentheses):
//! * `gateway_http_requests_total` (tenant_id, method, route, status_code)
//! * `gateway_http_request_duration_seconds` (tenant_id, method, route)
//! * `gateway_active_connections`
//! * `gateway_upstream_requests_total` (tenant_id, upstream, method, status_code)
//! * `gateway_upstream_request_duration_seconds` (tenant_id, upstream, method)
//! * `gateway_circuit_breaker_state` (tenant_id, route_id, upstream)
//! * `gateway_circuit_breaker_transitions_total` (…, from_state, to_state)
//! * `gateway_rate_limit_hits_total` (tenant_id)
//! * `gateway_rate_limit_remaining` (tenant_id)
//! * `gateway_health_check_status` (tenant_id, route_id, upstream)
//! * `gateway_retry_attempts_total` (tenant_id, route_id, attempt)
use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const GATEWAY_HTTP_REQUESTS_TOTAL: &str = "gateway_http_requests_total";
pub const GATEWAY_HTTP_REQUEST_DURATION_SECONDS: &str = "gateway_http_request_duration_seconds";
pub const GATEWAY_ACTIVE_CONNECTIONS: &str = "gateway_active_connections";
pub const GATEWAY_UPSTREAM_REQUESTS_TOTAL: &str = "gateway_upstream_requests_total";
pub const GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS: &str =
    "gateway_upstream_request_duration_seconds";
pub const GATEWAY_CIRCUIT_BREAKER_STATE: &str = "gateway_circuit_breaker_state";
pub const GATEWAY_CIRCUIT_BREAKER_TRANSITIONS_TOTAL: &str =
    "gateway_circuit_breaker_transitions_total";
pub const GATEWAY_RATE_LIMIT_HITS_TOTAL: &str = "gateway_rate_limit_hits_total";
pub const GATEWAY_RATE_LIMIT_REMAINING: &str = "gateway_rate_limit_remaining";
pub const GATEWAY_HEALTH_CHECK_STATUS: &str = "gateway_health_check_status";
pub const GATEWAY_RETRY_ATTEMPTS_TOTAL: &str = "gateway_retry_attempts_total";

/// Latency buckets in seconds, shared by the request and upstream histograms.
pub const DURATION_BUCKETS_SECONDS: [f64; 12] = [
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and register metric descriptions.
///
/// Idempotent across tests; the first successful installation wins.
pub fn init_metrics() -> eyre::Result<()> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(GATEWAY_HTTP_REQUEST_DURATION_SECONDS.to_string()),
                &DURATION_BUCKETS_SECONDS,
            )
            .map_err(|e| eyre::eyre!("failed to configure request duration buckets: {e}"))?
            .set_buckets_for_metric(
                Matcher::Full(GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS.to_string()),
                &DURATION_BUCKETS_SECONDS,
            )
            .map_err(|e| eyre::eyre!("failed to configure upstream duration buckets: {e}"))?
            .install_recorder()
            .map_err(|e| eyre::eyre!("failed to install Prometheus recorder: {e}"))?;

        describe_metrics();
        tracing::info!("Prometheus metrics recorder installed");
        Ok::<_, eyre::Report>(handle)
    })?;
    Ok(())
}

/// Render the current registry in the Prometheus text format, if the
/// recorder has been installed.
pub fn render() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
}

fn describe_metrics() {
    describe_counter!(
        GATEWAY_HTTP_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests handled by the gateway."
    );
    describe_histogram!(
        GATEWAY_HTTP_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests handled by the gateway."
    );
    describe_gauge!(
        GATEWAY_ACTIVE_CONNECTIONS,
        "Number of currently active client connections."
    );
    describe_counter!(
        GATEWAY_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests forwarded to upstreams (one per attempt)."
    );
    describe_histogram!(
        GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of individual upstream attempts."
    );
    describe_gauge!(
        GATEWAY_CIRCUIT_BREAKER_STATE,
        "Circuit breaker state per upstream (0=closed, 1=open, 2=half-open)."
    );
    describe_counter!(
        GATEWAY_CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
        Unit::Count,
        "Circuit breaker state transitions."
    );
    describe_counter!(
        GATEWAY_RATE_LIMIT_HITS_TOTAL,
        Unit::Count,
        "Requests denied by the rate limiter."
    );
    describe_gauge!(
        GATEWAY_RATE_LIMIT_REMAINING,
        "Remaining requests in the tenant's current window."
    );
    describe_gauge!(
        GATEWAY_HEALTH_CHECK_STATUS,
        "Health check status per upstream (1=healthy, 0=unhealthy)."
    );
    describe_counter!(
        GATEWAY_RETRY_ATTEMPTS_TOTAL,
        Unit::Count,
        "Retry attempts issued against upstreams."
    );
}

/// Count a completed inbound request.
pub fn record_http_request(tenant_id: &str, method: &str, route: &str, status: u16) {
    counter!(
        GATEWAY_HTTP_REQUESTS_TOTAL,
        "tenant_id" => tenant_id.to_string(),
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status_code" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn observe_http_duration(tenant_id: &str, method: &str, route: &str, seconds: f64) {
    histogram!(
        GATEWAY_HTTP_REQUEST_DURATION_SECONDS,
        "tenant_id" => tenant_id.to_string(),
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(seconds);
}

/// Set the active connection gauge.
pub fn set_active_connections(count: usize) {
    gauge!(GATEWAY_ACTIVE_CONNECTIONS).set(count as f64);
}

/// Count one upstream attempt. `status` is the upstream status code, or 599
/// when the attempt failed before a response arrived.
pub fn record_upstream_request(tenant_id: &str, upstream: &str, method: &str, status: u16) {
    counter!(
        GATEWAY_UPSTREAM_REQUESTS_TOTAL,
        "tenant_id" => tenant_id.to_string(),
        "upstream" => upstream.to_string(),
        "method" => method.to_string(),
        "status_code" => status.to_string()
    )
    .increment(1);
}

/// Record the duration of one upstream attempt.
pub fn observe_upstream_duration(tenant_id: &str, upstream: &str, method: &str, seconds: f64) {
    histogram!(
        GATEWAY_UPSTREAM_REQUEST_DURATION_SECONDS,
        "tenant_id" => tenant_id.to_string(),
        "upstream" => upstream.to_string(),
        "method" => method.to_string()
    )
    .record(seconds);
}

/// Set the breaker state gauge (0=closed, 1=open, 2=half-open).
pub fn set_circuit_breaker_state(tenant_id: &str, route_id: &str, upstream: &str, state: f64) {
    gauge!(
        GATEWAY_CIRCUIT_BREAKER_STATE,
        "tenant_id" => tenant_id.to_string(),
        "route_id" => route_id.to_string(),
        "upstream" => upstream.to_string()
    )
    .set(state);
}

/// Count one breaker transition.
pub fn record_circuit_breaker_transition(
    tenant_id: &str,
    route_id: &str,
    upstream: &str,
    from_state: &str,
    to_state: &str,
) {
    counter!(
        GATEWAY_CIRCUIT_BREAKER_TRANSITIONS_TOTAL,
        "tenant_id" => tenant_id.to_string(),
        "route_id" => route_id.to_string(),
        "upstream" => upstream.to_string(),
        "from_state" => from_state.to_string(),
        "to_state" => to_state.to_string()
    )
    .increment(1);
}

/// Count one rate-limit denial.
pub fn record_rate_limit_hit(tenant_id: &str) {
    counter!(
        GATEWAY_RATE_LIMIT_HITS_TOTAL,
        "tenant_id" => tenant_id.to_string()
    )
    .increment(1);
}

/// Publish the remaining quota observed on the latest check.
pub fn set_rate_limit_remaining(tenant_id: &str, remaining: u32) {
    gauge!(
        GATEWAY_RATE_LIMIT_REMAINING,
        "tenant_id" => tenant_id.to_string()
    )
    .set(f64::from(remaining));
}

/// Set the health gauge for an upstream (1=healthy, 0=unhealthy).
pub fn set_health_check_status(tenant_id: &str, route_id: &str, upstream: &str, healthy: bool) {
    gauge!(
        GATEWAY_HEALTH_CHECK_STATUS,
        "tenant_id" => tenant_id.to_string(),
        "route_id" => route_id.to_string(),
        "upstream" => upstream.to_string()
    )
    .set(if healthy { 1.0 } else { 0.0 });
}

/// Count one retry attempt (1-based attempt number).
pub fn record_retry_attempt(tenant_id: &str, route_id: &str, attempt: u32) {
    counter!(
        GATEWAY_RETRY_ATTEMPTS_TOTAL,
        "tenant_id" => tenant_id.to_string(),
        "route_id" => route_id.to_string(),
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        // A second installation attempt must not fail the process.
        let first = init_metrics();
        let second = init_metrics();
        assert!(first.is_ok() || PROMETHEUS_HANDLE.get().is_some());
        assert!(second.is_ok());
    }

    #[test]
    fn test_render_after_recording() {
        let _ = init_metrics();
        record_http_request("t-1", "GET", "/echo", 200);
        set_active_connections(3);
        if let Some(rendered) = render() {
            assert!(rendered.contains(GATEWAY_HTTP_REQUESTS_TOTAL));
        }
    }
}
