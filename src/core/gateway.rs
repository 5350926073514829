//! Core proxy orchestration service.
//!
//! `GatewayService` composes the route matcher, load balancer, circuit
//! breakers, health reads, retry policy and transforms into the end-to-end
//! forwarding flow for one authenticated, rate-allowed request. It is
//! re-entrant across requests: per-request state stays on the stack, and the
//! only shared mutable state it touches lives in the shared cache.
use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use axum::body::Body;
use bytes::Bytes;
use hyper::{
    HeaderMap, Method, Request, Response,
    header::{self, HeaderName, HeaderValue},
};

use crate::{
    core::{
        circuit_breaker::CircuitBreakers,
        error::GatewayError,
        fallback::{fallback_response, should_use_fallback},
        health::HealthCheckManager,
        matcher::{MatchError, RouteMatch, RouteMatcher},
        model::{FallbackConfig, PathType, Route, Tenant, UpstreamConfig},
        retry::{AttemptError, with_retry},
        transform::{apply_header_ops, rewrite_path},
    },
    metrics,
    ports::{HttpClient, HttpClientError},
    utils::normalize_upstream_label,
};

/// Applied when neither the route's timeout policy nor the upstream sets one.
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;

/// Inbound headers copied onto the upstream request.
const FORWARD_ALLOWLIST: [HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::ACCEPT_ENCODING,
    header::USER_AGENT,
    header::AUTHORIZATION,
];

/// Hop-by-hop headers stripped from upstream responses.
const HOP_BY_HOP_HEADERS: [&str; 3] = ["connection", "keep-alive", "transfer-encoding"];

/// The request as seen by the orchestrator: path and query already split,
/// body buffered (empty for GET/HEAD).
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
    pub host: Option<String>,
    pub scheme: String,
}

/// Successful proxy outcome: the response to forward plus the matched route
/// path for metric labelling.
#[derive(Debug)]
pub struct ProxyReply {
    pub response: Response<Body>,
    pub route_path: String,
}

/// Orchestrates the proxy stage of the pipeline.
pub struct GatewayService {
    matcher: RouteMatcher,
    breakers: CircuitBreakers,
    health: Arc<HealthCheckManager>,
    http_client: Arc<dyn HttpClient>,
}

impl GatewayService {
    pub fn new(
        matcher: RouteMatcher,
        breakers: CircuitBreakers,
        health: Arc<HealthCheckManager>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            matcher,
            breakers,
            health,
            http_client,
        }
    }

    /// Proxy one authenticated, rate-allowed request.
    pub async fn proxy(
        &self,
        tenant: &Tenant,
        inbound: InboundRequest,
    ) -> Result<ProxyReply, GatewayError> {
        let matched = self
            .matcher
            .match_route(&tenant.id, inbound.method.as_str(), &inbound.path)
            .await
            .map_err(|e| match e {
                MatchError::Store(err) => GatewayError::from(err),
                MatchError::Selection(err) => GatewayError::Internal {
                    message: err.to_string(),
                },
            })?;

        let Some(RouteMatch { route, upstream }) = matched else {
            return Err(GatewayError::NoRoute);
        };

        tracing::debug!(
            route_id = %route.id,
            upstream = %upstream.url,
            "route matched"
        );

        let route_path = route.path.clone();
        let response = self.forward(tenant, &route, &upstream, &inbound).await?;
        Ok(ProxyReply {
            response,
            route_path,
        })
    }

    async fn forward(
        &self,
        tenant: &Tenant,
        route: &Route,
        upstream: &UpstreamConfig,
        inbound: &InboundRequest,
    ) -> Result<Response<Body>, GatewayError> {
        let fallback_cfg = route.fallback();

        if let Some(health_cfg) = route.health_check() {
            // Registration is idempotent; the first request through a route
            // brings its prober up.
            self.health
                .register(&tenant.id, &route.id, upstream.url.as_str(), health_cfg);
            if !self
                .health
                .is_healthy(&tenant.id, &route.id, upstream.url.as_str())
                .await
            {
                return deny(
                    fallback_cfg,
                    GatewayError::UpstreamUnhealthy {
                        message: "Upstream service is unhealthy",
                    },
                );
            }
        }

        let breaker_cfg = route.circuit_breaker();
        if let Some(cb) = breaker_cfg {
            if !self
                .breakers
                .can_execute(cb, &tenant.id, &route.id, upstream.url.as_str())
                .await
            {
                return deny(
                    fallback_cfg,
                    GatewayError::UpstreamUnhealthy {
                        message: "Circuit breaker is open",
                    },
                );
            }
        }

        let upstream_url = build_upstream_url(route, upstream, inbound);
        let upstream_headers = assemble_request_headers(tenant, route, inbound);
        let timeout_ms = resolve_timeout(route, upstream, inbound.method.as_str());
        let body = if matches!(inbound.method, Method::GET | Method::HEAD) {
            Bytes::new()
        } else {
            inbound.body.clone()
        };

        // The effective retry policy also supplies the retryable status set;
        // a 5xx in that set is an error outcome even with retries disabled.
        let retry_cfg = route.retry().cloned().unwrap_or_default();

        let client = Arc::clone(&self.http_client);
        let method = inbound.method.clone();
        let tenant_label = tenant.id.clone();
        let upstream_label = normalize_upstream_label(upstream.url.as_str());
        let retryable_codes = retry_cfg.retryable_status_codes.clone();
        let attempt_url = upstream_url.clone();
        let attempt_headers = upstream_headers.clone();

        let attempt_fn = move |attempt: u32| {
            let client = Arc::clone(&client);
            let method = method.clone();
            let url = attempt_url.clone();
            let headers = attempt_headers.clone();
            let body = body.clone();
            let tenant_label = tenant_label.clone();
            let upstream_label = upstream_label.clone();
            let retryable_codes = retryable_codes.clone();

            async move {
                let started = Instant::now();
                let result =
                    send_attempt(client, method.clone(), url, headers, body, timeout_ms).await;
                metrics::observe_upstream_duration(
                    &tenant_label,
                    &upstream_label,
                    method.as_str(),
                    started.elapsed().as_secs_f64(),
                );

                match result {
                    Ok(response) => {
                        let status = response.status();
                        metrics::record_upstream_request(
                            &tenant_label,
                            &upstream_label,
                            method.as_str(),
                            status.as_u16(),
                        );
                        if retryable_codes.contains(&status.as_u16()) {
                            tracing::debug!(attempt, %status, "upstream answered retryable status");
                            Err(AttemptError::RetryableStatus { status, response })
                        } else {
                            Ok(response)
                        }
                    }
                    Err(error) => {
                        metrics::record_upstream_request(
                            &tenant_label,
                            &upstream_label,
                            method.as_str(),
                            599,
                        );
                        Err(match error {
                            HttpClientError::Timeout(after_ms) => {
                                AttemptError::TimedOut { after_ms }
                            }
                            HttpClientError::Connection(message) => {
                                AttemptError::Transport { message }
                            }
                            HttpClientError::InvalidRequest(message) => {
                                AttemptError::Fatal { message }
                            }
                        })
                    }
                }
            }
        };

        let retry_tenant = tenant.id.clone();
        let retry_route = route.id.clone();
        let on_retry = move |attempt: u32, _delay: Duration| {
            metrics::record_retry_attempt(&retry_tenant, &retry_route, attempt);
        };

        match with_retry(&retry_cfg, attempt_fn, on_retry).await {
            Ok(response) => {
                let status = response.status();
                if let Some(cb) = breaker_cfg {
                    if status.is_success() {
                        self.breakers
                            .record_success(cb, &tenant.id, &route.id, upstream.url.as_str())
                            .await;
                    } else if status.as_u16() >= 500 {
                        self.breakers
                            .record_failure(cb, &tenant.id, &route.id, upstream.url.as_str())
                            .await;
                    }
                }
                Ok(finish_response(response, route))
            }
            Err(error) => {
                if let Some(cb) = breaker_cfg {
                    self.breakers
                        .record_failure(cb, &tenant.id, &route.id, upstream.url.as_str())
                        .await;
                }
                tracing::warn!(
                    route_id = %route.id,
                    upstream = %upstream.url,
                    error = %error,
                    "upstream attempts exhausted"
                );
                match error {
                    AttemptError::TimedOut { .. } => {
                        deny(fallback_cfg, GatewayError::UpstreamTimeout)
                    }
                    AttemptError::RetryableStatus { status, .. } => deny(
                        fallback_cfg,
                        GatewayError::UpstreamUnreachable {
                            message: format!("upstream answered {status} with no retries left"),
                        },
                    ),
                    AttemptError::Transport { message } | AttemptError::Fatal { message } => {
                        deny(fallback_cfg, GatewayError::UpstreamUnreachable { message })
                    }
                }
            }
        }
    }
}

/// Fallback when configured, the terminal error otherwise.
fn deny(
    fallback_cfg: Option<&FallbackConfig>,
    error: GatewayError,
) -> Result<Response<Body>, GatewayError> {
    if should_use_fallback(fallback_cfg) {
        if let Some(cfg) = fallback_cfg {
            tracing::debug!(status = cfg.status_code, "serving configured fallback");
            return Ok(fallback_response(cfg));
        }
    }
    Err(error)
}

/// Build the upstream URL for a matched request.
///
/// Prefix routes forward the remainder after the route path; exact and regex
/// routes forward the full request path. The configured path rewrite applies
/// to that forward path, and the original query string is appended verbatim.
fn build_upstream_url(route: &Route, upstream: &UpstreamConfig, inbound: &InboundRequest) -> String {
    let mut forward_path = match route.path_type {
        PathType::Prefix => inbound
            .path
            .strip_prefix(&route.path)
            .unwrap_or("")
            .to_string(),
        PathType::Exact | PathType::Regex => inbound.path.clone(),
    };

    if let Some(rewrite) = route
        .transform
        .as_ref()
        .and_then(|t| t.request.as_ref())
        .and_then(|r| r.path_rewrite.as_ref())
    {
        forward_path = rewrite_path(&forward_path, rewrite);
    }

    let mut url = format!("{}{}", upstream.url.as_str().trim_end_matches('/'), forward_path);
    if let Some(query) = &inbound.query {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Assemble upstream request headers: allowlisted inbound headers, the
/// forwarding set, then the route's request header transform.
fn assemble_request_headers(tenant: &Tenant, route: &Route, inbound: &InboundRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for name in &FORWARD_ALLOWLIST {
        if let Some(value) = inbound.headers.get(name) {
            headers.insert(name.clone(), value.clone());
        }
    }

    if let Some(ip) = inbound.client_ip {
        let forwarded_for = match inbound
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
        {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), value);
        }
    }

    if let Some(host) = &inbound.host {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(&inbound.scheme) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), value);
    }
    if let Ok(value) = HeaderValue::from_str(&tenant.id) {
        headers.insert(HeaderName::from_static("x-tenant-id"), value);
    }

    if let Some(ops) = route
        .transform
        .as_ref()
        .and_then(|t| t.request.as_ref())
        .and_then(|r| r.headers.as_ref())
    {
        apply_header_ops(&mut headers, ops);
    }

    headers
}

/// Resolve the per-attempt timeout: method override, then the policy
/// default, then the upstream's own timeout, then the global default.
fn resolve_timeout(route: &Route, upstream: &UpstreamConfig, method: &str) -> u64 {
    if let Some(policy) = route.timeout_policy() {
        if let Some(by_method) = &policy.by_method {
            if let Some(ms) = by_method.get(method) {
                return *ms;
            }
        }
        if let Some(default_ms) = policy.default {
            return default_ms;
        }
    }
    upstream.timeout.unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_MS)
}

async fn send_attempt(
    client: Arc<dyn HttpClient>,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Bytes,
    timeout_ms: u64,
) -> Result<Response<Body>, HttpClientError> {
    let mut builder = Request::builder().method(method).uri(&url);
    if let Some(request_headers) = builder.headers_mut() {
        *request_headers = headers;
    }
    let request = builder
        .body(Body::from(body))
        .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

    client
        .send_request(request, Duration::from_millis(timeout_ms))
        .await
}

/// Strip hop-by-hop headers and apply the response transform.
fn finish_response(mut response: Response<Body>, route: &Route) -> Response<Body> {
    for name in HOP_BY_HOP_HEADERS {
        response.headers_mut().remove(name);
    }
    if let Some(ops) = route
        .transform
        .as_ref()
        .and_then(|t| t.response.as_ref())
        .and_then(|r| r.headers.as_ref())
    {
        apply_header_ops(response.headers_mut(), ops);
    }
    response
}
