//! HTTP pipeline host.
//!
//! Owns the inbound hook order — authenticate, rate-limit, proxy — plus the
//! unauthenticated operational endpoints (`/health`, `/ready`, `/metrics`)
//! and the translation between wire requests and the orchestrator's view.
use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{body::Body, response::IntoResponse};
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode, header};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    core::{
        AuthOutcome, GatewayError, GatewayService, InboundRequest, RateLimitDecision,
        SlidingWindowLimiter, TenantAuthenticator,
        model::RateLimitScope,
    },
    metrics,
    ports::{RouteStore, SharedCache},
    tracing_setup,
    utils::{ConnectionTracker, connection_tracker::ConnectionGuard, now_millis},
};

/// Administrative surface prefix. CRUD for tenants and routes is mounted by
/// an external service; this core never proxies the prefix.
const ADMIN_PREFIX: &str = "/admin";

const API_KEY_HEADER: &str = "x-api-key";

/// Request handler for the gateway listener.
pub struct HttpHandler {
    authenticator: TenantAuthenticator,
    limiter: SlidingWindowLimiter,
    gateway: Arc<GatewayService>,
    connection_tracker: Arc<ConnectionTracker>,
    cache: Arc<dyn SharedCache>,
    store: Arc<dyn RouteStore>,
    metrics_enabled: bool,
}

struct Handled {
    response: Response<Body>,
    /// Metric labels; `None` for operational endpoints, which stay out of
    /// the request families.
    labels: Option<(String, String)>,
}

impl HttpHandler {
    pub fn new(
        authenticator: TenantAuthenticator,
        limiter: SlidingWindowLimiter,
        gateway: Arc<GatewayService>,
        connection_tracker: Arc<ConnectionTracker>,
        cache: Arc<dyn SharedCache>,
        store: Arc<dyn RouteStore>,
        metrics_enabled: bool,
    ) -> Self {
        Self {
            authenticator,
            limiter,
            gateway,
            connection_tracker,
            cache,
            store,
            metrics_enabled,
        }
    }

    /// Handle one inbound request end to end.
    pub async fn handle_request(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let request_id = Uuid::new_v4().to_string();

        let _connection_guard =
            client_addr.map(|addr| ConnectionGuard::new(&self.connection_tracker, addr));

        let span = tracing_setup::create_request_span(method.as_str(), &path, &request_id);
        let handled = self.dispatch(req, client_addr).instrument(span.clone()).await;

        let duration = started.elapsed();
        let status = handled.response.status();
        span.record("http.status_code", status.as_u16());
        span.record("duration_ms", duration.as_millis() as u64);

        if let Some((tenant_label, route_label)) = &handled.labels {
            metrics::record_http_request(
                tenant_label,
                method.as_str(),
                route_label,
                status.as_u16(),
            );
            metrics::observe_http_duration(
                tenant_label,
                method.as_str(),
                route_label,
                duration.as_secs_f64(),
            );
        }

        tracing::info!(
            parent: &span,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            "request completed"
        );

        handled.response
    }

    async fn dispatch(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Handled {
        let path = req.uri().path().to_string();

        match path.as_str() {
            "/health" => Handled {
                response: liveness_response(),
                labels: None,
            },
            "/ready" => Handled {
                response: self.readiness_response().await,
                labels: None,
            },
            "/metrics" => Handled {
                response: self.metrics_response(),
                labels: None,
            },
            p if p == ADMIN_PREFIX || p.starts_with("/admin/") => Handled {
                // Mounted by the external admin service; never proxied here.
                response: GatewayError::NoRoute.into_response(),
                labels: None,
            },
            _ => self.proxy_flow(req, client_addr).await,
        }
    }

    async fn proxy_flow(&self, req: Request<Body>, client_addr: Option<SocketAddr>) -> Handled {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let Some(api_key) = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
        else {
            return Handled {
                response: GatewayError::Unauthorized {
                    message: "Missing API key",
                }
                .into_response(),
                labels: Some(("unknown".to_string(), path)),
            };
        };

        let tenant = match self.authenticator.validate_api_key(&api_key).await {
            Ok(AuthOutcome::Authenticated(tenant)) => tenant,
            Ok(AuthOutcome::Unknown) => {
                return Handled {
                    response: GatewayError::Unauthorized {
                        message: "Invalid API key",
                    }
                    .into_response(),
                    labels: Some(("unknown".to_string(), path)),
                };
            }
            Ok(AuthOutcome::InactiveTenant) => {
                return Handled {
                    response: GatewayError::Forbidden {
                        message: "Tenant is not active",
                    }
                    .into_response(),
                    labels: Some(("unknown".to_string(), path)),
                };
            }
            Err(err) => {
                return Handled {
                    response: GatewayError::from(err).into_response(),
                    labels: Some(("unknown".to_string(), path)),
                };
            }
        };

        tracing::Span::current().record("tenant.id", tenant.id.as_str());

        let mut window: Option<RateLimitDecision> = None;
        if let Some(settings) = tenant.rate_limit {
            let scope = RateLimitScope::Tenant(tenant.id.clone());
            let decision = match self.limiter.check(&scope, &settings).await {
                Ok(decision) => decision,
                Err(err) => {
                    return Handled {
                        response: GatewayError::from(err).into_response(),
                        labels: Some((tenant.id.clone(), path)),
                    };
                }
            };
            metrics::set_rate_limit_remaining(&tenant.id, decision.remaining);

            if !decision.allowed {
                metrics::record_rate_limit_hit(&tenant.id);
                tracing::info!(tenant_id = %tenant.id, "request rate limited");
                let mut response = GatewayError::RateLimited {
                    retry_after_secs: decision.retry_after_secs(now_millis() as u64),
                }
                .into_response();
                apply_rate_limit_headers(&mut response, &decision);
                return Handled {
                    response,
                    labels: Some((tenant.id.clone(), path)),
                };
            }
            window = Some(decision);
        }

        let (parts, body) = req.into_parts();
        let body_bytes = if matches!(method, Method::GET | Method::HEAD) {
            bytes::Bytes::new()
        } else {
            match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    tracing::debug!(error = %e, "failed to read request body");
                    let response = (
                        StatusCode::BAD_REQUEST,
                        axum::Json(serde_json::json!({
                            "error": "Bad Request",
                            "message": "Failed to read request body",
                        })),
                    )
                        .into_response();
                    return Handled {
                        response,
                        labels: Some((tenant.id.clone(), path)),
                    };
                }
            }
        };

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.host().map(str::to_string));

        let inbound = InboundRequest {
            method: method.clone(),
            path: path.clone(),
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body: body_bytes,
            client_ip: client_addr.map(|addr| addr.ip()),
            host,
            scheme: "http".to_string(),
        };

        match self.gateway.proxy(&tenant, inbound).await {
            Ok(reply) => {
                let mut response = reply.response;
                if let Some(decision) = &window {
                    apply_rate_limit_headers(&mut response, decision);
                }
                Handled {
                    response,
                    labels: Some((tenant.id.clone(), reply.route_path)),
                }
            }
            Err(err) => {
                let mut response = err.into_response();
                if let Some(decision) = &window {
                    apply_rate_limit_headers(&mut response, decision);
                }
                Handled {
                    response,
                    labels: Some((tenant.id.clone(), path)),
                }
            }
        }
    }

    async fn readiness_response(&self) -> Response<Body> {
        let cache_ok = match self.cache.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "readiness: cache ping failed");
                false
            }
        };
        let store_ok = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "readiness: store ping failed");
                false
            }
        };

        let ready = cache_ok && store_ok;
        let status = if ready {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let body = serde_json::json!({
            "status": if ready { "ready" } else { "not ready" },
            "checks": {
                "cache": if cache_ok { "ok" } else { "failed" },
                "store": if store_ok { "ok" } else { "failed" },
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        (status, axum::Json(body)).into_response()
    }

    fn metrics_response(&self) -> Response<Body> {
        if !self.metrics_enabled {
            return GatewayError::NoRoute.into_response();
        }
        match metrics::render() {
            Some(text) => Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, metrics::PROMETHEUS_CONTENT_TYPE)
                .body(Body::from(text))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                "metrics recorder not installed",
            )
                .into_response(),
        }
    }
}

fn liveness_response() -> Response<Body> {
    let body = serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    axum::Json(body).into_response()
}

fn apply_rate_limit_headers(response: &mut Response<Body>, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = decision.limit.to_string().parse() {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = decision.remaining.to_string().parse() {
        headers.insert("x-ratelimit-remaining", value);
    }
    // Reset is advertised in Unix seconds.
    if let Ok(value) = (decision.reset_at_ms / 1_000).to_string().parse() {
        headers.insert("x-ratelimit-reset", value);
    }
}
