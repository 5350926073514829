//! Resilience scenarios through the full pipeline: circuit breaking, retry
//! recovery, timeouts and fallbacks.
mod common;

use std::time::Duration;

use common::{Scripted, ScriptedClient, build_handler, get, route, tenant_record};
use http_body_util::BodyExt;
use hyper::{StatusCode, header};
use portico::{
    core::model::{
        CircuitBreakerConfig, FallbackConfig, FallbackContentType, PathType, ResilienceConfig,
        RetryConfig,
    },
    ports::HttpClientError,
};

fn breaker(failure_threshold: u32, timeout_ms: u64) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        enabled: true,
        failure_threshold,
        success_threshold: 2,
        timeout_ms,
    }
}

#[tokio::test]
async fn test_breaker_opens_after_threshold_and_short_circuits() {
    let client = ScriptedClient::new(vec![
        Scripted::Status(500),
        Scripted::Status(500),
        Scripted::Status(500),
        Scripted::Status(200),
    ]);
    let mut guarded = route("r-cb", "GET", "/svc", PathType::Exact, "http://svc:80");
    guarded.resilience = Some(ResilienceConfig {
        circuit_breaker: Some(breaker(3, 30_000)),
        ..ResilienceConfig::default()
    });
    let handler = build_handler(vec![tenant_record(None)], vec![guarded], client.clone());

    // Three 500s, each surfaced as 502, trip the breaker.
    for _ in 0..3 {
        let response = handler.handle_request(get("/svc"), None).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    // Fourth request observes OPEN: 503 without an upstream call.
    let response = handler.handle_request(get("/svc"), None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(client.request_count(), 3);
}

#[tokio::test]
async fn test_breaker_half_open_probe_after_timeout() {
    let client = ScriptedClient::new(vec![Scripted::Status(500), Scripted::Status(200)]);
    let mut guarded = route("r-cb", "GET", "/svc", PathType::Exact, "http://svc:80");
    guarded.resilience = Some(ResilienceConfig {
        circuit_breaker: Some(breaker(1, 100)),
        ..ResilienceConfig::default()
    });
    let handler = build_handler(vec![tenant_record(None)], vec![guarded], client.clone());

    // Trip the breaker.
    let tripped = handler.handle_request(get("/svc"), None).await;
    assert_eq!(tripped.status(), StatusCode::BAD_GATEWAY);

    // Still open: short-circuited.
    let blocked = handler.handle_request(get("/svc"), None).await;
    assert_eq!(blocked.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(client.request_count(), 1);

    // After the open timeout one probe goes through and succeeds.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let probed = handler.handle_request(get("/svc"), None).await;
    assert_eq!(probed.status(), StatusCode::OK);
    assert_eq!(client.request_count(), 2);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_503() {
    let client = ScriptedClient::new(vec![Scripted::Status(503), Scripted::Body(200, "recovered")]);
    let mut retried = route("r-retry", "GET", "/svc", PathType::Exact, "http://svc:80");
    retried.resilience = Some(ResilienceConfig {
        retry: Some(RetryConfig {
            enabled: true,
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 50,
            retryable_status_codes: vec![500, 502, 503, 504],
        }),
        ..ResilienceConfig::default()
    });
    let handler = build_handler(vec![tenant_record(None)], vec![retried], client.clone());

    let response = handler.handle_request(get("/svc"), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"recovered");
    assert_eq!(client.request_count(), 2);
}

#[tokio::test]
async fn test_exhausted_retries_surface_502() {
    let client = ScriptedClient::new(vec![
        Scripted::Status(503),
        Scripted::Status(503),
        Scripted::Status(503),
    ]);
    let mut retried = route("r-retry", "GET", "/svc", PathType::Exact, "http://svc:80");
    retried.resilience = Some(ResilienceConfig {
        retry: Some(RetryConfig {
            enabled: true,
            max_retries: 2,
            base_delay_ms: 5,
            max_delay_ms: 20,
            retryable_status_codes: vec![500, 502, 503, 504],
        }),
        ..ResilienceConfig::default()
    });
    let handler = build_handler(vec![tenant_record(None)], vec![retried], client.clone());

    let response = handler.handle_request(get("/svc"), None).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(client.request_count(), 3);
}

#[tokio::test]
async fn test_timeout_maps_to_504() {
    let client = ScriptedClient::new(vec![Scripted::Error(HttpClientError::Timeout(100))]);
    let handler = build_handler(
        vec![tenant_record(None)],
        vec![route("r-slow", "GET", "/slow", PathType::Exact, "http://svc:80")],
        client,
    );

    let response = handler.handle_request(get("/slow"), None).await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_fallback_served_when_breaker_open() {
    let client = ScriptedClient::new(vec![Scripted::Status(500)]);
    let mut guarded = route("r-fb", "GET", "/svc", PathType::Exact, "http://svc:80");
    guarded.resilience = Some(ResilienceConfig {
        circuit_breaker: Some(breaker(1, 30_000)),
        fallback: Some(FallbackConfig {
            enabled: true,
            status_code: 503,
            content_type: FallbackContentType::Json,
            body: r#"{"down":true}"#.into(),
        }),
        ..ResilienceConfig::default()
    });
    let handler = build_handler(vec![tenant_record(None)], vec![guarded], client.clone());

    // Trip the breaker; the failure itself already serves the fallback.
    let first = handler.handle_request(get("/svc"), None).await;
    assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Open breaker: fallback exactly as configured, no upstream call.
    let second = handler.handle_request(get("/svc"), None).await;
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        second.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"down":true}"#);
    assert_eq!(client.request_count(), 1);
}

#[tokio::test]
async fn test_connection_error_without_fallback_is_502() {
    let client = ScriptedClient::new(vec![Scripted::Error(HttpClientError::Connection(
        "connection refused".into(),
    ))]);
    let handler = build_handler(
        vec![tenant_record(None)],
        vec![route("r-down", "GET", "/down", PathType::Exact, "http://svc:80")],
        client,
    );

    let response = handler.handle_request(get("/down"), None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_fallback_on_connection_error() {
    let client = ScriptedClient::new(vec![Scripted::Error(HttpClientError::Connection(
        "connection refused".into(),
    ))]);
    let mut covered = route("r-down", "GET", "/down", PathType::Exact, "http://svc:80");
    covered.resilience = Some(ResilienceConfig {
        fallback: Some(FallbackConfig {
            enabled: true,
            status_code: 200,
            content_type: FallbackContentType::Text,
            body: "static backup".into(),
        }),
        ..ResilienceConfig::default()
    });
    let handler = build_handler(vec![tenant_record(None)], vec![covered], client);

    let response = handler.handle_request(get("/down"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"static backup");
}
