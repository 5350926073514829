use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for outbound HTTP operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connection-level failure reaching the upstream (refused, reset,
    /// unresolved host)
    #[error("connection error: {0}")]
    Connection(String),

    /// The per-attempt timeout elapsed before the upstream answered
    #[error("request timed out after {0} ms")]
    Timeout(u64),

    /// The request could not be constructed or sent as given
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for outbound HTTP operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port for making HTTP requests to upstreams.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send a request to an upstream, bounded by `timeout`. The timeout is
    /// released on every exit path; elapsing maps to
    /// [`HttpClientError::Timeout`].
    async fn send_request(
        &self,
        req: Request<Body>,
        timeout: Duration,
    ) -> HttpClientResult<Response<Body>>;

    /// Issue a GET health probe against `url`.
    ///
    /// Resolves to `Ok(true)` on a 2xx response, `Ok(false)` on any other
    /// status or connection failure, and `Err(Timeout)` when the probe
    /// deadline elapses.
    async fn probe(&self, url: &str, timeout: Duration) -> HttpClientResult<bool>;
}
