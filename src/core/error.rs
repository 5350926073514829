//! Request-level error taxonomy and its HTTP mapping.
use axum::{
    body::Body,
    response::{IntoResponse, Response},
};
use hyper::{StatusCode, header};
use thiserror::Error;

use crate::ports::{CacheError, StoreError};

/// Terminal request outcomes that short-circuit the proxy pipeline.
///
/// Fallback responses, when configured, are produced before any of the
/// upstream 5xx variants reach the client.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Missing or unknown credentials.
    #[error("{message}")]
    Unauthorized { message: &'static str },

    /// Credentials resolved to a tenant that is not active.
    #[error("{message}")]
    Forbidden { message: &'static str },

    /// Quota exhausted for the tenant's window.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// No active route of the tenant matched the request.
    #[error("no route matched the request path")]
    NoRoute,

    /// Health-check deny or breaker-open.
    #[error("{message}")]
    UpstreamUnhealthy { message: &'static str },

    /// The final upstream attempt was aborted by its timeout.
    #[error("upstream request timed out")]
    UpstreamTimeout,

    /// Connection failure, exhausted retries or a non-retryable network
    /// failure.
    #[error("upstream unreachable: {message}")]
    UpstreamUnreachable { message: String },

    /// Shared-cache or store failure in the critical path.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// HTTP status the error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NoRoute => StatusCode::NOT_FOUND,
            Self::UpstreamUnhealthy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Value of the `error` field in the JSON body.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "Unauthorized",
            Self::Forbidden { .. } => "Forbidden",
            Self::RateLimited { .. } => "Too Many Requests",
            Self::NoRoute => "Not Found",
            Self::UpstreamUnhealthy { .. } => "Service Unavailable",
            Self::UpstreamTimeout => "Gateway Timeout",
            Self::UpstreamUnreachable { .. } => "Bad Gateway",
            Self::Internal { .. } => "Internal Server Error",
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl From<CacheError> for GatewayError {
    fn from(err: CacheError) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "error": self.label(),
            "message": self.to_string(),
        });

        let mut builder = Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "application/json");

        if let Self::RateLimited { retry_after_secs } = &self {
            body["retryAfter"] = serde_json::json!(retry_after_secs);
            builder = builder.header(header::RETRY_AFTER, retry_after_secs.to_string());
        }

        // Internal details stay in the logs, not on the wire.
        if let Self::Internal { message } = &self {
            tracing::error!(error = %message, "request failed with internal error");
            body["message"] = serde_json::json!("An internal error occurred");
        }

        builder
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            GatewayError::Unauthorized { message: "missing api key" }.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Forbidden { message: "tenant inactive" }.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::RateLimited { retry_after_secs: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(GatewayError::NoRoute.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::UpstreamTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            GatewayError::UpstreamUnreachable { message: "refused".into() }.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::Internal { message: "boom".into() }.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rate_limited_response_carries_retry_after() {
        let response = GatewayError::RateLimited { retry_after_secs: 2 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "2");
    }

    #[test]
    fn test_store_error_maps_to_internal() {
        let err: GatewayError = StoreError::Query("connection refused".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
