//! Static fallback responses.
use axum::body::Body;
use hyper::{Response, StatusCode, header};

use crate::core::model::FallbackConfig;

/// Whether a fallback should stand in for a failed upstream outcome.
pub fn should_use_fallback(config: Option<&FallbackConfig>) -> bool {
    config.is_some_and(|c| c.enabled)
}

/// Build the configured synthetic response. The body is sent as-is, without
/// templating.
pub fn fallback_response(config: &FallbackConfig) -> Response<Body> {
    let status =
        StatusCode::from_u16(config.status_code).unwrap_or(StatusCode::SERVICE_UNAVAILABLE);

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, config.content_type.as_str())
        .body(Body::from(config.body.clone()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::from(config.body.clone()));
            *response.status_mut() = status;
            response
        })
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::core::model::FallbackContentType;

    fn config(enabled: bool) -> FallbackConfig {
        FallbackConfig {
            enabled,
            status_code: 503,
            content_type: FallbackContentType::Json,
            body: r#"{"down":true}"#.into(),
        }
    }

    #[test]
    fn test_should_use_fallback() {
        assert!(should_use_fallback(Some(&config(true))));
        assert!(!should_use_fallback(Some(&config(false))));
        assert!(!should_use_fallback(None));
    }

    #[tokio::test]
    async fn test_fallback_response_shape() {
        let response = fallback_response(&config(true));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], br#"{"down":true}"#);
    }

    #[test]
    fn test_invalid_status_code_degrades_to_503() {
        let mut cfg = config(true);
        cfg.status_code = 0;
        let response = fallback_response(&cfg);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
