//! Outbound HTTP client adapter over Hyper with Rustls (HTTP/1.1 + HTTP/2).
//!
//! Responsibilities:
//! * Sets the `Host` header from the target URI
//! * Forces the request version to HTTP/1.1 and lets ALPN negotiate h2
//! * Bounds every call with the caller-supplied timeout
//! * Issues GET health probes with their own deadline
//!
//! Retries and circuit breaking are layered above this adapter by the core.
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::{HttpClient, HttpClientError, HttpClientResult};

pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Body>,
}

impl HttpClientAdapter {
    /// Create a new HTTP client adapter.
    pub fn new() -> Result<Self> {
        // Install the default crypto provider if nothing has yet.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();
        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("failed to add a native certificate to the root store");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(errors = ?native_certs.errors, "some native certificates failed to load");
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Body>(https_connector);

        tracing::debug!("outbound HTTP client ready (HTTP/1.1, ALPN h2)");
        Ok(Self { client })
    }

    fn set_host_header(req: &mut Request<Body>) -> HttpClientResult<()> {
        let Some(host) = req.uri().host() else {
            return Err(HttpClientError::InvalidRequest(
                "outgoing URI has no host".to_string(),
            ));
        };
        let host_value = match req.uri().port() {
            Some(port) => format!("{host}:{}", port.as_u16()),
            None => host.to_string(),
        };
        let value = HeaderValue::from_str(&host_value)
            .map_err(|e| HttpClientError::InvalidRequest(format!("invalid host header: {e}")))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<Body>,
        deadline: Duration,
    ) -> HttpClientResult<Response<Body>> {
        Self::set_host_header(&mut req)?;

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let outgoing = Request::from_parts(parts, body);

        let method = outgoing.method().clone();
        let uri = outgoing.uri().clone();

        match timeout(deadline, self.client.request(outgoing)).await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    %method,
                    %uri,
                    status = response.status().as_u16(),
                    "upstream responded"
                );
                let (parts, hyper_body) = response.into_parts();
                Ok(Response::from_parts(parts, Body::new(hyper_body)))
            }
            Ok(Err(e)) => {
                tracing::debug!(%method, %uri, error = %e, "upstream request failed");
                Err(HttpClientError::Connection(format!(
                    "request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::debug!(%method, %uri, timeout_ms = deadline.as_millis() as u64, "upstream request timed out");
                Err(HttpClientError::Timeout(deadline.as_millis() as u64))
            }
        }
    }

    async fn probe(&self, url: &str, deadline: Duration) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method("GET")
            .uri(url)
            .version(Version::HTTP_11)
            .body(Body::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        match timeout(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let healthy = response.status().is_success();
                // Drain the body so the connection can be reused.
                let _ = response.into_body().collect().await;
                Ok(healthy)
            }
            Ok(Err(e)) => {
                tracing::debug!(url, error = %e, "health probe connection failed");
                Ok(false)
            }
            Err(_) => Err(HttpClientError::Timeout(deadline.as_millis() as u64)),
        }
    }
}
