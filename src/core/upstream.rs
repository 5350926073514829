//! Type-safe upstream URLs.
//!
//! Upstream origins are validated when route data is admitted into the core
//! (store row decoding, config deserialization), so a malformed URL is
//! rejected long before a request is attempted against it.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised for an upstream URL that cannot be used as a request origin.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid upstream URL: {0}")]
pub struct InvalidUpstreamUrl(String);

/// A validated upstream origin, optionally carrying its own path prefix.
///
/// The wrapped string is kept verbatim: circuit-breaker and health cache
/// keys hash the stored form, so every gateway process must observe the
/// same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UpstreamUrl {
    url: String,
    is_secure: bool,
}

impl UpstreamUrl {
    /// Wrap a URL string, rejecting anything that is not an absolute
    /// `http://` or `https://` origin with a host.
    pub fn new(url: &str) -> Result<Self, InvalidUpstreamUrl> {
        let is_secure = url.starts_with("https://");
        let is_http = url.starts_with("http://");

        if !is_secure && !is_http {
            return Err(InvalidUpstreamUrl(format!(
                "must start with http:// or https://, got '{url}'"
            )));
        }

        let authority = &url[if is_secure { "https://".len() } else { "http://".len() }..];
        if authority.is_empty() || authority.starts_with('/') {
            return Err(InvalidUpstreamUrl(format!("missing host in '{url}'")));
        }

        Ok(Self {
            url: url.to_string(),
            is_secure,
        })
    }

    /// The underlying URL as a string reference.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Whether the origin is HTTPS.
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// The underlying URL as an owned string.
    pub fn into_string(self) -> String {
        self.url
    }
}

impl FromStr for UpstreamUrl {
    type Err = InvalidUpstreamUrl;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UpstreamUrl {
    type Error = InvalidUpstreamUrl;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<UpstreamUrl> for String {
    fn from(url: UpstreamUrl) -> Self {
        url.url
    }
}

impl fmt::Display for UpstreamUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_and_https_accepted() {
        let plain = UpstreamUrl::new("http://svc:8080").unwrap();
        assert_eq!(plain.as_str(), "http://svc:8080");
        assert!(!plain.is_secure());

        let secure = UpstreamUrl::new("https://api.example.com/v2").unwrap();
        assert_eq!(secure.as_str(), "https://api.example.com/v2");
        assert!(secure.is_secure());
    }

    #[test]
    fn test_missing_scheme_rejected() {
        assert!(UpstreamUrl::new("svc:8080").is_err());
        assert!(UpstreamUrl::new("ftp://svc:8080").is_err());
        assert!(UpstreamUrl::new("").is_err());
    }

    #[test]
    fn test_missing_host_rejected() {
        assert!(UpstreamUrl::new("http://").is_err());
        assert!(UpstreamUrl::new("https:///path-only").is_err());
    }

    #[test]
    fn test_from_str_round_trip() {
        let url: UpstreamUrl = "http://svc:8080".parse().unwrap();
        assert_eq!(url.to_string(), "http://svc:8080");
        assert_eq!(url.clone().into_string(), "http://svc:8080");
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let ok: UpstreamUrl = serde_json::from_str(r#""http://svc:80""#).unwrap();
        assert_eq!(ok.as_str(), "http://svc:80");

        let err = serde_json::from_str::<UpstreamUrl>(r#""not-a-url""#);
        assert!(err.is_err());

        let raw = serde_json::to_string(&ok).unwrap();
        assert_eq!(raw, r#""http://svc:80""#);
    }
}
