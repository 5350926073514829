//! Small shared helpers: cache-key hashing, metric label normalisation,
//! connection tracking and graceful shutdown plumbing.
pub mod connection_tracker;
pub mod graceful_shutdown;

use md5::{Digest, Md5};

pub use connection_tracker::ConnectionTracker;
pub use graceful_shutdown::GracefulShutdown;

/// First 8 hex characters of the MD5 digest of an upstream URL.
///
/// Used as the stable suffix of circuit-breaker and health cache keys so the
/// `(tenant, route, upstream)` triple survives upstream-list edits.
pub fn url_hash8(url: &str) -> String {
    let digest = Md5::digest(url.as_bytes());
    hex::encode(&digest[..4])
}

/// Normalise an upstream URL into a Prometheus label value: scheme prefix and
/// any trailing slash are stripped.
pub fn normalize_upstream_label(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    stripped.trim_end_matches('/').to_string()
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
