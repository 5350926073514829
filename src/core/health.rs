//! Active upstream health checking.
//!
//! One background prober runs per registered `(tenant, route, upstream)`
//! triple. Probers own no route or tenant data — they carry the triple plus
//! a snapshot of the health policy, and publish results into the shared
//! cache where the proxy path reads them. Health is eventually consistent;
//! the request path never waits on a probe.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::{
    core::model::HealthCheckConfig,
    metrics,
    ports::{HttpClient, SharedCache},
    utils::{normalize_upstream_label, now_millis, url_hash8},
};

/// Probe cadence floor. Configured intervals below this are clamped up.
pub const MIN_PROBE_INTERVAL_MS: u64 = 5_000;

/// Persisted health record for one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub healthy: bool,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
    pub last_check_time: Option<i64>,
    pub last_success_time: Option<i64>,
    pub last_failure_time: Option<i64>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        // Optimistic: an upstream is healthy until probes prove otherwise.
        Self {
            healthy: true,
            consecutive_successes: 0,
            consecutive_failures: 0,
            last_check_time: None,
            last_success_time: None,
            last_failure_time: None,
        }
    }
}

impl HealthRecord {
    /// Fold one probe result into the record. Returns the new healthy flag
    /// if it flipped.
    pub fn observe(&mut self, success: bool, now: i64, config: &HealthCheckConfig) -> Option<bool> {
        self.last_check_time = Some(now);
        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
            self.last_success_time = Some(now);
            if !self.healthy && self.consecutive_successes >= config.healthy_threshold {
                self.healthy = true;
                return Some(true);
            }
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
            self.last_failure_time = Some(now);
            if self.healthy && self.consecutive_failures >= config.unhealthy_threshold {
                self.healthy = false;
                return Some(false);
            }
        }
        None
    }
}

/// Cache key for one health triple.
pub fn health_key(tenant_id: &str, route_id: &str, upstream_url: &str) -> String {
    format!("health:{tenant_id}:{route_id}:{}", url_hash8(upstream_url))
}

#[derive(Debug, Clone)]
struct ProbeSpec {
    tenant_id: String,
    route_id: String,
    upstream_url: String,
    config: HealthCheckConfig,
}

enum ProberEntry {
    /// Registered before the manager was started.
    Pending(ProbeSpec),
    Running(JoinHandle<()>),
}

/// Registry and scheduler for upstream probers.
pub struct HealthCheckManager {
    cache: Arc<dyn SharedCache>,
    http_client: Arc<dyn HttpClient>,
    probers: scc::HashMap<String, ProberEntry>,
    started: AtomicBool,
}

impl HealthCheckManager {
    pub fn new(cache: Arc<dyn SharedCache>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            cache,
            http_client,
            probers: scc::HashMap::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Register a prober for a triple. Returns `false` when the triple is
    /// already registered — re-registration is a no-op and the existing
    /// prober keeps running.
    pub fn register(
        &self,
        tenant_id: &str,
        route_id: &str,
        upstream_url: &str,
        config: &HealthCheckConfig,
    ) -> bool {
        let key = health_key(tenant_id, route_id, upstream_url);
        let spec = ProbeSpec {
            tenant_id: tenant_id.to_string(),
            route_id: route_id.to_string(),
            upstream_url: upstream_url.to_string(),
            config: config.clone(),
        };

        if self.probers.insert_sync(key.clone(), ProberEntry::Pending(spec)).is_err() {
            return false;
        }
        if self.started.load(Ordering::Acquire) {
            self.spawn_entry(&key);
        }
        tracing::debug!(tenant_id, route_id, upstream = %upstream_url, "health prober registered");
        true
    }

    /// Start probing. Pending registrations are spawned; later registrations
    /// spawn immediately.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut keys = Vec::new();
        self.probers.iter_sync(|key, _| {
            keys.push(key.clone());
            true
        });
        for key in keys {
            self.spawn_entry(&key);
        }
        tracing::info!(probers = self.probers.len(), "health check manager started");
    }

    fn spawn_entry(&self, key: &str) {
        let cache = self.cache.clone();
        let client = self.http_client.clone();
        self.probers.update_sync(key, |_, entry| {
            if let ProberEntry::Pending(spec) = entry {
                let spec = spec.clone();
                *entry = ProberEntry::Running(tokio::spawn(run_probe_loop(cache, client, spec)));
            }
        });
    }

    /// Stop and forget the prober for a triple.
    pub fn unregister(&self, tenant_id: &str, route_id: &str, upstream_url: &str) {
        let key = health_key(tenant_id, route_id, upstream_url);
        if let Some((_, entry)) = self.probers.remove_sync(&key) {
            if let ProberEntry::Running(handle) = entry {
                handle.abort();
            }
            tracing::debug!(tenant_id, route_id, upstream = %upstream_url, "health prober unregistered");
        }
    }

    /// Abort every prober. Called on shutdown.
    pub fn shutdown(&self) {
        let mut aborted = 0usize;
        self.probers.retain_sync(|_, entry| {
            if let ProberEntry::Running(handle) = entry {
                handle.abort();
                aborted += 1;
            }
            false
        });
        tracing::info!(aborted, "health check manager stopped");
    }

    /// Number of registered probers.
    pub fn prober_count(&self) -> usize {
        self.probers.len()
    }

    /// Latest cached health verdict for a triple.
    ///
    /// Missing records and cache failures read as healthy: probing is
    /// advisory and must not take an upstream out of rotation on its own
    /// infrastructure problems.
    pub async fn is_healthy(&self, tenant_id: &str, route_id: &str, upstream_url: &str) -> bool {
        let key = health_key(tenant_id, route_id, upstream_url);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str::<HealthRecord>(&raw)
                .map(|record| record.healthy)
                .unwrap_or(true),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "health read failed, treating upstream as healthy");
                true
            }
        }
    }
}

async fn run_probe_loop(
    cache: Arc<dyn SharedCache>,
    client: Arc<dyn HttpClient>,
    spec: ProbeSpec,
) {
    let interval_ms = spec.config.interval_ms.max(MIN_PROBE_INTERVAL_MS);
    let interval = Duration::from_millis(interval_ms);
    let probe_timeout = Duration::from_millis(spec.config.timeout_ms);
    let probe_url = format!(
        "{}{}",
        spec.upstream_url.trim_end_matches('/'),
        spec.config.endpoint
    );
    let key = health_key(&spec.tenant_id, &spec.route_id, &spec.upstream_url);
    let ttl_secs = interval_ms.saturating_mul(3) / 1_000;

    tracing::info!(
        upstream = %spec.upstream_url,
        probe_url = %probe_url,
        interval_ms,
        "health prober started"
    );

    loop {
        tokio::time::sleep(interval).await;

        let success = match client.probe(&probe_url, probe_timeout).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!(probe_url = %probe_url, error = %e, "health probe errored");
                false
            }
        };

        let mut record = match cache.get(&key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            _ => HealthRecord::default(),
        };

        if let Some(flipped_to) = record.observe(success, now_millis(), &spec.config) {
            if flipped_to {
                tracing::info!(upstream = %spec.upstream_url, "upstream is healthy again");
            } else {
                tracing::warn!(
                    upstream = %spec.upstream_url,
                    failures = record.consecutive_failures,
                    "upstream marked unhealthy"
                );
            }
        }

        match serde_json::to_string(&record) {
            Ok(raw) => {
                if let Err(e) = cache.set_ex(&key, &raw, ttl_secs).await {
                    tracing::warn!(key, error = %e, "health record write failed");
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "health record serialization failed"),
        }

        metrics::set_health_check_status(
            &spec.tenant_id,
            &spec.route_id,
            &normalize_upstream_label(&spec.upstream_url),
            record.healthy,
        );
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        adapters::MemoryCache,
        ports::{HttpClientError, HttpClientResult},
    };

    struct StaticProbeClient {
        healthy: bool,
    }

    #[async_trait]
    impl HttpClient for StaticProbeClient {
        async fn send_request(
            &self,
            _req: hyper::Request<axum::body::Body>,
            _timeout: Duration,
        ) -> HttpClientResult<hyper::Response<axum::body::Body>> {
            Err(HttpClientError::Connection("not used in tests".into()))
        }

        async fn probe(&self, _url: &str, _timeout: Duration) -> HttpClientResult<bool> {
            Ok(self.healthy)
        }
    }

    fn config(healthy_threshold: u32, unhealthy_threshold: u32) -> HealthCheckConfig {
        HealthCheckConfig {
            enabled: true,
            endpoint: "/health".into(),
            interval_ms: 5_000,
            timeout_ms: 1_000,
            healthy_threshold,
            unhealthy_threshold,
        }
    }

    fn manager(healthy: bool) -> HealthCheckManager {
        HealthCheckManager::new(
            Arc::new(MemoryCache::new()),
            Arc::new(StaticProbeClient { healthy }),
        )
    }

    #[test]
    fn test_record_starts_optimistic() {
        assert!(HealthRecord::default().healthy);
    }

    #[test]
    fn test_unhealthy_after_threshold_failures() {
        let cfg = config(2, 3);
        let mut record = HealthRecord::default();

        assert_eq!(record.observe(false, 1, &cfg), None);
        assert_eq!(record.observe(false, 2, &cfg), None);
        assert!(record.healthy);
        assert_eq!(record.observe(false, 3, &cfg), Some(false));
        assert!(!record.healthy);
        assert_eq!(record.consecutive_failures, 3);
    }

    #[test]
    fn test_healthy_again_after_threshold_successes() {
        let cfg = config(2, 3);
        let mut record = HealthRecord::default();
        for t in 0..3 {
            record.observe(false, t, &cfg);
        }
        assert!(!record.healthy);

        assert_eq!(record.observe(true, 10, &cfg), None);
        assert_eq!(record.observe(true, 11, &cfg), Some(true));
        assert!(record.healthy);
        assert_eq!(record.consecutive_failures, 0);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let cfg = config(2, 3);
        let mut record = HealthRecord::default();

        record.observe(false, 1, &cfg);
        record.observe(false, 2, &cfg);
        record.observe(true, 3, &cfg);
        record.observe(false, 4, &cfg);
        record.observe(false, 5, &cfg);
        assert!(record.healthy);
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = HealthRecord {
            healthy: false,
            consecutive_successes: 0,
            consecutive_failures: 4,
            last_check_time: Some(5),
            last_success_time: None,
            last_failure_time: Some(5),
        };
        let raw = serde_json::to_string(&record).unwrap();
        assert!(raw.contains("\"consecutiveFailures\""));
        let back: HealthRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn test_registration_deduplicates() {
        let manager = manager(true);
        let cfg = config(2, 3);

        assert!(manager.register("t-1", "r-1", "http://svc:80", &cfg));
        assert!(!manager.register("t-1", "r-1", "http://svc:80", &cfg));
        assert_eq!(manager.prober_count(), 1);

        assert!(manager.register("t-1", "r-1", "http://other:80", &cfg));
        assert_eq!(manager.prober_count(), 2);
    }

    #[tokio::test]
    async fn test_unregister_removes_prober() {
        let manager = manager(true);
        let cfg = config(2, 3);

        manager.register("t-1", "r-1", "http://svc:80", &cfg);
        manager.unregister("t-1", "r-1", "http://svc:80");
        assert_eq!(manager.prober_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_clears_registry() {
        let manager = manager(true);
        let cfg = config(2, 3);

        manager.register("t-1", "r-1", "http://svc:80", &cfg);
        manager.register("t-1", "r-1", "http://other:80", &cfg);
        manager.start();
        manager.shutdown();
        assert_eq!(manager.prober_count(), 0);
    }

    #[tokio::test]
    async fn test_is_healthy_defaults_to_true() {
        let manager = manager(true);
        assert!(manager.is_healthy("t-1", "r-1", "http://svc:80").await);
    }

    #[tokio::test]
    async fn test_is_healthy_reads_cached_record() {
        let cache = Arc::new(MemoryCache::new());
        let record = HealthRecord {
            healthy: false,
            ..HealthRecord::default()
        };
        cache
            .set_ex(
                &health_key("t-1", "r-1", "http://svc:80"),
                &serde_json::to_string(&record).unwrap(),
                15,
            )
            .await
            .unwrap();

        let manager =
            HealthCheckManager::new(cache, Arc::new(StaticProbeClient { healthy: true }));
        assert!(!manager.is_healthy("t-1", "r-1", "http://svc:80").await);
    }
}
