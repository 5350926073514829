//! Upstream selection strategies.
//!
//! Selection is a closed enumeration dispatched exhaustively; health
//! filtering deliberately does not happen here — the orchestrator gates on
//! health before selection-independent resilience checks.
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use scc::HashMap;
use thiserror::Error;

use crate::core::model::{LoadBalancingStrategy, UpstreamConfig};

/// Raised when selection is attempted over an empty upstream list. Route
/// admission guarantees at least one upstream, so observing this means the
/// stored route data is corrupt.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("route has no upstreams to select from")]
pub struct NoUpstreams;

/// Process-local upstream selector.
///
/// Round-robin cursors are keyed by route id, created lazily on first
/// selection and never reset except through [`LoadBalancer::reset_cursor`].
/// Different gateway processes legitimately observe different cursors; no
/// global ordering is promised.
pub struct LoadBalancer {
    cursors: HashMap<String, AtomicU64>,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            cursors: HashMap::new(),
        }
    }

    /// Select an upstream for a route according to its strategy.
    pub async fn select(
        &self,
        upstreams: &[UpstreamConfig],
        strategy: LoadBalancingStrategy,
        route_id: &str,
    ) -> Result<UpstreamConfig, NoUpstreams> {
        let first = upstreams.first().ok_or(NoUpstreams)?;
        if upstreams.len() == 1 {
            return Ok(first.clone());
        }

        match strategy {
            LoadBalancingStrategy::RoundRobin => {
                let entry = self
                    .cursors
                    .entry_async(route_id.to_string())
                    .await
                    .or_insert_with(|| AtomicU64::new(0));
                let cursor = entry.get().fetch_add(1, Ordering::Relaxed);
                let index = (cursor % upstreams.len() as u64) as usize;
                Ok(upstreams[index].clone())
            }
            LoadBalancingStrategy::Weighted => Ok(Self::select_weighted(upstreams).clone()),
            LoadBalancingStrategy::Random => {
                let index = rand::rng().random_range(0..upstreams.len());
                Ok(upstreams[index].clone())
            }
        }
    }

    fn select_weighted(upstreams: &[UpstreamConfig]) -> &UpstreamConfig {
        let total: u64 = upstreams
            .iter()
            .map(|u| u64::from(u.weight.unwrap_or(1).max(1)))
            .sum();
        let mut draw = rand::rng().random_range(0.0..total as f64);

        for upstream in upstreams {
            draw -= f64::from(upstream.weight.unwrap_or(1).max(1));
            if draw <= 0.0 {
                return upstream;
            }
        }
        // Numerical drift can leave a sliver of the draw unconsumed.
        upstreams
            .last()
            .unwrap_or_else(|| unreachable!("select_weighted requires a non-empty slice"))
    }

    /// Reset a route's round-robin cursor. Test hook only.
    pub async fn reset_cursor(&self, route_id: &str) {
        let _ = self.cursors.remove_async(route_id).await;
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap as StdHashMap;

    use super::*;

    fn upstream(url: &str, weight: Option<u32>) -> UpstreamConfig {
        UpstreamConfig {
            url: url.parse().unwrap(),
            weight,
            timeout: None,
        }
    }

    fn upstreams(n: usize) -> Vec<UpstreamConfig> {
        (0..n).map(|i| upstream(&format!("http://svc-{i}:80"), None)).collect()
    }

    #[tokio::test]
    async fn test_empty_upstreams_rejected() {
        let balancer = LoadBalancer::new();
        let result = balancer
            .select(&[], LoadBalancingStrategy::RoundRobin, "r-1")
            .await;
        assert_eq!(result, Err(NoUpstreams));
    }

    #[tokio::test]
    async fn test_single_upstream_short_circuits() {
        let balancer = LoadBalancer::new();
        let list = upstreams(1);
        for strategy in [
            LoadBalancingStrategy::RoundRobin,
            LoadBalancingStrategy::Weighted,
            LoadBalancingStrategy::Random,
        ] {
            let selected = balancer.select(&list, strategy, "r-1").await.unwrap();
            assert_eq!(selected.url.as_str(), "http://svc-0:80");
        }
    }

    #[tokio::test]
    async fn test_round_robin_is_fair_over_full_cycles() {
        let balancer = LoadBalancer::new();
        let list = upstreams(3);
        let rounds = 4;

        let mut counts: StdHashMap<String, usize> = StdHashMap::new();
        for _ in 0..rounds * list.len() {
            let selected = balancer
                .select(&list, LoadBalancingStrategy::RoundRobin, "r-1")
                .await
                .unwrap();
            *counts.entry(selected.url.into_string()).or_default() += 1;
        }

        for u in &list {
            assert_eq!(counts.get(u.url.as_str()), Some(&rounds));
        }
    }

    #[tokio::test]
    async fn test_round_robin_cursor_is_per_route() {
        let balancer = LoadBalancer::new();
        let list = upstreams(2);

        let a = balancer
            .select(&list, LoadBalancingStrategy::RoundRobin, "r-a")
            .await
            .unwrap();
        let b = balancer
            .select(&list, LoadBalancingStrategy::RoundRobin, "r-b")
            .await
            .unwrap();

        // Each route starts from its own cursor.
        assert_eq!(a.url, list[0].url);
        assert_eq!(b.url, list[0].url);
    }

    #[tokio::test]
    async fn test_reset_cursor_restarts_cycle() {
        let balancer = LoadBalancer::new();
        let list = upstreams(3);

        let first = balancer
            .select(&list, LoadBalancingStrategy::RoundRobin, "r-1")
            .await
            .unwrap();
        let _ = balancer
            .select(&list, LoadBalancingStrategy::RoundRobin, "r-1")
            .await
            .unwrap();
        balancer.reset_cursor("r-1").await;
        let after_reset = balancer
            .select(&list, LoadBalancingStrategy::RoundRobin, "r-1")
            .await
            .unwrap();

        assert_eq!(first.url, after_reset.url);
    }

    #[tokio::test]
    async fn test_weighted_respects_zero_variance_case() {
        // With one dominant weight the dominant upstream must appear.
        let balancer = LoadBalancer::new();
        let list = vec![
            upstream("http://heavy:80", Some(1000)),
            upstream("http://light:80", Some(1)),
        ];

        let mut saw_heavy = false;
        for _ in 0..50 {
            let selected = balancer
                .select(&list, LoadBalancingStrategy::Weighted, "r-w")
                .await
                .unwrap();
            if selected.url.as_str() == "http://heavy:80" {
                saw_heavy = true;
            }
        }
        assert!(saw_heavy);
    }

    #[tokio::test]
    async fn test_random_selects_from_list() {
        let balancer = LoadBalancer::new();
        let list = upstreams(3);
        for _ in 0..20 {
            let selected = balancer
                .select(&list, LoadBalancingStrategy::Random, "r-r")
                .await
                .unwrap();
            assert!(list.iter().any(|u| u.url == selected.url));
        }
    }
}
