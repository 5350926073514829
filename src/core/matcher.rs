//! Route matching.
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;

use crate::{
    core::{
        load_balancer::{LoadBalancer, NoUpstreams},
        model::{PathType, Route, UpstreamConfig},
    },
    ports::{RouteStore, StoreError},
};

/// A matched route together with the upstream selected for this request.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Route,
    pub upstream: UpstreamConfig,
}

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Selection(#[from] NoUpstreams),
}

/// Matches requests against a tenant's active routes.
///
/// Routes are evaluated in store order and the first match wins; there is no
/// specificity ranking between path types. Matching re-reads the store on
/// every request so route edits take effect without a reload protocol.
pub struct RouteMatcher {
    store: Arc<dyn RouteStore>,
    balancer: Arc<LoadBalancer>,
}

impl RouteMatcher {
    pub fn new(store: Arc<dyn RouteStore>, balancer: Arc<LoadBalancer>) -> Self {
        Self { store, balancer }
    }

    /// Find the first active route of the tenant matching `(method, path)`
    /// and select an upstream for it.
    pub async fn match_route(
        &self,
        tenant_id: &str,
        method: &str,
        path: &str,
    ) -> Result<Option<RouteMatch>, MatchError> {
        let routes = self.store.find_active_routes_by_tenant(tenant_id).await?;

        for route in routes {
            if !method_matches(&route.method, method) {
                continue;
            }
            if !path_matches(&route, path) {
                continue;
            }
            let upstream = self
                .balancer
                .select(&route.upstreams, route.load_balancing, &route.id)
                .await?;
            return Ok(Some(RouteMatch { route, upstream }));
        }

        Ok(None)
    }
}

fn method_matches(route_method: &str, request_method: &str) -> bool {
    route_method == "*" || route_method.eq_ignore_ascii_case(request_method)
}

fn path_matches(route: &Route, path: &str) -> bool {
    match route.path_type {
        PathType::Exact => path == route.path,
        // `/api` matches `/api` and `/api/x` but not `/apix`.
        PathType::Prefix => {
            path == route.path || path.starts_with(&format!("{}/", route.path))
        }
        PathType::Regex => match Regex::new(&format!("^{}$", route.path)) {
            Ok(re) => re.is_match(path),
            Err(e) => {
                tracing::debug!(route_id = %route.id, pattern = %route.path, error = %e, "route regex failed to compile");
                false
            }
        },
    }
}
