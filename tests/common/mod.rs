//! Shared fixtures for integration tests: a scripted upstream client and a
//! fixed in-memory store, wired into a full pipeline handler.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body;
use chrono::Utc;
use hyper::{Request, Response};
use portico::{
    adapters::{HttpHandler, MemoryCache},
    core::{
        CircuitBreakers, GatewayService, HealthCheckManager, LoadBalancer, RouteMatcher,
        SlidingWindowLimiter, TenantAuthenticator,
        model::{
            LoadBalancingStrategy, PathType, RateLimitSettings, Route, Tenant, TenantRecord,
            UpstreamConfig,
        },
    },
    ports::{HttpClient, HttpClientError, HttpClientResult, RouteStore, SharedCache, StoreResult},
    utils::ConnectionTracker,
};

pub const API_KEY: &str = "integration-test-key";
pub const TENANT_ID: &str = "t-integration";

/// One scripted upstream outcome.
pub enum Scripted {
    Status(u16),
    Body(u16, &'static str),
    Error(HttpClientError),
}

/// Upstream client replaying a script and recording the URIs it was asked
/// to call.
pub struct ScriptedClient {
    script: Mutex<VecDeque<Scripted>>,
    uris: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            uris: Mutex::new(Vec::new()),
        })
    }

    pub fn request_count(&self) -> usize {
        self.uris.lock().unwrap().len()
    }

    pub fn uri(&self, index: usize) -> String {
        self.uris.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedClient {
    async fn send_request(
        &self,
        req: Request<Body>,
        _timeout: Duration,
    ) -> HttpClientResult<Response<Body>> {
        self.uris.lock().unwrap().push(req.uri().to_string());

        match self.script.lock().unwrap().pop_front() {
            Some(Scripted::Status(status)) => Ok(Response::builder()
                .status(status)
                .body(Body::from("scripted"))
                .unwrap()),
            Some(Scripted::Body(status, body)) => Ok(Response::builder()
                .status(status)
                .body(Body::from(body))
                .unwrap()),
            Some(Scripted::Error(error)) => Err(error),
            None => Ok(Response::builder()
                .status(200)
                .body(Body::from("default"))
                .unwrap()),
        }
    }

    async fn probe(&self, _url: &str, _timeout: Duration) -> HttpClientResult<bool> {
        Ok(true)
    }
}

pub struct FixedStore {
    pub tenants: Vec<TenantRecord>,
    pub routes: Vec<Route>,
}

#[async_trait]
impl RouteStore for FixedStore {
    async fn find_active_tenants(&self) -> StoreResult<Vec<TenantRecord>> {
        Ok(self.tenants.clone())
    }

    async fn find_active_routes_by_tenant(&self, _tenant_id: &str) -> StoreResult<Vec<Route>> {
        Ok(self.routes.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

pub fn tenant_record(rate_limit: Option<RateLimitSettings>) -> TenantRecord {
    TenantRecord {
        tenant: Tenant {
            id: TENANT_ID.into(),
            name: "integration".into(),
            is_active: true,
            rate_limit,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        // Low cost keeps the suite fast; verification is cost-agnostic.
        api_key_hash: bcrypt::hash(API_KEY, 4).unwrap(),
    }
}

pub fn route(id: &str, method: &str, path: &str, path_type: PathType, upstream: &str) -> Route {
    Route {
        id: id.into(),
        tenant_id: TENANT_ID.into(),
        method: method.into(),
        path: path.into(),
        path_type,
        upstreams: vec![UpstreamConfig {
            url: upstream.parse().expect("test routes use valid upstream URLs"),
            weight: None,
            timeout: None,
        }],
        load_balancing: LoadBalancingStrategy::RoundRobin,
        transform: None,
        resilience: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Wire the full pipeline over the in-memory cache, a fixed store and the
/// scripted upstream client.
pub fn build_handler(
    tenants: Vec<TenantRecord>,
    routes: Vec<Route>,
    client: Arc<ScriptedClient>,
) -> HttpHandler {
    let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
    let store: Arc<dyn RouteStore> = Arc::new(FixedStore { tenants, routes });
    let http_client: Arc<dyn HttpClient> = client;

    let gateway = Arc::new(GatewayService::new(
        RouteMatcher::new(store.clone(), Arc::new(LoadBalancer::new())),
        CircuitBreakers::new(cache.clone()),
        Arc::new(HealthCheckManager::new(cache.clone(), http_client.clone())),
        http_client,
    ));

    HttpHandler::new(
        TenantAuthenticator::new(cache.clone(), store.clone()),
        SlidingWindowLimiter::new(cache.clone()),
        gateway,
        Arc::new(ConnectionTracker::new()),
        cache,
        store,
        true,
    )
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap()
}
