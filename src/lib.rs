//! Portico - a multi-tenant API gateway core.
//!
//! Portico authenticates every inbound request against a tenant's api-key,
//! enforces a sliding-window rate limit, matches the request to one of the
//! tenant's routes, selects a healthy upstream and forwards the request with
//! configurable resilience: circuit breaking, retry with jittered backoff,
//! per-method timeouts, header/path transformation and static fallbacks.
//!
//! # Architecture
//! The crate follows a **hexagonal architecture**: `ports` defines the trait
//! boundaries (shared cache, tenant/route store, outbound HTTP client),
//! `adapters` implements them against Redis, Postgres and Hyper, and `core`
//! holds the request pipeline itself. End users should prefer the re-exports
//! below over reaching into internal modules.
//!
//! # Shared state
//! Circuit-breaker state, health records, rate-limit windows and the tenant
//! cache all live in the shared cache, so any number of gateway processes
//! cooperate on the same view. The only process-local state is the
//! round-robin cursor, which is intentionally unsynchronised across
//! processes.
//!
//! # Error Handling
//! Fallible APIs return `eyre::Result<T>` at the application boundary and
//! domain-specific error types (`GatewayError`, port errors) inside the
//! pipeline.
//!
//! # License
//! Dual-licensed under either MIT or Apache-2.0 at your option.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler, MemoryCache, PostgresStore, RedisCache},
    config::Settings,
    core::{
        GatewayError, GatewayService, HealthCheckManager, LoadBalancer, RouteMatcher,
        SlidingWindowLimiter, TenantAuthenticator,
    },
    ports::{HttpClient, RouteStore, SharedCache},
    utils::{ConnectionTracker, GracefulShutdown},
};
