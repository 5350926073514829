use async_trait::async_trait;
use thiserror::Error;

use crate::core::model::{Route, TenantRecord};

/// Custom error type for tenant/route store operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// Error establishing or using the store connection
    #[error("store connection error: {0}")]
    Connection(String),

    /// Error executing a query
    #[error("store query error: {0}")]
    Query(String),

    /// Error decoding a row into a domain type
    #[error("store decode error: {0}")]
    Decode(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// RouteStore defines the read-only port onto the tenant/route store.
///
/// Tenants and routes are owned by an external administrative surface; the
/// core only ever reads immutable snapshots. Iteration order of the returned
/// collections is the store's order and is authoritative for matching.
#[async_trait]
pub trait RouteStore: Send + Sync + 'static {
    /// All active tenants, including their api-key hashes.
    async fn find_active_tenants(&self) -> StoreResult<Vec<TenantRecord>>;

    /// All active routes owned by a tenant, in store order.
    async fn find_active_routes_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Route>>;

    /// Round-trip liveness check.
    async fn ping(&self) -> StoreResult<()>;
}
