//! Postgres implementation of the tenant/route store.
//!
//! The schema is owned by the administrative surface; this adapter only
//! reads the columns the core needs. Upstreams, transforms and resilience
//! policies are JSONB documents decoded into the domain model.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use sqlx::{Row, postgres::{PgPool, PgPoolOptions, PgRow}};

use crate::{
    core::model::{
        LoadBalancingStrategy, PathType, RateLimitSettings, ResilienceConfig, Route, Tenant,
        TenantRecord, TransformConfig, UpstreamConfig,
    },
    ports::{RouteStore, StoreError, StoreResult},
};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the store at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .wrap_err("failed to connect to the tenant/route store")?;
        tracing::info!("connected to tenant/route store");
        Ok(Self { pool })
    }

    /// Close the pool. Called on shutdown.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("tenant/route store connection closed");
    }

    fn required<'r, T>(row: &'r PgRow, column: &str) -> StoreResult<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        row.try_get::<T, _>(column)
            .map_err(|e| StoreError::Decode(format!("column '{column}': {e}")))
    }

    fn json_column<T>(row: &PgRow, column: &str) -> StoreResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let value: Option<serde_json::Value> = Self::required(row, column)?;
        value
            .map(|v| {
                serde_json::from_value(v)
                    .map_err(|e| StoreError::Decode(format!("column '{column}': {e}")))
            })
            .transpose()
    }

    fn row_to_tenant_record(row: &PgRow) -> StoreResult<TenantRecord> {
        let rate_limit: Option<RateLimitSettings> = Self::json_column(row, "rate_limit")?;
        Ok(TenantRecord {
            tenant: Tenant {
                id: Self::required(row, "id")?,
                name: Self::required(row, "name")?,
                is_active: Self::required(row, "is_active")?,
                rate_limit,
                created_at: Self::required::<DateTime<Utc>>(row, "created_at")?,
                updated_at: Self::required::<DateTime<Utc>>(row, "updated_at")?,
            },
            api_key_hash: Self::required(row, "api_key_hash")?,
        })
    }

    fn row_to_route(row: &PgRow) -> StoreResult<Route> {
        let path_type_raw: String = Self::required(row, "path_type")?;
        let path_type = PathType::parse(&path_type_raw)
            .ok_or_else(|| StoreError::Decode(format!("unknown path type '{path_type_raw}'")))?;

        let strategy_raw: String = Self::required(row, "load_balancing")?;
        let load_balancing = LoadBalancingStrategy::parse(&strategy_raw).ok_or_else(|| {
            StoreError::Decode(format!("unknown load balancing strategy '{strategy_raw}'"))
        })?;

        let upstreams: Vec<UpstreamConfig> = Self::json_column(row, "upstreams")?
            .ok_or_else(|| StoreError::Decode("route row without upstreams".to_string()))?;
        let transform: Option<TransformConfig> = Self::json_column(row, "transform")?;
        let resilience: Option<ResilienceConfig> = Self::json_column(row, "resilience")?;

        Ok(Route {
            id: Self::required(row, "id")?,
            tenant_id: Self::required(row, "tenant_id")?,
            method: Self::required::<String>(row, "method")?.to_uppercase(),
            path: Self::required(row, "path")?,
            path_type,
            upstreams,
            load_balancing,
            transform,
            resilience,
            is_active: Self::required(row, "is_active")?,
            created_at: Self::required::<DateTime<Utc>>(row, "created_at")?,
            updated_at: Self::required::<DateTime<Utc>>(row, "updated_at")?,
        })
    }
}

fn query_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Connection(err.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

#[async_trait]
impl RouteStore for PostgresStore {
    async fn find_active_tenants(&self) -> StoreResult<Vec<TenantRecord>> {
        let rows = sqlx::query(
            "SELECT id, name, is_active, api_key_hash, rate_limit, created_at, updated_at \
             FROM tenants WHERE is_active = TRUE ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(Self::row_to_tenant_record).collect()
    }

    async fn find_active_routes_by_tenant(&self, tenant_id: &str) -> StoreResult<Vec<Route>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, method, path, path_type, upstreams, load_balancing, \
                    transform, resilience, is_active, created_at, updated_at \
             FROM routes WHERE tenant_id = $1 AND is_active = TRUE ORDER BY created_at, id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.iter().map(Self::row_to_route).collect()
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}
