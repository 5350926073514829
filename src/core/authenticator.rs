//! Tenant authentication with a shared-cache fast path.
use std::sync::Arc;

use crate::{
    core::model::Tenant,
    ports::{RouteStore, SharedCache, StoreError},
};

/// Cache lifetime of a validated tenant view. Short on purpose: a
/// deactivated tenant keeps authenticating for at most this long.
pub const TENANT_CACHE_TTL_SECS: u64 = 5;

/// Verdict of an api-key validation.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// The key resolved to an active tenant.
    Authenticated(Tenant),
    /// The cache holds a tenant for this key, but it has been deactivated.
    /// The pipeline host maps this to 403 rather than 401.
    InactiveTenant,
    /// The key matched no active tenant.
    Unknown,
}

/// Validates api-keys against the hashed store, fronted by the shared cache.
///
/// On a warm cache a valid key resolves without touching the store. On a
/// miss every active tenant's hash is verified in store order; this is
/// O(tenants · hash cost) and acceptable at hundreds of tenants — beyond
/// that the store needs a keyed index, not a bigger scan.
pub struct TenantAuthenticator {
    cache: Arc<dyn SharedCache>,
    store: Arc<dyn RouteStore>,
}

impl TenantAuthenticator {
    pub fn new(cache: Arc<dyn SharedCache>, store: Arc<dyn RouteStore>) -> Self {
        Self { cache, store }
    }

    fn cache_key(api_key: &str) -> String {
        format!("tenant:apikey:{api_key}")
    }

    /// Validate an api-key.
    ///
    /// Cache errors degrade to a store lookup; a store error is the only
    /// failure surfaced to the caller and maps to a 500 at the host layer.
    pub async fn validate_api_key(&self, api_key: &str) -> Result<AuthOutcome, StoreError> {
        let key = Self::cache_key(api_key);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Tenant>(&raw) {
                Ok(tenant) if !tenant.is_active => return Ok(AuthOutcome::InactiveTenant),
                Ok(tenant) => return Ok(AuthOutcome::Authenticated(tenant)),
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable tenant cache entry, consulting store");
                }
            },
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "tenant cache read failed, consulting store");
            }
        }

        let tenants = self.store.find_active_tenants().await?;
        for record in tenants {
            if verify_api_key(api_key, &record.api_key_hash).await {
                self.cache_tenant(&key, &record.tenant).await;
                return Ok(AuthOutcome::Authenticated(record.tenant));
            }
        }

        Ok(AuthOutcome::Unknown)
    }

    async fn cache_tenant(&self, key: &str, tenant: &Tenant) {
        match serde_json::to_string(tenant) {
            Ok(raw) => {
                if let Err(e) = self.cache.set_ex(key, &raw, TENANT_CACHE_TTL_SECS).await {
                    tracing::warn!(error = %e, tenant_id = %tenant.id, "failed to cache tenant view");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, tenant_id = %tenant.id, "failed to serialize tenant view");
            }
        }
    }
}

/// Constant-time bcrypt verification, run off the async workers.
async fn verify_api_key(api_key: &str, hash: &str) -> bool {
    let api_key = api_key.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || bcrypt::verify(&api_key, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}
