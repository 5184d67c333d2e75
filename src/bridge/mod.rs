//! Typed API bridges: cache-aside reads, deduplicated requests and role
//! checks in front of [`ApiClient`]

pub mod api_client;
pub mod customers;
pub mod dashboard;
pub mod products;
pub mod proposals;

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{Permission, UserRole};
use crate::cache::{RequestDeduplicator, TtlCache};
use crate::error::{ErrorCode, StandardError};

pub use api_client::ApiClient;
pub use customers::CustomerBridge;
pub use dashboard::DashboardBridge;
pub use products::ProductBridge;
pub use proposals::ProposalBridge;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache plus in-flight map shared by one bridge's clones
#[derive(Clone)]
pub struct CachedBridge {
    name: &'static str,
    cache: TtlCache<Value>,
    inflight: RequestDeduplicator<Value>,
}

impl CachedBridge {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            cache: TtlCache::new(ttl),
            inflight: RequestDeduplicator::new(),
        }
    }

    /// `operation:json(params)`
    pub fn cache_key<P: Serialize + ?Sized>(operation: &str, params: &P) -> String {
        let params = serde_json::to_string(params).unwrap_or_else(|_| "null".to_string());
        format!("{}:{}", operation, params)
    }

    /// Serve from cache, join an identical in-flight request, or run `fetch`
    /// and cache its result.
    pub async fn cached<T, P, F, Fut>(
        &self,
        operation: &str,
        params: &P,
        fetch: F,
    ) -> Result<T, StandardError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        P: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StandardError>> + Send + 'static,
    {
        let key = Self::cache_key(operation, params);
        if let Some(hit) = self.cache.get(&key) {
            debug!(bridge = self.name, key = %key, "Cache hit");
            return from_value(hit);
        }

        // Read before the request starts so a write landing mid-flight wins
        let generation = self.cache.generation();
        let cache = self.cache.clone();
        let store_key = key.clone();
        let value = self
            .inflight
            .run(&key, move || {
                let request = fetch();
                async move {
                    let value = serde_json::to_value(request.await?).map_err(|e| {
                        StandardError::internal(format!("Failed to encode response: {}", e))
                    })?;
                    if !cache.set_if_current(store_key, value.clone(), generation) {
                        debug!("Cache invalidated during fetch, response not stored");
                    }
                    Ok(value)
                }
            })
            .await
            .map_err(|e| {
                warn!(bridge = self.name, operation, error = %e, "Bridge request failed");
                e
            })?;

        from_value(value)
    }

    /// Drop cached entries whose key contains `pattern`, or all of them.
    /// Reads already in flight neither fill the cache nor get joined.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        let removed = self.cache.clear(pattern);
        let detached = self.inflight.forget(pattern);
        debug!(bridge = self.name, pattern, removed, detached, "Cache invalidated");
        removed
    }

    /// Live entries; expired ones are dropped first
    pub fn cached_entries(&self) -> usize {
        self.cache.purge_expired();
        self.cache.len()
    }
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, StandardError> {
    serde_json::from_value(value).map_err(|e| {
        StandardError::new(
            ErrorCode::RequestFailed,
            format!("Unexpected response shape: {}", e),
        )
    })
}

/// Refuse locally before the request leaves the process
pub(crate) fn permit(role: UserRole, permission: Permission, bridge: &str) -> Result<(), StandardError> {
    if role.can(permission) {
        return Ok(());
    }
    Err(StandardError::forbidden(format!(
        "Role {:?} may not perform this action",
        role
    ))
    .component(bridge)
    .with("permission", format!("{:?}", permission)))
}
