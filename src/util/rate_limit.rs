//! Per-tenant request rate limiting

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::error::{ErrorCode, StandardError};

/// Rate limiter keyed by tenant id
pub type TenantLimiter = RateLimiter<Uuid, DefaultKeyedStateStore<Uuid>, DefaultClock>;

/// Create a keyed limiter allowing `requests_per_second` per tenant
pub fn create_tenant_limiter(requests_per_second: u32) -> Arc<TenantLimiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::keyed(quota))
}

/// Runs after authentication; requests without a context pass through
pub async fn limit_per_tenant(
    State(limiter): State<Arc<TenantLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let tenant_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.tenant_id);

    if let Some(tenant_id) = tenant_id {
        if limiter.check_key(&tenant_id).is_err() {
            warn!(tenant_id = %tenant_id, "Rate limit exceeded");
            let error = StandardError::new(ErrorCode::RequestFailed, "Rate limit exceeded")
                .component("RateLimiter")
                .with("tenant_id", tenant_id);
            return (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": error }))).into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_have_independent_budgets() {
        let limiter = create_tenant_limiter(2);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_err());
        assert!(limiter.check_key(&b).is_ok());
    }

    #[test]
    fn zero_rate_still_allows_one() {
        let limiter = create_tenant_limiter(0);
        assert!(limiter.check_key(&Uuid::nil()).is_ok());
    }
}
