//! Per-tenant feature entitlements

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::auth::{Permission, RequestContext};
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query};

const TABLE: &str = "entitlements";
const COMPONENT: &str = "EntitlementService";

/// Features every new tenant starts with: (feature, enabled, usage limit)
pub const DEFAULT_FEATURES: &[(&str, bool, Option<i64>)] = &[
    ("proposals", true, None),
    ("customers", true, None),
    ("products", true, None),
    ("dashboard", true, None),
    ("proposal_versions", true, None),
    ("pdf_export", true, Some(100)),
    ("team_members", true, Some(10)),
    ("advanced_analytics", false, None),
    ("api_access", false, None),
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entitlement {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub feature: String,
    pub enabled: bool,
    pub usage_limit: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SetEntitlement {
    pub enabled: bool,
    pub usage_limit: Option<i64>,
}

#[derive(Clone)]
pub struct EntitlementService {
    db: Db,
}

impl EntitlementService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn context(tenant_id: Uuid, operation: &'static str) -> ErrorContext {
        ErrorContext::new(COMPONENT, operation, "entitlement").with("tenant_id", tenant_id)
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<Entitlement>, StandardError> {
        let query = Query::tenant(tenant_id).order_by("feature", true);
        self.db
            .select(TABLE, &query)
            .await
            .map_err(|e| Self::context(tenant_id, "list").store_error(e, ErrorCode::FetchFailed))
    }

    /// Unknown features are treated as disabled
    pub async fn is_enabled(&self, tenant_id: Uuid, feature: &str) -> Result<bool, StandardError> {
        let query = Query::tenant(tenant_id).eq("feature", feature);
        let found: Option<Entitlement> = self
            .db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(tenant_id, "is_enabled").store_error(e, ErrorCode::FetchFailed))?;
        Ok(found.map(|e| e.enabled).unwrap_or(false))
    }

    /// Fail with `AUTH.FORBIDDEN` when the tenant lacks `feature`
    pub async fn require(&self, tenant_id: Uuid, feature: &str) -> Result<(), StandardError> {
        if self.is_enabled(tenant_id, feature).await? {
            return Ok(());
        }
        Err(StandardError::forbidden(format!(
            "Feature '{}' is not included in your plan",
            feature
        ))
        .in_context(&Self::context(tenant_id, "require").with("feature", feature)))
    }

    /// Fail once `used` reaches the feature's usage limit. Tenants without a
    /// row for `feature` are not metered.
    pub async fn check_usage(
        &self,
        tenant_id: Uuid,
        feature: &str,
        used: u64,
    ) -> Result<(), StandardError> {
        let query = Query::tenant(tenant_id).eq("feature", feature);
        let found: Option<Entitlement> = self
            .db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(tenant_id, "check_usage").store_error(e, ErrorCode::FetchFailed))?;

        let Some(entitlement) = found else {
            return Ok(());
        };
        let ctx = Self::context(tenant_id, "check_usage").with("feature", feature);
        if !entitlement.enabled {
            return Err(StandardError::forbidden(format!(
                "Feature '{}' is not included in your plan",
                feature
            ))
            .in_context(&ctx));
        }
        match entitlement.usage_limit {
            Some(limit) if used >= limit.max(0) as u64 => Err(StandardError::forbidden(format!(
                "Usage limit of {} reached for '{}'",
                limit, feature
            ))
            .in_context(&ctx)),
            _ => Ok(()),
        }
    }

    pub async fn set(
        &self,
        ctx: &RequestContext,
        feature: &str,
        input: SetEntitlement,
    ) -> Result<Entitlement, StandardError> {
        ctx.require(Permission::ManageEntitlements)?;
        self.upsert(ctx.tenant_id, feature, input.enabled, input.usage_limit)
            .await
    }

    async fn upsert(
        &self,
        tenant_id: Uuid,
        feature: &str,
        enabled: bool,
        usage_limit: Option<i64>,
    ) -> Result<Entitlement, StandardError> {
        if feature.trim().is_empty() {
            return Err(StandardError::validation("feature is required"));
        }

        let now = Utc::now();
        let row = Entitlement {
            id: Uuid::new_v4(),
            tenant_id,
            feature: feature.trim().to_string(),
            enabled,
            usage_limit,
            created_at: now,
            updated_at: now,
        };

        self.db
            .upsert(TABLE, &row, &["tenant_id", "feature"])
            .await
            .map_err(|e| {
                Self::context(tenant_id, "upsert")
                    .with("feature", feature)
                    .store_error(e, ErrorCode::UpdateFailed)
            })
    }

    /// Ensure every default feature exists for the tenant.
    /// Existing rows are left untouched so manual changes survive re-seeding.
    pub async fn seed_defaults(&self, tenant_id: Uuid) -> Result<usize, StandardError> {
        let existing = self.list(tenant_id).await?;
        let mut created = 0;

        for (feature, enabled, limit) in DEFAULT_FEATURES {
            if existing.iter().any(|e| e.feature == *feature) {
                continue;
            }
            self.upsert(tenant_id, feature, *enabled, *limit).await?;
            created += 1;
        }

        info!(tenant_id = %tenant_id, created, "Seeded default entitlements");
        Ok(created)
    }
}
