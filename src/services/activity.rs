//! Activity log written by the other services, read by the dashboard

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query};

const TABLE: &str = "activities";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ActivityService {
    db: Db,
}

impl ActivityService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Record an activity. Failures are logged and swallowed: the write
    /// that triggered the activity already succeeded.
    pub async fn record(
        &self,
        ctx: &RequestContext,
        kind: &str,
        entity_type: &str,
        entity_id: Uuid,
        description: impl Into<String>,
    ) {
        let activity = Activity {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            user_id: ctx.user_id,
            kind: kind.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            description: description.into(),
            created_at: Utc::now(),
        };

        if let Err(e) = self.db.insert::<_, Activity>(TABLE, &activity).await {
            warn!(
                tenant_id = %ctx.tenant_id,
                kind,
                entity_id = %entity_id,
                error = %e,
                "Failed to record activity"
            );
        }
    }

    /// Most recent activities for the tenant
    pub async fn recent(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> Result<Vec<Activity>, StandardError> {
        let query = Query::tenant(ctx.tenant_id)
            .order_by("created_at", false)
            .limit(limit);

        self.db.select(TABLE, &query).await.map_err(|e| {
            ErrorContext::new("ActivityService", "recent", "activity")
                .with("tenant_id", ctx.tenant_id)
                .store_error(e, ErrorCode::FetchFailed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn recent_is_newest_first_and_tenant_scoped() {
        let service = ActivityService::new(Db::new(MemoryStore::with_schema()));
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Sales);
        let other = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Sales);

        service.record(&ctx, "created", "customer", Uuid::new_v4(), "first").await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        service.record(&ctx, "updated", "customer", Uuid::new_v4(), "second").await;
        service.record(&other, "created", "product", Uuid::new_v4(), "elsewhere").await;

        let recent = service.recent(&ctx, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].description, "second");
    }
}
