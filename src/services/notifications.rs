//! In-app notifications per user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::RequestContext;
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query};

const TABLE: &str = "notifications";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct NotificationService {
    db: Db,
}

impl NotificationService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn context(ctx: &RequestContext, operation: &'static str) -> ErrorContext {
        ErrorContext::new("NotificationService", operation, "notification")
            .with("tenant_id", ctx.tenant_id)
            .with("user_id", ctx.user_id)
    }

    fn mine(ctx: &RequestContext) -> Query {
        Query::tenant(ctx.tenant_id).eq("user_id", ctx.user_id.to_string())
    }

    pub async fn notify(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<Notification, StandardError> {
        let notification = Notification {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            read: false,
            created_at: Utc::now(),
        };

        self.db.insert(TABLE, &notification).await.map_err(|e| {
            ErrorContext::new("NotificationService", "notify", "notification")
                .with("tenant_id", tenant_id)
                .store_error(e, ErrorCode::CreateFailed)
        })
    }

    pub async fn unread(
        &self,
        ctx: &RequestContext,
        limit: usize,
    ) -> Result<Vec<Notification>, StandardError> {
        let query = Self::mine(ctx)
            .eq("read", false)
            .order_by("created_at", false)
            .limit(limit);
        self.db
            .select(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "unread").store_error(e, ErrorCode::FetchFailed))
    }

    pub async fn unread_count(&self, ctx: &RequestContext) -> Result<u64, StandardError> {
        self.db
            .count(TABLE, &Self::mine(ctx).eq("read", false))
            .await
            .map_err(|e| Self::context(ctx, "unread_count").store_error(e, ErrorCode::FetchFailed))
    }

    pub async fn mark_read(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StandardError> {
        #[derive(Serialize)]
        struct ReadFlag {
            read: bool,
        }

        let query = Self::mine(ctx).eq("id", id.to_string());
        let _: Notification = self
            .db
            .update_one(TABLE, &query, &ReadFlag { read: true })
            .await
            .map_err(|e| {
                Self::context(ctx, "mark_read")
                    .with("notification_id", id)
                    .store_error(e, ErrorCode::UpdateFailed)
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn unread_only_lists_own_notifications() {
        let service = NotificationService::new(Db::new(MemoryStore::new()));
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Sales);

        let first = service
            .notify(ctx.tenant_id, ctx.user_id, "Approved", "Q3 rollout approved")
            .await
            .unwrap();
        service
            .notify(ctx.tenant_id, Uuid::new_v4(), "Other", "not yours")
            .await
            .unwrap();

        assert_eq!(service.unread_count(&ctx).await.unwrap(), 1);
        service.mark_read(&ctx, first.id).await.unwrap();
        assert!(service.unread(&ctx, 10).await.unwrap().is_empty());

        // Someone else's notification is not found for this caller
        let err = service.mark_read(&ctx, Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }
}
