//! User management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::{non_blank, valid_email, ActivityService, Listing, Page};
use crate::auth::{Permission, RequestContext, UserRole};
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query};

const TABLE: &str = "users";
const COMPONENT: &str = "UserService";

/// User record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub department: Option<String>,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateUser {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub role: UserRole,
    pub department: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
struct UserPatch<'a> {
    #[serde(flatten)]
    update: &'a UpdateUser,
    updated_at: DateTime<Utc>,
}

/// User store operations
#[derive(Clone)]
pub struct UserService {
    db: Db,
    activity: ActivityService,
}

impl UserService {
    pub fn new(db: Db, activity: ActivityService) -> Self {
        Self { db, activity }
    }

    fn context(ctx: &RequestContext, operation: &'static str) -> ErrorContext {
        ErrorContext::new(COMPONENT, operation, "user").with("tenant_id", ctx.tenant_id)
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &UserFilter,
    ) -> Result<Listing<User>, StandardError> {
        let mut query = Query::tenant(ctx.tenant_id);
        if let Some(role) = filter.role {
            query = query.eq("role", serde_json::to_value(role).unwrap_or_default());
        }
        if let Some(active) = filter.active {
            query = query.eq("is_active", active);
        }
        if let Some(term) = &filter.search {
            query = query.search(&["name", "email"], term);
        }

        let wrap = |e| Self::context(ctx, "list").store_error(e, ErrorCode::FetchFailed);
        let total = self.db.count(TABLE, &query).await.map_err(wrap)?;
        let items = self
            .db
            .select(TABLE, &Page::new(filter.limit, filter.offset).apply(query.order_by("name", true)))
            .await
            .map_err(wrap)?;

        Ok(Listing { items, total })
    }

    pub async fn get(&self, ctx: &RequestContext, id: Uuid) -> Result<User, StandardError> {
        let query = Query::tenant(ctx.tenant_id).eq("id", id.to_string());
        self.db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "get").store_error(e, ErrorCode::FetchFailed))?
            .ok_or_else(|| {
                StandardError::not_found("User", id).in_context(&Self::context(ctx, "get"))
            })
    }

    pub async fn find_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Option<User>, StandardError> {
        let query = Query::tenant(ctx.tenant_id).eq("email", normalize_email(email));
        self.db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "find_by_email").store_error(e, ErrorCode::FetchFailed))
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateUser,
    ) -> Result<User, StandardError> {
        ctx.require(Permission::ManageUsers)?;
        non_blank(&input.name, "name")?;
        valid_email(&input.email)?;

        let email = normalize_email(&input.email);
        if self.find_by_email(ctx, &email).await?.is_some() {
            return Err(StandardError::new(
                ErrorCode::Conflict,
                "A user with this email already exists",
            )
            .with("email", &email)
            .in_context(&Self::context(ctx, "create")));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            email,
            name: input.name.trim().to_string(),
            role: input.role,
            department: input.department,
            is_active: true,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };

        let created: User = self.db.insert(TABLE, &user).await.map_err(|e| {
            let err = Self::context(ctx, "create").store_error(e, ErrorCode::CreateFailed);
            error!(tenant_id = %ctx.tenant_id, error = %err, "Failed to create user");
            err
        })?;

        info!(tenant_id = %ctx.tenant_id, user_id = %created.id, "User created");
        self.activity
            .record(ctx, "created", "user", created.id, format!("Added user {}", created.name))
            .await;
        Ok(created)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: UpdateUser,
    ) -> Result<User, StandardError> {
        // Users may edit their own name/department, role changes need ManageUsers
        let self_edit = ctx.user_id == id && update.role.is_none() && update.is_active.is_none();
        if !self_edit {
            ctx.require(Permission::ManageUsers)?;
        }
        if let Some(name) = &update.name {
            non_blank(name, "name")?;
        }

        let query = Query::tenant(ctx.tenant_id).eq("id", id.to_string());
        let patch = UserPatch {
            update: &update,
            updated_at: Utc::now(),
        };

        self.db
            .update_one(TABLE, &query, &patch)
            .await
            .map_err(|e| {
                Self::context(ctx, "update")
                    .with("user_id", id)
                    .store_error(e, ErrorCode::UpdateFailed)
            })
    }

    /// Soft delete: the row stays for history, the account stops working
    pub async fn deactivate(&self, ctx: &RequestContext, id: Uuid) -> Result<User, StandardError> {
        if ctx.user_id == id {
            return Err(StandardError::validation("You cannot deactivate your own account")
                .in_context(&Self::context(ctx, "deactivate")));
        }

        let user = self
            .update(
                ctx,
                id,
                UpdateUser {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await?;

        info!(tenant_id = %ctx.tenant_id, user_id = %id, "User deactivated");
        self.activity
            .record(ctx, "deactivated", "user", id, format!("Deactivated user {}", user.name))
            .await;
        Ok(user)
    }

    /// Stamp `last_login_at` for the caller
    pub async fn record_login(&self, ctx: &RequestContext) -> Result<(), StandardError> {
        #[derive(Serialize)]
        struct LoginPatch {
            last_login_at: DateTime<Utc>,
        }

        let query = Query::tenant(ctx.tenant_id).eq("id", ctx.user_id.to_string());
        self.db
            .update::<_, User>(
                TABLE,
                &query,
                &LoginPatch {
                    last_login_at: Utc::now(),
                },
            )
            .await
            .map_err(|e| Self::context(ctx, "record_login").store_error(e, ErrorCode::UpdateFailed))?;
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> UserService {
        let db = Db::new(MemoryStore::with_schema());
        UserService::new(db.clone(), ActivityService::new(db))
    }

    fn admin() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Admin)
    }

    fn new_user(email: &str) -> CreateUser {
        CreateUser {
            email: email.to_string(),
            name: "Dana".to_string(),
            role: UserRole::Sales,
            department: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_conflicts_case_insensitively() {
        let users = service();
        let ctx = admin();

        users.create(&ctx, new_user("dana@example.com")).await.unwrap();
        let err = users
            .create(&ctx, new_user("  DANA@example.com "))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
    }

    #[tokio::test]
    async fn sales_cannot_create_users() {
        let users = service();
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Sales);
        let err = users.create(&ctx, new_user("x@example.com")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }

    #[tokio::test]
    async fn deactivate_and_filter() {
        let users = service();
        let ctx = admin();
        let user = users.create(&ctx, new_user("a@example.com")).await.unwrap();
        users.create(&ctx, new_user("b@example.com")).await.unwrap();

        let deactivated = users.deactivate(&ctx, user.id).await.unwrap();
        assert!(!deactivated.is_active);

        let active = users
            .list(
                &ctx,
                &UserFilter {
                    active: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(active.total, 1);
        assert_eq!(active.items[0].email, "b@example.com");
    }

    #[tokio::test]
    async fn get_missing_user_is_not_found() {
        let users = service();
        let err = users.get(&admin(), Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(err.metadata.component.as_deref(), Some(COMPONENT));
    }
}
