//! Customer and customer-contact management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{non_blank, valid_email, ActivityService, Listing, Page};
use crate::auth::{Permission, RequestContext};
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query};

const TABLE: &str = "customers";
const CONTACTS: &str = "customer_contacts";
const COMPONENT: &str = "CustomerService";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    #[default]
    Prospect,
    Active,
    Inactive,
}

/// Customer record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub industry: Option<String>,
    pub status: CustomerStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateCustomer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub industry: Option<String>,
    #[serde(default)]
    pub status: CustomerStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateCustomer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CustomerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CustomerFilter {
    pub status: Option<CustomerStatus>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerContact {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub customer_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateContact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Serialize)]
struct Patch<'a, T: Serialize> {
    #[serde(flatten)]
    fields: &'a T,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct PrimaryFlag {
    is_primary: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct SoftDelete {
    deleted_at: DateTime<Utc>,
    status: CustomerStatus,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct CustomerService {
    db: Db,
    activity: ActivityService,
}

impl CustomerService {
    pub fn new(db: Db, activity: ActivityService) -> Self {
        Self { db, activity }
    }

    fn context(ctx: &RequestContext, operation: &'static str) -> ErrorContext {
        ErrorContext::new(COMPONENT, operation, "customer").with("tenant_id", ctx.tenant_id)
    }

    fn live(ctx: &RequestContext) -> Query {
        Query::tenant(ctx.tenant_id).is_null("deleted_at")
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &CustomerFilter,
    ) -> Result<Listing<Customer>, StandardError> {
        let mut query = Self::live(ctx);
        if let Some(status) = filter.status {
            query = query.eq("status", serde_json::to_value(status).unwrap_or_default());
        }
        if let Some(term) = &filter.search {
            query = query.search(&["name", "email", "company"], term);
        }

        let wrap = |e| Self::context(ctx, "list").store_error(e, ErrorCode::FetchFailed);
        let total = self.db.count(TABLE, &query).await.map_err(wrap)?;
        let page = Page::new(filter.limit, filter.offset);
        let items = self
            .db
            .select(TABLE, &page.apply(query.order_by("updated_at", false)))
            .await
            .map_err(wrap)?;

        Ok(Listing { items, total })
    }

    pub async fn get(&self, ctx: &RequestContext, id: Uuid) -> Result<Customer, StandardError> {
        let query = Self::live(ctx).eq("id", id.to_string());
        self.db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "get").store_error(e, ErrorCode::FetchFailed))?
            .ok_or_else(|| {
                StandardError::not_found("Customer", id).in_context(&Self::context(ctx, "get"))
            })
    }

    pub async fn find_by_email(
        &self,
        ctx: &RequestContext,
        email: &str,
    ) -> Result<Option<Customer>, StandardError> {
        // Soft-deleted rows still hold the unique email
        let query = Query::tenant(ctx.tenant_id).eq("email", email.trim().to_lowercase());
        self.db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "find_by_email").store_error(e, ErrorCode::FetchFailed))
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateCustomer,
    ) -> Result<Customer, StandardError> {
        ctx.require(Permission::WriteCustomers)?;
        non_blank(&input.name, "name")?;
        valid_email(&input.email)?;

        let email = input.email.trim().to_lowercase();
        if self.find_by_email(ctx, &email).await?.is_some() {
            warn!(tenant_id = %ctx.tenant_id, email = %email, "Duplicate customer email");
            return Err(StandardError::new(
                ErrorCode::Conflict,
                "A customer with this email already exists",
            )
            .with("email", &email)
            .in_context(&Self::context(ctx, "create")));
        }

        let now = Utc::now();
        let customer = Customer {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: input.name.trim().to_string(),
            email,
            phone: input.phone,
            company: input.company,
            industry: input.industry,
            status: input.status,
            tags: input.tags,
            notes: input.notes,
            created_by: ctx.user_id,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };

        // The unique index still guards against a concurrent insert
        let created: Customer = self.db.insert(TABLE, &customer).await.map_err(|e| {
            let err = Self::context(ctx, "create")
                .with("email", &customer.email)
                .store_error(e, ErrorCode::CreateFailed);
            error!(tenant_id = %ctx.tenant_id, error = %err, "Failed to create customer");
            err
        })?;

        info!(tenant_id = %ctx.tenant_id, customer_id = %created.id, "Customer created");
        self.activity
            .record(ctx, "created", "customer", created.id, format!("Created customer {}", created.name))
            .await;
        Ok(created)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        mut update: UpdateCustomer,
    ) -> Result<Customer, StandardError> {
        ctx.require(Permission::WriteCustomers)?;
        if let Some(name) = &update.name {
            non_blank(name, "name")?;
        }
        if let Some(email) = update.email.take() {
            valid_email(&email)?;
            let email = email.trim().to_lowercase();
            if let Some(existing) = self.find_by_email(ctx, &email).await? {
                if existing.id != id {
                    return Err(StandardError::new(
                        ErrorCode::Conflict,
                        "A customer with this email already exists",
                    )
                    .with("email", &email)
                    .in_context(&Self::context(ctx, "update")));
                }
            }
            update.email = Some(email);
        }

        let query = Self::live(ctx).eq("id", id.to_string());
        let patch = Patch {
            fields: &update,
            updated_at: Utc::now(),
        };

        let updated: Customer = self
            .db
            .update_one(TABLE, &query, &patch)
            .await
            .map_err(|e| {
                Self::context(ctx, "update")
                    .with("customer_id", id)
                    .store_error(e, ErrorCode::UpdateFailed)
            })?;

        self.activity
            .record(ctx, "updated", "customer", id, format!("Updated customer {}", updated.name))
            .await;
        Ok(updated)
    }

    /// Soft delete: hidden from reads, history (proposals, contacts) preserved
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StandardError> {
        ctx.require(Permission::DeleteRecords)?;

        let now = Utc::now();
        let query = Self::live(ctx).eq("id", id.to_string());
        let _: Customer = self
            .db
            .update_one(
                TABLE,
                &query,
                &SoftDelete {
                    deleted_at: now,
                    status: CustomerStatus::Inactive,
                    updated_at: now,
                },
            )
            .await
            .map_err(|e| {
                Self::context(ctx, "delete")
                    .with("customer_id", id)
                    .store_error(e, ErrorCode::DeleteFailed)
            })?;

        info!(tenant_id = %ctx.tenant_id, customer_id = %id, "Customer deleted");
        self.activity
            .record(ctx, "deleted", "customer", id, "Deleted customer")
            .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------

    pub async fn contacts(
        &self,
        ctx: &RequestContext,
        customer_id: Uuid,
    ) -> Result<Vec<CustomerContact>, StandardError> {
        self.get(ctx, customer_id).await?;

        let query = Query::tenant(ctx.tenant_id)
            .eq("customer_id", customer_id.to_string())
            .order_by("created_at", true);
        self.db
            .select(CONTACTS, &query)
            .await
            .map_err(|e| Self::context(ctx, "contacts").store_error(e, ErrorCode::FetchFailed))
    }

    /// Add a contact. The first contact of a customer always becomes primary.
    pub async fn add_contact(
        &self,
        ctx: &RequestContext,
        customer_id: Uuid,
        input: CreateContact,
    ) -> Result<CustomerContact, StandardError> {
        ctx.require(Permission::WriteCustomers)?;
        non_blank(&input.name, "name")?;
        if let Some(email) = &input.email {
            valid_email(email)?;
        }

        let existing = self.contacts(ctx, customer_id).await?;
        let is_primary = input.is_primary || existing.is_empty();
        let previous = existing.iter().find(|c| c.is_primary).map(|c| c.id);
        if is_primary {
            self.clear_primary(ctx, customer_id).await?;
        }

        let now = Utc::now();
        let contact = CustomerContact {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            customer_id,
            name: input.name.trim().to_string(),
            email: input.email.map(|e| e.trim().to_lowercase()),
            phone: input.phone,
            title: input.title,
            is_primary,
            created_at: now,
            updated_at: now,
        };

        let result = self.db.insert(CONTACTS, &contact).await.map_err(|e| {
            ErrorContext::new(COMPONENT, "add_contact", "contact")
                .with("customer_id", customer_id)
                .store_error(e, ErrorCode::CreateFailed)
        });
        if result.is_err() && is_primary {
            self.restore_primary(ctx, previous).await;
        }
        result
    }

    pub async fn set_primary_contact(
        &self,
        ctx: &RequestContext,
        customer_id: Uuid,
        contact_id: Uuid,
    ) -> Result<CustomerContact, StandardError> {
        ctx.require(Permission::WriteCustomers)?;

        let contacts = self.contacts(ctx, customer_id).await?;
        if !contacts.iter().any(|c| c.id == contact_id) {
            return Err(StandardError::not_found("Contact", contact_id)
                .in_context(&Self::context(ctx, "set_primary_contact")));
        }
        let previous = contacts.iter().find(|c| c.is_primary).map(|c| c.id);

        self.clear_primary(ctx, customer_id).await?;

        let query = Query::tenant(ctx.tenant_id).eq("id", contact_id.to_string());
        let result = self
            .db
            .update_one(
                CONTACTS,
                &query,
                &PrimaryFlag {
                    is_primary: true,
                    updated_at: Utc::now(),
                },
            )
            .await
            .map_err(|e| {
                Self::context(ctx, "set_primary_contact").store_error(e, ErrorCode::UpdateFailed)
            });
        if result.is_err() {
            self.restore_primary(ctx, previous).await;
        }
        result
    }

    /// Remove a contact; if it was primary the oldest remaining one takes over
    pub async fn remove_contact(
        &self,
        ctx: &RequestContext,
        customer_id: Uuid,
        contact_id: Uuid,
    ) -> Result<(), StandardError> {
        ctx.require(Permission::WriteCustomers)?;

        let contacts = self.contacts(ctx, customer_id).await?;
        let removed = contacts
            .iter()
            .find(|c| c.id == contact_id)
            .ok_or_else(|| {
                StandardError::not_found("Contact", contact_id)
                    .in_context(&Self::context(ctx, "remove_contact"))
            })?;

        let query = Query::tenant(ctx.tenant_id).eq("id", contact_id.to_string());
        self.db.delete(CONTACTS, &query).await.map_err(|e| {
            Self::context(ctx, "remove_contact").store_error(e, ErrorCode::DeleteFailed)
        })?;

        if removed.is_primary {
            if let Some(next) = contacts.iter().find(|c| c.id != contact_id) {
                self.set_primary_contact(ctx, customer_id, next.id).await?;
            }
        }
        Ok(())
    }

    async fn clear_primary(&self, ctx: &RequestContext, customer_id: Uuid) -> Result<(), StandardError> {
        let query = Query::tenant(ctx.tenant_id)
            .eq("customer_id", customer_id.to_string())
            .eq("is_primary", true);
        self.db
            .update::<_, CustomerContact>(
                CONTACTS,
                &query,
                &PrimaryFlag {
                    is_primary: false,
                    updated_at: Utc::now(),
                },
            )
            .await
            .map_err(|e| Self::context(ctx, "clear_primary").store_error(e, ErrorCode::UpdateFailed))?;
        Ok(())
    }

    /// Put the primary flag back after a failed swap
    async fn restore_primary(&self, ctx: &RequestContext, previous: Option<Uuid>) {
        let Some(id) = previous else { return };
        warn!(contact_id = %id, "Restoring primary contact after failed change");
        let query = Query::tenant(ctx.tenant_id).eq("id", id.to_string());
        let flag = PrimaryFlag {
            is_primary: true,
            updated_at: Utc::now(),
        };
        if let Err(e) = self.db.update::<_, CustomerContact>(CONTACTS, &query, &flag).await {
            error!(contact_id = %id, error = %e, "Failed to restore primary contact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::store::testing::{FailingStore, Write};
    use crate::store::MemoryStore;

    fn service() -> CustomerService {
        let db = Db::new(MemoryStore::with_schema());
        CustomerService::new(db.clone(), ActivityService::new(db))
    }

    fn sales(tenant_id: Uuid) -> RequestContext {
        RequestContext::new(Uuid::new_v4(), tenant_id, UserRole::Sales)
    }

    fn acme(email: &str) -> CreateCustomer {
        CreateCustomer {
            name: "Acme".to_string(),
            email: email.to_string(),
            phone: None,
            company: Some("Acme Corp".to_string()),
            industry: None,
            status: CustomerStatus::Active,
            tags: vec![],
            notes: None,
        }
    }

    fn contact(name: &str, primary: bool) -> CreateContact {
        CreateContact {
            name: name.to_string(),
            email: None,
            phone: None,
            title: None,
            is_primary: primary,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict_within_tenant_only() {
        let customers = service();
        let tenant = Uuid::new_v4();

        customers.create(&sales(tenant), acme("buy@acme.io")).await.unwrap();

        let err = customers
            .create(&sales(tenant), acme("Buy@Acme.io"))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.metadata.operation.as_deref(), Some("create"));

        // Same email in another tenant is fine
        customers
            .create(&sales(Uuid::new_v4()), acme("buy@acme.io"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn store_level_unique_violation_maps_to_conflict() {
        let db = Db::new(MemoryStore::with_schema());
        let ctx = sales(Uuid::new_v4());
        let now = Utc::now();
        let row = Customer {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: "Acme".into(),
            email: "race@acme.io".into(),
            phone: None,
            company: None,
            industry: None,
            status: CustomerStatus::Prospect,
            tags: vec![],
            notes: None,
            created_by: ctx.user_id,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        db.insert::<_, Customer>(TABLE, &row).await.unwrap();

        let err = db
            .insert::<_, Customer>(TABLE, &Customer { id: Uuid::new_v4(), ..row })
            .await
            .map_err(|e| CustomerService::context(&ctx, "create").store_error(e, ErrorCode::CreateFailed))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.message, "A customer with this email already exists");
    }

    #[tokio::test]
    async fn soft_delete_hides_customer() {
        let customers = service();
        let tenant = Uuid::new_v4();
        let admin = RequestContext::new(Uuid::new_v4(), tenant, UserRole::Admin);
        let created = customers.create(&admin, acme("a@acme.io")).await.unwrap();

        // Sales may not delete
        let err = customers.delete(&sales(tenant), created.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);

        customers.delete(&admin, created.id).await.unwrap();
        let err = customers.get(&admin, created.id).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);

        let listing = customers.list(&admin, &CustomerFilter::default()).await.unwrap();
        assert_eq!(listing.total, 0);
    }

    #[tokio::test]
    async fn only_one_primary_contact() {
        let customers = service();
        let ctx = sales(Uuid::new_v4());
        let customer = customers.create(&ctx, acme("c@acme.io")).await.unwrap();

        let first = customers
            .add_contact(&ctx, customer.id, contact("Ann", false))
            .await
            .unwrap();
        assert!(first.is_primary, "first contact becomes primary");

        let second = customers
            .add_contact(&ctx, customer.id, contact("Bob", true))
            .await
            .unwrap();
        assert!(second.is_primary);

        let contacts = customers.contacts(&ctx, customer.id).await.unwrap();
        assert_eq!(contacts.iter().filter(|c| c.is_primary).count(), 1);

        customers
            .set_primary_contact(&ctx, customer.id, first.id)
            .await
            .unwrap();
        customers.remove_contact(&ctx, customer.id, first.id).await.unwrap();

        let contacts = customers.contacts(&ctx, customer.id).await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert!(contacts[0].is_primary, "remaining contact promoted");
    }

    #[tokio::test]
    async fn update_rejects_taken_email() {
        let customers = service();
        let ctx = sales(Uuid::new_v4());
        customers.create(&ctx, acme("one@acme.io")).await.unwrap();
        let two = customers.create(&ctx, acme("two@acme.io")).await.unwrap();

        let err = customers
            .update(
                &ctx,
                two.id,
                UpdateCustomer {
                    email: Some("ONE@acme.io".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);

        let renamed = customers
            .update(
                &ctx,
                two.id,
                UpdateCustomer {
                    name: Some("Acme Two".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "Acme Two");
        assert!(renamed.updated_at >= two.updated_at);
    }

    #[tokio::test]
    async fn failed_primary_swap_keeps_the_old_primary() {
        let (store, db) = FailingStore::with_schema();
        let customers = CustomerService::new(db.clone(), ActivityService::new(db));
        let ctx = sales(Uuid::new_v4());
        let customer = customers.create(&ctx, acme("d@acme.io")).await.unwrap();

        let ann = customers
            .add_contact(&ctx, customer.id, contact("Ann", true))
            .await
            .unwrap();
        let bob = customers
            .add_contact(&ctx, customer.id, contact("Bob", false))
            .await
            .unwrap();

        store.fail_next(Write::Insert, CONTACTS);
        let err = customers
            .add_contact(&ctx, customer.id, contact("Cy", true))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CreateFailed);

        let primaries = |contacts: Vec<CustomerContact>| {
            contacts
                .into_iter()
                .filter(|c| c.is_primary)
                .map(|c| c.id)
                .collect::<Vec<_>>()
        };
        let contacts = customers.contacts(&ctx, customer.id).await.unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(primaries(contacts), vec![ann.id]);

        // Clearing the old flag goes through, promoting Bob does not
        store.fail_nth(Write::Update, CONTACTS, 2);
        let err = customers
            .set_primary_contact(&ctx, customer.id, bob.id)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UpdateFailed);
        let contacts = customers.contacts(&ctx, customer.id).await.unwrap();
        assert_eq!(primaries(contacts), vec![ann.id]);

        customers
            .set_primary_contact(&ctx, customer.id, bob.id)
            .await
            .unwrap();
        let contacts = customers.contacts(&ctx, customer.id).await.unwrap();
        assert_eq!(primaries(contacts), vec![bob.id]);
    }
}
