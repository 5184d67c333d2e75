//! Proposals, their line items and version history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    non_blank, ActivityService, CustomerService, Listing, NotificationService, Page, ProductService,
};
use crate::auth::{Permission, RequestContext};
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query, StoreError};

const TABLE: &str = "proposals";
const ITEMS: &str = "proposal_items";
const VERSIONS: &str = "proposal_versions";
const COMPONENT: &str = "ProposalService";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Draft,
    InReview,
    Approved,
    Rejected,
    Sent,
    Won,
    Lost,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 7] = [
        ProposalStatus::Draft,
        ProposalStatus::InReview,
        ProposalStatus::Approved,
        ProposalStatus::Rejected,
        ProposalStatus::Sent,
        ProposalStatus::Won,
        ProposalStatus::Lost,
    ];

    /// Allowed next states
    pub fn next(&self) -> &'static [ProposalStatus] {
        use ProposalStatus::*;
        match self {
            Draft => &[InReview],
            InReview => &[Approved, Rejected, Draft],
            Approved => &[Sent, Draft],
            Rejected => &[Draft],
            Sent => &[Won, Lost],
            Won | Lost => &[],
        }
    }

    pub fn can_transition_to(&self, target: ProposalStatus) -> bool {
        self.next().contains(&target)
    }

    /// Won or lost; no further edits
    pub fn is_closed(&self) -> bool {
        matches!(self, ProposalStatus::Won | ProposalStatus::Lost)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::InReview => "in_review",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Sent => "sent",
            ProposalStatus::Won => "won",
            ProposalStatus::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub customer_id: Uuid,
    pub owner_id: Uuid,
    pub status: ProposalStatus,
    pub priority: Priority,
    pub total_value: f64,
    pub currency: String,
    pub due_date: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalItem {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub proposal_id: Uuid,
    pub product_id: Uuid,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub discount_percent: f64,
}

impl ProposalItem {
    pub fn line_total(&self) -> f64 {
        line_total(self.quantity, self.unit_price, self.discount_percent)
    }
}

/// Proposal together with its line items
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalDetail {
    #[serde(flatten)]
    pub proposal: Proposal,
    pub items: Vec<ProposalItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalVersion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub proposal_id: Uuid,
    pub version: i32,
    pub snapshot: serde_json::Value,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProposalItemInput {
    pub product_id: Uuid,
    pub description: Option<String>,
    pub quantity: f64,
    /// Defaults to the product's list price
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub discount_percent: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CreateProposal {
    pub title: String,
    pub description: Option<String>,
    pub customer_id: Uuid,
    /// Defaults to the caller
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Priority,
    pub currency: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub items: Vec<ProposalItemInput>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateProposal {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub owner_id: Option<Uuid>,
    /// Replaces every line item when present
    pub items: Option<Vec<ProposalItemInput>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProposalFilter {
    pub status: Option<ProposalStatus>,
    pub customer_id: Option<Uuid>,
    pub owner_id: Option<Uuid>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
struct ProposalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_value: Option<f64>,
    version: i32,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct StatusPatch {
    status: ProposalStatus,
    updated_at: DateTime<Utc>,
}

fn line_total(quantity: f64, unit_price: f64, discount_percent: f64) -> f64 {
    let gross = quantity * unit_price;
    let total = gross - gross * discount_percent / 100.0;
    (total * 100.0).round() / 100.0
}

/// Sum of line totals, rounded to cents
pub fn proposal_total(items: &[ProposalItem]) -> f64 {
    let sum: f64 = items.iter().map(ProposalItem::line_total).sum();
    (sum * 100.0).round() / 100.0
}

#[derive(Clone)]
pub struct ProposalService {
    db: Db,
    customers: CustomerService,
    products: ProductService,
    activity: ActivityService,
    notifications: NotificationService,
}

impl ProposalService {
    pub fn new(
        db: Db,
        customers: CustomerService,
        products: ProductService,
        activity: ActivityService,
        notifications: NotificationService,
    ) -> Self {
        Self {
            db,
            customers,
            products,
            activity,
            notifications,
        }
    }

    fn context(ctx: &RequestContext, operation: &'static str) -> ErrorContext {
        ErrorContext::new(COMPONENT, operation, "proposal").with("tenant_id", ctx.tenant_id)
    }

    fn by_id(ctx: &RequestContext, id: Uuid) -> Query {
        Query::tenant(ctx.tenant_id).eq("id", id.to_string())
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &ProposalFilter,
    ) -> Result<Listing<Proposal>, StandardError> {
        let mut query = Query::tenant(ctx.tenant_id);
        if let Some(status) = filter.status {
            query = query.eq("status", status.as_str());
        }
        if let Some(customer_id) = filter.customer_id {
            query = query.eq("customer_id", customer_id.to_string());
        }
        if let Some(owner_id) = filter.owner_id {
            query = query.eq("owner_id", owner_id.to_string());
        }
        if let Some(term) = &filter.search {
            query = query.search(&["title", "description"], term);
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

    /// Every proposal of the tenant matching `query` extras, unpaged
    pub async fn all(
        &self,
        ctx: &RequestContext,
        refine: impl FnOnce(Query) -> Query,
    ) -> Result<Vec<Proposal>, StandardError> {
        let query = refine(Query::tenant(ctx.tenant_id));
        self.db
            .select(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "all").store_error(e, ErrorCode::FetchFailed))
    }

    pub async fn get(&self, ctx: &RequestContext, id: Uuid) -> Result<Proposal, StandardError> {
        self.db
            .select_one(TABLE, &Self::by_id(ctx, id))
            .await
            .map_err(|e| Self::context(ctx, "get").store_error(e, ErrorCode::FetchFailed))?
            .ok_or_else(|| {
                StandardError::not_found("Proposal", id).in_context(&Self::context(ctx, "get"))
            })
    }

    pub async fn get_detail(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<ProposalDetail, StandardError> {
        let proposal = self.get(ctx, id).await?;
        let items = self.items(ctx, id).await?;
        Ok(ProposalDetail { proposal, items })
    }

    async fn items(&self, ctx: &RequestContext, id: Uuid) -> Result<Vec<ProposalItem>, StandardError> {
        let query = Query::tenant(ctx.tenant_id).eq("proposal_id", id.to_string());
        self.db
            .select(ITEMS, &query)
            .await
            .map_err(|e| Self::context(ctx, "items").store_error(e, ErrorCode::FetchFailed))
    }

    /// Resolve inputs to stored items, filling prices from the catalog
    async fn build_items(
        &self,
        ctx: &RequestContext,
        proposal_id: Uuid,
        inputs: &[ProposalItemInput],
    ) -> Result<Vec<ProposalItem>, StandardError> {
        let mut items = Vec::with_capacity(inputs.len());

        for (idx, input) in inputs.iter().enumerate() {
            if !(input.quantity > 0.0) {
                return Err(StandardError::validation(format!(
                    "Item {}: quantity must be greater than zero",
                    idx + 1
                )));
            }
            if !(0.0..=100.0).contains(&input.discount_percent) {
                return Err(StandardError::validation(format!(
                    "Item {}: discount must be between 0 and 100",
                    idx + 1
                )));
            }

            let product = self.products.get(ctx, input.product_id).await?;
            if !product.is_active {
                return Err(StandardError::validation(format!(
                    "Product {} is no longer available",
                    product.sku
                ))
                .with("product_id", product.id));
            }

            let unit_price = input.unit_price.unwrap_or(product.unit_price);
            if !unit_price.is_finite() || unit_price < 0.0 {
                return Err(StandardError::validation(format!(
                    "Item {}: unit price must be non-negative",
                    idx + 1
                )));
            }

            items.push(ProposalItem {
                id: Uuid::new_v4(),
                tenant_id: ctx.tenant_id,
                proposal_id,
                product_id: product.id,
                description: input.description.clone().or(product.description),
                quantity: input.quantity,
                unit_price,
                discount_percent: input.discount_percent,
            });
        }

        Ok(items)
    }

    async fn insert_items(
        &self,
        ctx: &RequestContext,
        items: &[ProposalItem],
    ) -> Result<(), StandardError> {
        for item in items {
            self.db
                .insert::<_, ProposalItem>(ITEMS, item)
                .await
                .map_err(|e| {
                    ErrorContext::new(COMPONENT, "insert_items", "proposal item")
                        .with("tenant_id", ctx.tenant_id)
                        .with("proposal_id", item.proposal_id)
                        .store_error(e, ErrorCode::CreateFailed)
                })?;
        }
        Ok(())
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateProposal,
    ) -> Result<ProposalDetail, StandardError> {
        ctx.require(Permission::WriteProposals)?;
        non_blank(&input.title, "title")?;

        // Surface a clean not-found instead of a foreign key failure
        let customer = self.customers.get(ctx, input.customer_id).await?;

        let id = Uuid::new_v4();
        let items = self.build_items(ctx, id, &input.items).await?;
        let now = Utc::now();

        let proposal = Proposal {
            id,
            tenant_id: ctx.tenant_id,
            title: input.title.trim().to_string(),
            description: input.description,
            customer_id: customer.id,
            owner_id: input.owner_id.unwrap_or(ctx.user_id),
            status: ProposalStatus::Draft,
            priority: input.priority,
            total_value: proposal_total(&items),
            currency: input.currency.unwrap_or_else(|| "USD".to_string()),
            due_date: input.due_date,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let created: Proposal = self.db.insert(TABLE, &proposal).await.map_err(|e| {
            let err = Self::context(ctx, "create").store_error(e, ErrorCode::CreateFailed);
            error!(tenant_id = %ctx.tenant_id, error = %err, "Failed to create proposal");
            err
        })?;

        if let Err(err) = self.insert_items(ctx, &items).await {
            // Do not leave a proposal whose total disagrees with its items
            warn!(proposal_id = %id, error = %err, "Item insert failed, removing proposal");
            let children = Query::tenant(ctx.tenant_id).eq("proposal_id", id.to_string());
            if let Err(e) = self.db.delete(ITEMS, &children).await {
                warn!(proposal_id = %id, error = %e, "Failed to remove partial items");
            }
            if let Err(e) = self.db.delete(TABLE, &Self::by_id(ctx, id)).await {
                warn!(proposal_id = %id, error = %e, "Failed to remove item-less proposal");
            }
            return Err(err);
        }

        info!(
            tenant_id = %ctx.tenant_id,
            proposal_id = %id,
            items = items.len(),
            total = created.total_value,
            "Proposal created"
        );
        self.activity
            .record(ctx, "created", "proposal", id, format!("Created proposal {}", created.title))
            .await;

        Ok(ProposalDetail {
            proposal: created,
            items,
        })
    }

    /// Edit a proposal. The previous state is kept as a version snapshot.
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: UpdateProposal,
    ) -> Result<ProposalDetail, StandardError> {
        ctx.require(Permission::WriteProposals)?;
        if let Some(title) = &update.title {
            non_blank(title, "title")?;
        }

        let current = self.get_detail(ctx, id).await?;
        if current.proposal.status.is_closed() {
            return Err(StandardError::new(
                ErrorCode::Conflict,
                format!("Proposal is {} and can no longer be edited", current.proposal.status.as_str()),
            )
            .in_context(&Self::context(ctx, "update").with("proposal_id", id)));
        }

        let new_items = match &update.items {
            Some(inputs) => Some(self.build_items(ctx, id, inputs).await?),
            None => None,
        };

        // The snapshot row is unique per (proposal, version) and doubles as the edit lock
        let snapshot_id = self.snapshot(ctx, &current).await?;

        let patch = ProposalPatch {
            title: update.title.map(|t| t.trim().to_string()),
            description: update.description,
            priority: update.priority,
            due_date: update.due_date,
            owner_id: update.owner_id,
            total_value: new_items.as_deref().map(proposal_total),
            version: current.proposal.version + 1,
            updated_at: Utc::now(),
        };

        let proposal = match self.write_update(ctx, &current, new_items.as_deref(), &patch).await {
            Ok(proposal) => proposal,
            Err(err) => {
                warn!(proposal_id = %id, error = %err, "Proposal update failed, rolling back");
                self.rollback_update(ctx, &current, snapshot_id, new_items.is_some())
                    .await;
                return Err(err);
            }
        };

        self.activity
            .record(
                ctx,
                "updated",
                "proposal",
                id,
                format!("Updated proposal {} to version {}", proposal.title, proposal.version),
            )
            .await;

        Ok(ProposalDetail {
            proposal,
            items: new_items.unwrap_or(current.items),
        })
    }

    /// Swap the items, then bump the version only if nobody else did
    async fn write_update(
        &self,
        ctx: &RequestContext,
        current: &ProposalDetail,
        new_items: Option<&[ProposalItem]>,
        patch: &ProposalPatch,
    ) -> Result<Proposal, StandardError> {
        let id = current.proposal.id;
        let context = Self::context(ctx, "update").with("proposal_id", id);

        if let Some(items) = new_items {
            self.db
                .delete(ITEMS, &Query::tenant(ctx.tenant_id).eq("proposal_id", id.to_string()))
                .await
                .map_err(|e| context.store_error(e, ErrorCode::UpdateFailed))?;
            self.insert_items(ctx, items).await?;
        }

        let query = Self::by_id(ctx, id).eq("version", current.proposal.version);
        self.db
            .update_one(TABLE, &query, patch)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => StandardError::new(
                    ErrorCode::Conflict,
                    "Proposal was changed by someone else, reload and try again",
                )
                .in_context(&context),
                e => context.store_error(e, ErrorCode::UpdateFailed),
            })
    }

    /// Put back the previous items and drop the snapshot written for this edit
    async fn rollback_update(
        &self,
        ctx: &RequestContext,
        current: &ProposalDetail,
        snapshot_id: Uuid,
        items_touched: bool,
    ) {
        let id = current.proposal.id;

        if items_touched {
            let children = Query::tenant(ctx.tenant_id).eq("proposal_id", id.to_string());
            match self.db.delete(ITEMS, &children).await {
                Ok(_) => {
                    if let Err(e) = self.insert_items(ctx, &current.items).await {
                        error!(proposal_id = %id, error = %e, "Failed to restore proposal items");
                    }
                }
                Err(e) => {
                    error!(proposal_id = %id, error = %e, "Failed to clear replacement items");
                }
            }
        }

        let snapshot = Query::tenant(ctx.tenant_id).eq("id", snapshot_id.to_string());
        if let Err(e) = self.db.delete(VERSIONS, &snapshot).await {
            error!(proposal_id = %id, error = %e, "Failed to drop version snapshot");
        }
    }

    async fn snapshot(&self, ctx: &RequestContext, detail: &ProposalDetail) -> Result<Uuid, StandardError> {
        let version = ProposalVersion {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            proposal_id: detail.proposal.id,
            version: detail.proposal.version,
            snapshot: serde_json::to_value(detail)
                .map_err(|e| StandardError::internal(format!("Failed to snapshot proposal: {}", e)))?,
            created_by: ctx.user_id,
            created_at: Utc::now(),
        };

        self.db
            .insert::<_, ProposalVersion>(VERSIONS, &version)
            .await
            .map_err(|e| {
                ErrorContext::new(COMPONENT, "snapshot", "proposal version")
                    .with("proposal_id", detail.proposal.id)
                    .store_error(e, ErrorCode::UpdateFailed)
            })?;
        Ok(version.id)
    }

    pub async fn versions(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> Result<Vec<ProposalVersion>, StandardError> {
        self.get(ctx, id).await?;
        let query = Query::tenant(ctx.tenant_id)
            .eq("proposal_id", id.to_string())
            .order_by("version", false);
        self.db
            .select(VERSIONS, &query)
            .await
            .map_err(|e| Self::context(ctx, "versions").store_error(e, ErrorCode::FetchFailed))
    }

    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: ProposalStatus,
    ) -> Result<Proposal, StandardError> {
        let decision = matches!(status, ProposalStatus::Approved | ProposalStatus::Rejected);
        ctx.require(if decision {
            Permission::ApproveProposals
        } else {
            Permission::WriteProposals
        })?;

        let current = self.get(ctx, id).await?;
        if !current.status.can_transition_to(status) {
            return Err(StandardError::validation(format!(
                "Cannot move proposal from {} to {}",
                current.status.as_str(),
                status.as_str()
            ))
            .in_context(&Self::context(ctx, "update_status").with("proposal_id", id)));
        }

        let proposal: Proposal = self
            .db
            .update_one(
                TABLE,
                &Self::by_id(ctx, id),
                &StatusPatch {
                    status,
                    updated_at: Utc::now(),
                },
            )
            .await
            .map_err(|e| {
                Self::context(ctx, "update_status")
                    .with("proposal_id", id)
                    .store_error(e, ErrorCode::UpdateFailed)
            })?;

        info!(
            tenant_id = %ctx.tenant_id,
            proposal_id = %id,
            from = current.status.as_str(),
            to = status.as_str(),
            "Proposal status changed"
        );
        self.activity
            .record(
                ctx,
                "status_changed",
                "proposal",
                id,
                format!("Moved {} to {}", proposal.title, status.as_str()),
            )
            .await;

        if proposal.owner_id != ctx.user_id {
            let message = format!("\"{}\" is now {}", proposal.title, status.as_str());
            if let Err(e) = self
                .notifications
                .notify(ctx.tenant_id, proposal.owner_id, "Proposal status changed", &message)
                .await
            {
                warn!(proposal_id = %id, error = %e, "Failed to notify proposal owner");
            }
        }
        Ok(proposal)
    }

    /// Hard delete with items and history
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StandardError> {
        ctx.require(Permission::DeleteRecords)?;
        self.get(ctx, id).await?;

        let children = Query::tenant(ctx.tenant_id).eq("proposal_id", id.to_string());
        let wrap = |e| {
            Self::context(ctx, "delete")
                .with("proposal_id", id)
                .store_error(e, ErrorCode::DeleteFailed)
        };

        self.db.delete(ITEMS, &children).await.map_err(wrap)?;
        self.db.delete(VERSIONS, &children).await.map_err(wrap)?;
        self.db.delete(TABLE, &Self::by_id(ctx, id)).await.map_err(wrap)?;

        info!(tenant_id = %ctx.tenant_id, proposal_id = %id, "Proposal deleted");
        self.activity
            .record(ctx, "deleted", "proposal", id, "Deleted proposal")
            .await;
        Ok(())
    }
}
