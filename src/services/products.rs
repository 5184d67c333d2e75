//! Product catalog

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use super::{non_blank, ActivityService, Listing, Page};
use crate::auth::{Permission, RequestContext};
use crate::error::{ErrorCode, ErrorContext, StandardError};
use crate::store::{Db, Query};

const TABLE: &str = "products";
const COMPONENT: &str = "ProductService";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: f64,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateProduct {
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateProduct {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Serialize)]
struct ProductPatch<'a> {
    #[serde(flatten)]
    update: &'a UpdateProduct,
    updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ProductService {
    db: Db,
    activity: ActivityService,
}

impl ProductService {
    pub fn new(db: Db, activity: ActivityService) -> Self {
        Self { db, activity }
    }

    fn context(ctx: &RequestContext, operation: &'static str) -> ErrorContext {
        ErrorContext::new(COMPONENT, operation, "product").with("tenant_id", ctx.tenant_id)
    }

    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &ProductFilter,
    ) -> Result<Listing<Product>, StandardError> {
        let mut query = Query::tenant(ctx.tenant_id);
        if let Some(category) = &filter.category {
            query = query.eq("category", category.as_str());
        }
        if let Some(active) = filter.active {
            query = query.eq("is_active", active);
        }
        if let Some(term) = &filter.search {
            query = query.search(&["name", "sku", "description"], term);
        }

        let wrap = |e| Self::context(ctx, "list").store_error(e, ErrorCode::FetchFailed);
        let total = self.db.count(TABLE, &query).await.map_err(wrap)?;
        let page = Page::new(filter.limit, filter.offset);
        let items = self
            .db
            .select(TABLE, &page.apply(query.order_by("name", true)))
            .await
            .map_err(wrap)?;

        Ok(Listing { items, total })
    }

    pub async fn get(&self, ctx: &RequestContext, id: Uuid) -> Result<Product, StandardError> {
        let query = Query::tenant(ctx.tenant_id).eq("id", id.to_string());
        self.db
            .select_one(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "get").store_error(e, ErrorCode::FetchFailed))?
            .ok_or_else(|| {
                StandardError::not_found("Product", id).in_context(&Self::context(ctx, "get"))
            })
    }

    /// Distinct categories in use, sorted
    pub async fn categories(&self, ctx: &RequestContext) -> Result<Vec<String>, StandardError> {
        let query = Query::tenant(ctx.tenant_id).not_null("category");
        let products: Vec<Product> = self
            .db
            .select(TABLE, &query)
            .await
            .map_err(|e| Self::context(ctx, "categories").store_error(e, ErrorCode::FetchFailed))?;

        let categories: BTreeSet<String> =
            products.into_iter().filter_map(|p| p.category).collect();
        Ok(categories.into_iter().collect())
    }

    pub async fn create(
        &self,
        ctx: &RequestContext,
        input: CreateProduct,
    ) -> Result<Product, StandardError> {
        ctx.require(Permission::WriteProducts)?;
        non_blank(&input.name, "name")?;
        non_blank(&input.sku, "sku")?;
        check_price(input.unit_price)?;

        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            name: input.name.trim().to_string(),
            sku: input.sku.trim().to_uppercase(),
            description: input.description,
            category: input.category,
            unit_price: input.unit_price,
            currency: input.currency,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        let created: Product = self.db.insert(TABLE, &product).await.map_err(|e| {
            let err = Self::context(ctx, "create")
                .with("sku", &product.sku)
                .store_error(e, ErrorCode::CreateFailed);
            error!(tenant_id = %ctx.tenant_id, error = %err, "Failed to create product");
            err
        })?;

        info!(tenant_id = %ctx.tenant_id, product_id = %created.id, sku = %created.sku, "Product created");
        self.activity
            .record(ctx, "created", "product", created.id, format!("Created product {}", created.name))
            .await;
        Ok(created)
    }

    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        update: UpdateProduct,
    ) -> Result<Product, StandardError> {
        ctx.require(Permission::WriteProducts)?;
        if let Some(name) = &update.name {
            non_blank(name, "name")?;
        }
        if let Some(price) = update.unit_price {
            check_price(price)?;
        }

        let query = Query::tenant(ctx.tenant_id).eq("id", id.to_string());
        let patch = ProductPatch {
            update: &update,
            updated_at: Utc::now(),
        };
        self.db.update_one(TABLE, &query, &patch).await.map_err(|e| {
            Self::context(ctx, "update")
                .with("product_id", id)
                .store_error(e, ErrorCode::UpdateFailed)
        })
    }

    /// Hard delete. Products quoted on a proposal are refused by the FK.
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid) -> Result<(), StandardError> {
        ctx.require(Permission::DeleteRecords)?;

        let query = Query::tenant(ctx.tenant_id).eq("id", id.to_string());
        let removed = self.db.delete(TABLE, &query).await.map_err(|e| {
            Self::context(ctx, "delete")
                .with("product_id", id)
                .store_error(e, ErrorCode::DeleteFailed)
        })?;

        if removed == 0 {
            return Err(StandardError::not_found("Product", id)
                .in_context(&Self::context(ctx, "delete")));
        }

        info!(tenant_id = %ctx.tenant_id, product_id = %id, "Product deleted");
        self.activity
            .record(ctx, "deleted", "product", id, "Deleted product")
            .await;
        Ok(())
    }
}

fn check_price(price: f64) -> Result<(), StandardError> {
    if !price.is_finite() || price < 0.0 {
        return Err(StandardError::validation("unit_price must be a non-negative number"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::store::MemoryStore;

    fn service() -> ProductService {
        let db = Db::new(MemoryStore::with_schema());
        ProductService::new(db.clone(), ActivityService::new(db))
    }

    fn manager() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Manager)
    }

    fn widget(sku: &str, category: Option<&str>) -> CreateProduct {
        CreateProduct {
            name: format!("Widget {}", sku),
            sku: sku.to_string(),
            description: None,
            category: category.map(String::from),
            unit_price: 10.0,
            currency: default_currency(),
        }
    }

    #[tokio::test]
    async fn duplicate_sku_conflicts() {
        let products = service();
        let ctx = manager();
        products.create(&ctx, widget("w-1", None)).await.unwrap();

        let err = products.create(&ctx, widget("W-1", None)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.message, "A product with this sku already exists");
    }

    #[tokio::test]
    async fn categories_are_distinct_and_sorted() {
        let products = service();
        let ctx = manager();
        products.create(&ctx, widget("a", Some("software"))).await.unwrap();
        products.create(&ctx, widget("b", Some("hardware"))).await.unwrap();
        products.create(&ctx, widget("c", Some("software"))).await.unwrap();
        products.create(&ctx, widget("d", None)).await.unwrap();

        assert_eq!(
            products.categories(&ctx).await.unwrap(),
            vec!["hardware".to_string(), "software".to_string()]
        );
    }

    #[tokio::test]
    async fn rejects_negative_price_and_missing_delete() {
        let products = service();
        let ctx = manager();
        let mut bad = widget("x", None);
        bad.unit_price = -1.0;
        assert_eq!(
            products.create(&ctx, bad).await.unwrap_err().code,
            ErrorCode::ValidationFailed
        );
        assert_eq!(
            products.delete(&ctx, Uuid::new_v4()).await.unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    #[tokio::test]
    async fn sales_cannot_edit_catalog() {
        let products = service();
        let ctx = RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Sales);
        let err = products.create(&ctx, widget("s", None)).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::Forbidden);
    }
}
