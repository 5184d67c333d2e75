use std::time::Duration;

use uuid::Uuid;

use super::{permit, ApiClient, CachedBridge, DEFAULT_TTL};
use crate::auth::{Permission, UserRole};
use crate::error::StandardError;
use crate::services::products::{CreateProduct, Product, ProductFilter, UpdateProduct};
use crate::services::Listing;

const NAME: &str = "ProductBridge";

/// Catalog reads change rarely, so everything read here is cached
#[derive(Clone)]
pub struct ProductBridge {
    api: ApiClient,
    role: UserRole,
    cache: CachedBridge,
}

impl ProductBridge {
    pub fn new(api: ApiClient, role: UserRole) -> Self {
        Self::with_ttl(api, role, DEFAULT_TTL)
    }

    pub fn with_ttl(api: ApiClient, role: UserRole, ttl: Duration) -> Self {
        Self {
            api,
            role,
            cache: CachedBridge::new(NAME, ttl),
        }
    }

    pub fn cache(&self) -> &CachedBridge {
        &self.cache
    }

    pub async fn list(&self, filter: &ProductFilter) -> Result<Listing<Product>, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        let query = filter.clone();
        self.cache
            .cached("products:list", filter, move || async move {
                api.get_with_query("/api/products", &query).await
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Product, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("products:get", &id, move || async move {
                api.get(&format!("/api/products/{}", id)).await
            })
            .await
    }

    pub async fn categories(&self) -> Result<Vec<String>, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("products:categories", &(), move || async move {
                api.get("/api/products/categories").await
            })
            .await
    }

    pub async fn create(&self, input: &CreateProduct) -> Result<Product, StandardError> {
        permit(self.role, Permission::WriteProducts, NAME)?;
        let product = self.api.post("/api/products", input).await?;
        self.cache.invalidate(Some("products:"));
        Ok(product)
    }

    pub async fn update(&self, id: Uuid, input: &UpdateProduct) -> Result<Product, StandardError> {
        permit(self.role, Permission::WriteProducts, NAME)?;
        let product = self
            .api
            .patch(&format!("/api/products/{}", id), input)
            .await?;
        self.cache.invalidate(Some("products:"));
        Ok(product)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StandardError> {
        permit(self.role, Permission::DeleteRecords, NAME)?;
        self.api.delete(&format!("/api/products/{}", id)).await?;
        self.cache.invalidate(Some("products:"));
        Ok(())
    }
}
