use std::time::Duration;

use uuid::Uuid;

use super::{permit, ApiClient, CachedBridge, DEFAULT_TTL};
use crate::auth::{Permission, UserRole};
use crate::error::StandardError;
use crate::services::customers::{
    CreateContact, CreateCustomer, Customer, CustomerContact, CustomerFilter, UpdateCustomer,
};
use crate::services::Listing;

const NAME: &str = "CustomerBridge";

#[derive(Clone)]
pub struct CustomerBridge {
    api: ApiClient,
    role: UserRole,
    cache: CachedBridge,
}

impl CustomerBridge {
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

    pub async fn list(&self, filter: &CustomerFilter) -> Result<Listing<Customer>, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        let query = filter.clone();
        self.cache
            .cached("customers:list", filter, move || async move {
                api.get_with_query("/api/customers", &query).await
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Customer, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("customers:get", &id, move || async move {
                api.get(&format!("/api/customers/{}", id)).await
            })
            .await
    }

    pub async fn create(&self, input: &CreateCustomer) -> Result<Customer, StandardError> {
        permit(self.role, Permission::WriteCustomers, NAME)?;
        let created = self.api.post("/api/customers", input).await?;
        self.cache.invalidate(Some("customers:"));
        Ok(created)
    }

    pub async fn update(&self, id: Uuid, input: &UpdateCustomer) -> Result<Customer, StandardError> {
        permit(self.role, Permission::WriteCustomers, NAME)?;
        let updated = self
            .api
            .patch(&format!("/api/customers/{}", id), input)
            .await?;
        self.cache.invalidate(Some("customers:"));
        Ok(updated)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StandardError> {
        permit(self.role, Permission::DeleteRecords, NAME)?;
        self.api.delete(&format!("/api/customers/{}", id)).await?;
        self.cache.invalidate(Some("customers:"));
        Ok(())
    }

    pub async fn contacts(&self, customer_id: Uuid) -> Result<Vec<CustomerContact>, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("customers:contacts", &customer_id, move || async move {
                api.get(&format!("/api/customers/{}/contacts", customer_id))
                    .await
            })
            .await
    }

    pub async fn add_contact(
        &self,
        customer_id: Uuid,
        input: &CreateContact,
    ) -> Result<CustomerContact, StandardError> {
        permit(self.role, Permission::WriteCustomers, NAME)?;
        let contact = self
            .api
            .post(&format!("/api/customers/{}/contacts", customer_id), input)
            .await?;
        self.cache.invalidate(Some("customers:contacts"));
        Ok(contact)
    }

    pub async fn set_primary_contact(
        &self,
        customer_id: Uuid,
        contact_id: Uuid,
    ) -> Result<CustomerContact, StandardError> {
        permit(self.role, Permission::WriteCustomers, NAME)?;
        let path = format!("/api/customers/{}/contacts/{}/primary", customer_id, contact_id);
        let contact = self.api.post(&path, &()).await?;
        self.cache.invalidate(Some("customers:contacts"));
        Ok(contact)
    }

    pub async fn remove_contact(&self, customer_id: Uuid, contact_id: Uuid) -> Result<(), StandardError> {
        permit(self.role, Permission::WriteCustomers, NAME)?;
        self.api
            .delete(&format!("/api/customers/{}/contacts/{}", customer_id, contact_id))
            .await?;
        self.cache.invalidate(Some("customers:contacts"));
        Ok(())
    }
}
