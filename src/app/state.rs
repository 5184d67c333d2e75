//! Application state shared across routes

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, StoreBackend};
use crate::dashboard::StoreSections;
use crate::services::{
    ActivityService, CustomerService, EntitlementService, NotificationService, ProductService,
    ProposalService, UserService,
};
use crate::store::{Db, MemoryStore, PostgrestClient};
use crate::util::rate_limit::{create_tenant_limiter, TenantLimiter};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Db,
    pub users: UserService,
    pub customers: CustomerService,
    pub products: ProductService,
    pub proposals: ProposalService,
    pub entitlements: EntitlementService,
    pub notifications: NotificationService,
    pub activity: ActivityService,
    pub dashboard: StoreSections,
    pub limiter: Arc<TenantLimiter>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let db = match config.store_backend {
            StoreBackend::Postgrest => {
                info!(url = %config.database_rest_url, "Using PostgREST store");
                Db::new(PostgrestClient::new(&config))
            }
            StoreBackend::Memory => {
                info!("Using in-memory store");
                Db::new(MemoryStore::with_schema())
            }
        };
        Self::with_db(config, db)
    }

    /// Wire every service over an existing store
    pub fn with_db(config: Config, db: Db) -> Self {
        let config = Arc::new(config);

        let activity = ActivityService::new(db.clone());
        let notifications = NotificationService::new(db.clone());
        let entitlements = EntitlementService::new(db.clone());
        let users = UserService::new(db.clone(), activity.clone());
        let customers = CustomerService::new(db.clone(), activity.clone());
        let products = ProductService::new(db.clone(), activity.clone());
        let proposals = ProposalService::new(
            db.clone(),
            customers.clone(),
            products.clone(),
            activity.clone(),
            notifications.clone(),
        );

        let dashboard = StoreSections::new(
            proposals.clone(),
            users.clone(),
            activity.clone(),
            notifications.clone(),
            entitlements.clone(),
        );

        let limiter = create_tenant_limiter(config.api_rate_limit);

        Self {
            config,
            db,
            users,
            customers,
            products,
            proposals,
            entitlements,
            notifications,
            activity,
            dashboard,
            limiter,
        }
    }
}
