//! Entity services: tenant-scoped CRUD over the table store

pub mod activity;
pub mod customers;
pub mod entitlements;
pub mod notifications;
pub mod products;
pub mod proposals;
pub mod users;

use serde::{Deserialize, Serialize};

pub use activity::ActivityService;
pub use customers::CustomerService;
pub use entitlements::EntitlementService;
pub use notifications::NotificationService;
pub use products::ProductService;
pub use proposals::ProposalService;
pub use users::UserService;

use crate::store::Query;

/// Paging shared by list endpoints
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 200;

    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self { limit, offset }
    }

    pub fn apply(&self, query: Query) -> Query {
        let limit = self
            .limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT);
        query.limit(limit).offset(self.offset.unwrap_or(0))
    }
}

/// A page of rows plus the total matching count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub total: u64,
}

fn non_blank(value: &str, field: &str) -> Result<(), crate::error::StandardError> {
    if value.trim().is_empty() {
        return Err(crate::error::StandardError::validation(format!(
            "{} is required",
            field
        )));
    }
    Ok(())
}

fn valid_email(email: &str) -> Result<(), crate::error::StandardError> {
    let email = email.trim();
    let ok = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'))
        .unwrap_or(false);
    if !ok {
        return Err(crate::error::StandardError::validation(format!(
            "Invalid email address: {}",
            email
        )));
    }
    Ok(())
}
