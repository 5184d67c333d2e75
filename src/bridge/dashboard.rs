use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{permit, ApiClient, CachedBridge};
use crate::auth::{Permission, RequestContext, UserRole};
use crate::dashboard::{aggregate, DashboardData, Section, SectionSource};
use crate::error::StandardError;

const NAME: &str = "DashboardBridge";

/// Dashboard numbers go stale quickly
pub const DASHBOARD_TTL: Duration = Duration::from_secs(60);

/// Client-side dashboard: each section is its own cached request so a
/// failing endpoint only blanks its own panel.
#[derive(Clone)]
pub struct DashboardBridge {
    api: ApiClient,
    role: UserRole,
    cache: CachedBridge,
}

impl DashboardBridge {
    pub fn new(api: ApiClient, role: UserRole) -> Self {
        Self::with_ttl(api, role, DASHBOARD_TTL)
    }

    pub fn with_ttl(api: ApiClient, role: UserRole, ttl: Duration) -> Self {
        Self {
            api,
            role,
            cache: CachedBridge::new(NAME, ttl),
        }
    }

    pub async fn section(&self, section: Section) -> Result<Value, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("dashboard:section", &section, move || async move {
                api.get(&format!("/api/dashboard/sections/{}", section))
                    .await
            })
            .await
    }

    /// Fan out one request per section and merge
    pub async fn load(&self, ctx: &RequestContext, sections: &[Section]) -> DashboardData {
        aggregate(self, ctx, sections).await
    }

    /// Everything in one server round trip
    pub async fn load_remote(&self, sections: &[Section]) -> Result<DashboardData, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let list = sections
            .iter()
            .map(Section::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let api = self.api.clone();
        let query = [("sections", list.clone())];
        self.cache
            .cached("dashboard:all", &list, move || async move {
                api.get_with_query("/api/dashboard", &query)
                    .await
            })
            .await
    }

    pub fn refresh(&self) -> usize {
        self.cache.invalidate(None)
    }
}

#[async_trait]
impl SectionSource for DashboardBridge {
    async fn fetch_section(
        &self,
        _ctx: &RequestContext,
        section: Section,
    ) -> Result<Value, StandardError> {
        self.section(section).await
    }
}
