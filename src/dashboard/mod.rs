//! Dashboard aggregation: independent section fetches merged into one view

pub mod sections;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::RequestContext;
use crate::error::StandardError;

pub use sections::StoreSections;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Proposals,
    Activities,
    Team,
    Deadlines,
    Performance,
    Notifications,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Proposals,
        Section::Activities,
        Section::Team,
        Section::Deadlines,
        Section::Performance,
        Section::Notifications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Proposals => "proposals",
            Section::Activities => "activities",
            Section::Team => "team",
            Section::Deadlines => "deadlines",
            Section::Performance => "performance",
            Section::Notifications => "notifications",
        }
    }

    /// Parse `proposals,team`; empty input means every section
    pub fn parse_list(raw: Option<&str>) -> Result<Vec<Section>, StandardError> {
        let raw = raw.map(str::trim).unwrap_or("");
        if raw.is_empty() {
            return Ok(Section::ALL.to_vec());
        }
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Section::from_str)
            .collect()
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = StandardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .iter()
            .copied()
            .find(|section| section.as_str() == s)
            .ok_or_else(|| StandardError::validation(format!("Unknown dashboard section: {}", s)))
    }
}

/// Anything that can produce one dashboard section
#[async_trait]
pub trait SectionSource: Send + Sync {
    async fn fetch_section(
        &self,
        ctx: &RequestContext,
        section: Section,
    ) -> Result<Value, StandardError>;
}

/// Result of one section fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SectionOutcome {
    Ok { data: Value },
    Error { error: StandardError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardData {
    pub sections: BTreeMap<Section, SectionOutcome>,
    pub generated_at: DateTime<Utc>,
}

impl DashboardData {
    pub fn data(&self, section: Section) -> Option<&Value> {
        match self.sections.get(&section) {
            Some(SectionOutcome::Ok { data }) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self, section: Section) -> Option<&StandardError> {
        match self.sections.get(&section) {
            Some(SectionOutcome::Error { error }) => Some(error),
            _ => None,
        }
    }

    /// True when every requested section loaded
    pub fn is_complete(&self) -> bool {
        self.sections
            .values()
            .all(|o| matches!(o, SectionOutcome::Ok { .. }))
    }
}

/// Fetch the requested sections concurrently. A failing section is
/// reported in place and never prevents the others from loading.
pub async fn aggregate<S>(source: &S, ctx: &RequestContext, sections: &[Section]) -> DashboardData
where
    S: SectionSource + ?Sized,
{
    let mut wanted: Vec<Section> = sections.to_vec();
    wanted.sort();
    wanted.dedup();

    let fetches = wanted.iter().map(|&section| async move {
        let outcome = match source.fetch_section(ctx, section).await {
            Ok(data) => SectionOutcome::Ok { data },
            Err(error) => {
                warn!(
                    tenant_id = %ctx.tenant_id,
                    section = %section,
                    error = %error,
                    "Dashboard section failed"
                );
                SectionOutcome::Error { error }
            }
        };
        (section, outcome)
    });

    let sections: BTreeMap<Section, SectionOutcome> = join_all(fetches).await.into_iter().collect();
    debug!(tenant_id = %ctx.tenant_id, sections = sections.len(), "Dashboard aggregated");

    DashboardData {
        sections,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::UserRole;
    use crate::error::ErrorCode;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    /// Team fails, deadlines is slow, everything else answers at once
    struct FlakySource;

    #[async_trait]
    impl SectionSource for FlakySource {
        async fn fetch_section(
            &self,
            _ctx: &RequestContext,
            section: Section,
        ) -> Result<Value, StandardError> {
            match section {
                Section::Team => Err(StandardError::new(ErrorCode::FetchFailed, "team down")),
                Section::Deadlines => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok(json!({"upcoming": []}))
                }
                other => Ok(json!({"section": other.as_str()})),
            }
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(Uuid::new_v4(), Uuid::new_v4(), UserRole::Sales)
    }

    #[tokio::test]
    async fn failing_section_does_not_block_the_rest() {
        let data = aggregate(&FlakySource, &ctx(), &Section::ALL).await;

        assert_eq!(data.sections.len(), Section::ALL.len());
        assert!(!data.is_complete());
        assert_eq!(data.error(Section::Team).unwrap().code, ErrorCode::FetchFailed);
        assert_eq!(data.data(Section::Deadlines).unwrap(), &json!({"upcoming": []}));
        assert_eq!(
            data.data(Section::Proposals).unwrap(),
            &json!({"section": "proposals"})
        );
    }

    #[tokio::test]
    async fn only_requested_sections_are_fetched() {
        let data = aggregate(
            &FlakySource,
            &ctx(),
            &[Section::Notifications, Section::Proposals, Section::Proposals],
        )
        .await;
        assert_eq!(data.sections.len(), 2);
        assert!(data.is_complete());
    }

    #[test]
    fn parses_section_lists() {
        assert_eq!(Section::parse_list(None).unwrap().len(), 6);
        assert_eq!(
            Section::parse_list(Some("team, deadlines")).unwrap(),
            vec![Section::Team, Section::Deadlines]
        );
        assert_eq!(
            Section::parse_list(Some("team,bogus")).unwrap_err().code,
            ErrorCode::ValidationFailed
        );
    }

    #[test]
    fn outcome_wire_format() {
        let ok = serde_json::to_value(SectionOutcome::Ok { data: json!(1) }).unwrap();
        assert_eq!(ok, json!({"status": "ok", "data": 1}));
    }
}
