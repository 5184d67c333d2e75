//! Server-side section computation over the entity services

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::{Section, SectionSource};
use crate::auth::RequestContext;
use crate::error::StandardError;
use crate::services::proposals::{Proposal, ProposalStatus};
use crate::services::users::UserFilter;
use crate::services::{
    ActivityService, EntitlementService, NotificationService, Page, ProposalService, UserService,
};

const RECENT_LIMIT: usize = 10;
const DEADLINE_WINDOW_DAYS: i64 = 14;

/// Sections backed directly by the table store
#[derive(Clone)]
pub struct StoreSections {
    proposals: ProposalService,
    users: UserService,
    activity: ActivityService,
    notifications: NotificationService,
    entitlements: EntitlementService,
}

impl StoreSections {
    pub fn new(
        proposals: ProposalService,
        users: UserService,
        activity: ActivityService,
        notifications: NotificationService,
        entitlements: EntitlementService,
    ) -> Self {
        Self {
            proposals,
            users,
            activity,
            notifications,
            entitlements,
        }
    }

    async fn team(&self, ctx: &RequestContext) -> Result<Value, StandardError> {
        let mut users = Vec::new();
        loop {
            let filter = UserFilter {
                active: Some(true),
                limit: Some(Page::MAX_LIMIT),
                offset: Some(users.len()),
                ..Default::default()
            };
            let page = self.users.list(ctx, &filter).await?;
            let fetched = page.items.len();
            users.extend(page.items);
            if fetched == 0 || users.len() as u64 >= page.total {
                break;
            }
        }
        let proposals = self.proposals.all(ctx, |q| q).await?;

        let members: Vec<Value> = users
            .iter()
            .map(|user| {
                let owned = proposals.iter().filter(|p| p.owner_id == user.id);
                let (mut open, mut won_value) = (0usize, 0.0f64);
                for p in owned {
                    match p.status {
                        ProposalStatus::Won => won_value += p.total_value,
                        s if !s.is_closed() => open += 1,
                        _ => {}
                    }
                }
                json!({
                    "user_id": user.id,
                    "name": user.name,
                    "role": user.role,
                    "open_proposals": open,
                    "won_value": won_value,
                })
            })
            .collect();

        Ok(json!({ "total": members.len(), "members": members }))
    }

    async fn notifications(&self, ctx: &RequestContext) -> Result<Value, StandardError> {
        let unread_count = self.notifications.unread_count(ctx).await?;
        let items = self.notifications.unread(ctx, RECENT_LIMIT).await?;
        Ok(json!({ "unread_count": unread_count, "items": items }))
    }
}

#[async_trait]
impl SectionSource for StoreSections {
    async fn fetch_section(
        &self,
        ctx: &RequestContext,
        section: Section,
    ) -> Result<Value, StandardError> {
        match section {
            Section::Proposals => {
                let proposals = self.proposals.all(ctx, |q| q).await?;
                Ok(proposal_summary(&proposals))
            }
            Section::Activities => {
                let items = self.activity.recent(ctx, RECENT_LIMIT).await?;
                Ok(json!({ "items": items }))
            }
            Section::Team => self.team(ctx).await,
            Section::Deadlines => {
                let proposals = self.proposals.all(ctx, |q| q.not_null("due_date")).await?;
                Ok(deadlines(&proposals, Utc::now()))
            }
            Section::Performance => {
                self.entitlements
                    .require(ctx.tenant_id, "advanced_analytics")
                    .await?;
                let proposals = self.proposals.all(ctx, |q| q).await?;
                Ok(performance(&proposals))
            }
            Section::Notifications => self.notifications(ctx).await,
        }
    }
}

/// Counts per status, open pipeline value and the latest proposals
pub fn proposal_summary(proposals: &[Proposal]) -> Value {
    let mut counts: BTreeMap<&'static str, usize> = ProposalStatus::ALL
        .iter()
        .map(|s| (s.as_str(), 0))
        .collect();
    for p in proposals {
        *counts.entry(p.status.as_str()).or_default() += 1;
    }

    let pipeline_value: f64 = proposals
        .iter()
        .filter(|p| in_pipeline(p.status))
        .map(|p| p.total_value)
        .sum();

    let mut recent: Vec<&Proposal> = proposals.iter().collect();
    recent.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    recent.truncate(5);

    json!({
        "total": proposals.len(),
        "counts": counts,
        "pipeline_value": pipeline_value,
        "recent": recent,
    })
}

/// Open proposals due within the window, plus the overdue ones
pub fn deadlines(proposals: &[Proposal], now: DateTime<Utc>) -> Value {
    let horizon = now + Duration::days(DEADLINE_WINDOW_DAYS);
    let mut upcoming: Vec<&Proposal> = Vec::new();
    let mut overdue: Vec<&Proposal> = Vec::new();

    for p in proposals.iter().filter(|p| in_pipeline(p.status)) {
        match p.due_date {
            Some(due) if due < now => overdue.push(p),
            Some(due) if due <= horizon => upcoming.push(p),
            _ => {}
        }
    }
    upcoming.sort_by_key(|p| p.due_date);
    overdue.sort_by_key(|p| p.due_date);

    json!({
        "window_days": DEADLINE_WINDOW_DAYS,
        "upcoming": upcoming.iter().map(|p| deadline_entry(p)).collect::<Vec<_>>(),
        "overdue": overdue.iter().map(|p| deadline_entry(p)).collect::<Vec<_>>(),
    })
}

fn deadline_entry(p: &Proposal) -> Value {
    json!({
        "proposal_id": p.id,
        "title": p.title,
        "status": p.status,
        "owner_id": p.owner_id,
        "due_date": p.due_date,
    })
}

/// Win rate and deal size over closed proposals
pub fn performance(proposals: &[Proposal]) -> Value {
    let won: Vec<&Proposal> = proposals
        .iter()
        .filter(|p| p.status == ProposalStatus::Won)
        .collect();
    let lost = proposals
        .iter()
        .filter(|p| p.status == ProposalStatus::Lost)
        .count();
    let won_value: f64 = won.iter().map(|p| p.total_value).sum();

    let closed = won.len() + lost;
    let win_rate = if closed == 0 {
        0.0
    } else {
        won.len() as f64 / closed as f64
    };
    let average_deal_size = if won.is_empty() {
        0.0
    } else {
        won_value / won.len() as f64
    };

    let mut by_owner: BTreeMap<Uuid, f64> = BTreeMap::new();
    for p in &won {
        *by_owner.entry(p.owner_id).or_default() += p.total_value;
    }

    json!({
        "won": won.len(),
        "lost": lost,
        "open": proposals.len() - closed,
        "win_rate": win_rate,
        "won_value": won_value,
        "average_deal_size": average_deal_size,
        "won_value_by_owner": by_owner,
    })
}

/// Still being worked: not won, lost or rejected
fn in_pipeline(status: ProposalStatus) -> bool {
    !status.is_closed() && status != ProposalStatus::Rejected
}
