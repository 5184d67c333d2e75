use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use super::{permit, ApiClient, CachedBridge, DEFAULT_TTL};
use crate::auth::{Permission, UserRole};
use crate::error::StandardError;
use crate::services::proposals::{
    CreateProposal, Proposal, ProposalDetail, ProposalFilter, ProposalStatus, ProposalVersion,
    UpdateProposal,
};
use crate::services::Listing;
use crate::wizard::{WizardDraft, WizardValidation};

const NAME: &str = "ProposalBridge";

#[derive(Serialize)]
struct StatusChange {
    status: ProposalStatus,
}

#[derive(Clone)]
pub struct ProposalBridge {
    api: ApiClient,
    role: UserRole,
    cache: CachedBridge,
}

impl ProposalBridge {
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

    pub async fn list(&self, filter: &ProposalFilter) -> Result<Listing<Proposal>, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        let query = filter.clone();
        self.cache
            .cached("proposals:list", filter, move || async move {
                api.get_with_query("/api/proposals", &query).await
            })
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<ProposalDetail, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("proposals:get", &id, move || async move {
                api.get(&format!("/api/proposals/{}", id)).await
            })
            .await
    }

    pub async fn versions(&self, id: Uuid) -> Result<Vec<ProposalVersion>, StandardError> {
        permit(self.role, Permission::ReadRecords, NAME)?;
        let api = self.api.clone();
        self.cache
            .cached("proposals:versions", &id, move || async move {
                api.get(&format!("/api/proposals/{}/versions", id)).await
            })
            .await
    }

    pub async fn create(&self, input: &CreateProposal) -> Result<ProposalDetail, StandardError> {
        permit(self.role, Permission::WriteProposals, NAME)?;
        let detail = self.api.post("/api/proposals", input).await?;
        self.cache.invalidate(Some("proposals:"));
        Ok(detail)
    }

    pub async fn update(&self, id: Uuid, input: &UpdateProposal) -> Result<ProposalDetail, StandardError> {
        permit(self.role, Permission::WriteProposals, NAME)?;
        let detail = self
            .api
            .patch(&format!("/api/proposals/{}", id), input)
            .await?;
        self.cache.invalidate(Some("proposals:"));
        Ok(detail)
    }

    pub async fn update_status(&self, id: Uuid, status: ProposalStatus) -> Result<Proposal, StandardError> {
        let permission = match status {
            ProposalStatus::Approved | ProposalStatus::Rejected => Permission::ApproveProposals,
            _ => Permission::WriteProposals,
        };
        permit(self.role, permission, NAME)?;

        let proposal = self
            .api
            .post(&format!("/api/proposals/{}/status", id), &StatusChange { status })
            .await?;
        self.cache.invalidate(Some("proposals:"));
        Ok(proposal)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), StandardError> {
        permit(self.role, Permission::DeleteRecords, NAME)?;
        self.api.delete(&format!("/api/proposals/{}", id)).await?;
        self.cache.invalidate(Some("proposals:"));
        Ok(())
    }

    /// Server-side check of a wizard draft; never cached
    pub async fn validate_draft(&self, draft: &WizardDraft) -> Result<WizardValidation, StandardError> {
        permit(self.role, Permission::WriteProposals, NAME)?;
        self.api.post("/api/proposals/wizard/validate", draft).await
    }
}
