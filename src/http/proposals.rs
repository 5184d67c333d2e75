//! Proposal endpoints, including the wizard draft check

use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::app::AppState;
use crate::auth::{Permission, RequestContext};
use crate::error::StandardError;
use crate::services::proposals::{
    CreateProposal, Proposal, ProposalDetail, ProposalFilter, ProposalStatus, ProposalVersion,
    UpdateProposal,
};
use crate::services::Listing;
use crate::wizard::{WizardDraft, WizardValidation};

#[derive(Deserialize)]
pub struct StatusChange {
    status: ProposalStatus,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<ProposalFilter>,
) -> Result<Json<Listing<Proposal>>, StandardError> {
    Ok(Json(state.proposals.list(&ctx, &filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(input): Json<CreateProposal>,
) -> Result<(StatusCode, Json<ProposalDetail>), StandardError> {
    let detail = state.proposals.create(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProposalDetail>, StandardError> {
    Ok(Json(state.proposals.get_detail(&ctx, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateProposal>,
) -> Result<Json<ProposalDetail>, StandardError> {
    Ok(Json(state.proposals.update(&ctx, id, input).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StandardError> {
    state.proposals.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(change): Json<StatusChange>,
) -> Result<Json<Proposal>, StandardError> {
    Ok(Json(
        state.proposals.update_status(&ctx, id, change.status).await?,
    ))
}

pub async fn versions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ProposalVersion>>, StandardError> {
    state
        .entitlements
        .require(ctx.tenant_id, "proposal_versions")
        .await?;
    Ok(Json(state.proposals.versions(&ctx, id).await?))
}

pub async fn validate_wizard(
    Extension(ctx): Extension<RequestContext>,
    Json(draft): Json<WizardDraft>,
) -> Result<Json<WizardValidation>, StandardError> {
    ctx.require(Permission::WriteProposals)?;
    Ok(Json(WizardValidation::of(&draft)))
}
