//! Entitlements, notifications and the dashboard

use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::app::AppState;
use crate::auth::{Permission, RequestContext};
use crate::dashboard::{aggregate, DashboardData, Section, SectionSource};
use crate::error::StandardError;
use crate::services::entitlements::{Entitlement, SetEntitlement};

pub async fn entitlements(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<Entitlement>>, StandardError> {
    ctx.require(Permission::ReadRecords)?;
    Ok(Json(state.entitlements.list(ctx.tenant_id).await?))
}

pub async fn set_entitlement(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(feature): Path<String>,
    Json(input): Json<SetEntitlement>,
) -> Result<Json<Entitlement>, StandardError> {
    Ok(Json(state.entitlements.set(&ctx, &feature, input).await?))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StandardError> {
    state.notifications.mark_read(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct DashboardQuery {
    sections: Option<String>,
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<DashboardQuery>,
) -> Result<Json<DashboardData>, StandardError> {
    ctx.require(Permission::ReadRecords)?;
    let sections = Section::parse_list(query.sections.as_deref())?;
    Ok(Json(aggregate(&state.dashboard, &ctx, &sections).await))
}

pub async fn dashboard_section(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(section): Path<String>,
) -> Result<Json<Value>, StandardError> {
    ctx.require(Permission::ReadRecords)?;
    let section: Section = section.parse()?;
    Ok(Json(state.dashboard.fetch_section(&ctx, section).await?))
}
