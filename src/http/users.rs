//! User endpoints

use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::app::AppState;
use crate::auth::{Permission, RequestContext};
use crate::error::StandardError;
use crate::services::users::{CreateUser, UpdateUser, User, UserFilter};
use crate::services::Listing;

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Listing<User>>, StandardError> {
    Ok(Json(state.users.list(&ctx, &filter).await?))
}

/// Seats are metered by the `team_members` entitlement
pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<User>), StandardError> {
    ctx.require(Permission::ManageUsers)?;
    let active = UserFilter {
        active: Some(true),
        limit: Some(1),
        ..Default::default()
    };
    let seats = state.users.list(&ctx, &active).await?.total;
    state
        .entitlements
        .check_usage(ctx.tenant_id, "team_members", seats)
        .await?;

    let user = state.users.create(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<User>, StandardError> {
    Ok(Json(state.users.get(&ctx, ctx.user_id).await?))
}

/// Record a sign-in and return the caller's profile
pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<User>, StandardError> {
    state.users.record_login(&ctx).await?;
    Ok(Json(state.users.get(&ctx, ctx.user_id).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, StandardError> {
    Ok(Json(state.users.get(&ctx, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateUser>,
) -> Result<Json<User>, StandardError> {
    Ok(Json(state.users.update(&ctx, id, input).await?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, StandardError> {
    Ok(Json(state.users.deactivate(&ctx, id).await?))
}
