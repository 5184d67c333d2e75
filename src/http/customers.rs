//! Customer and contact endpoints

use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::app::AppState;
use crate::auth::RequestContext;
use crate::error::StandardError;
use crate::services::customers::{
    CreateContact, CreateCustomer, Customer, CustomerContact, CustomerFilter, UpdateCustomer,
};
use crate::services::Listing;

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<CustomerFilter>,
) -> Result<Json<Listing<Customer>>, StandardError> {
    Ok(Json(state.customers.list(&ctx, &filter).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(input): Json<CreateCustomer>,
) -> Result<(StatusCode, Json<Customer>), StandardError> {
    let customer = state.customers.create(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Customer>, StandardError> {
    Ok(Json(state.customers.get(&ctx, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateCustomer>,
) -> Result<Json<Customer>, StandardError> {
    Ok(Json(state.customers.update(&ctx, id, input).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StandardError> {
    state.customers.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn contacts(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CustomerContact>>, StandardError> {
    Ok(Json(state.customers.contacts(&ctx, id).await?))
}

pub async fn add_contact(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<CreateContact>,
) -> Result<(StatusCode, Json<CustomerContact>), StandardError> {
    let contact = state.customers.add_contact(&ctx, id, input).await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

pub async fn set_primary_contact(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, contact_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CustomerContact>, StandardError> {
    Ok(Json(
        state.customers.set_primary_contact(&ctx, id, contact_id).await?,
    ))
}

pub async fn remove_contact(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((id, contact_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StandardError> {
    state.customers.remove_contact(&ctx, id, contact_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
