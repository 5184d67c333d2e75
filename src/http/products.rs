//! Product catalog endpoints

use axum::{
    extract::{Extension, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::extract::{Json, Path, Query};
use crate::app::AppState;
use crate::auth::RequestContext;
use crate::error::StandardError;
use crate::services::products::{CreateProduct, Product, ProductFilter, UpdateProduct};
use crate::services::Listing;

pub async fn list(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<Listing<Product>>, StandardError> {
    Ok(Json(state.products.list(&ctx, &filter).await?))
}

pub async fn categories(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<Vec<String>>, StandardError> {
    Ok(Json(state.products.categories(&ctx).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(input): Json<CreateProduct>,
) -> Result<(StatusCode, Json<Product>), StandardError> {
    let product = state.products.create(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>, StandardError> {
    Ok(Json(state.products.get(&ctx, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateProduct>,
) -> Result<Json<Product>, StandardError> {
    Ok(Json(state.products.update(&ctx, id, input).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StandardError> {
    state.products.delete(&ctx, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
