//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method},
    middleware,
    response::Json,
    routing::{get, post, put},
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};

use super::{customers, products, proposals, tenant, users};
use crate::app::AppState;
use crate::config::Environment;
use crate::http::middleware::require_auth;
use crate::util::rate_limit::limit_per_tenant;
use crate::util::time::uptime_secs;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true);

    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(health_handler));

    // Protected routes: auth runs first, then the per-tenant limiter
    let protected_routes = Router::new()
        .route("/api/customers", get(customers::list).post(customers::create))
        .route(
            "/api/customers/:id",
            get(customers::get)
                .patch(customers::update)
                .delete(customers::delete),
        )
        .route(
            "/api/customers/:id/contacts",
            get(customers::contacts).post(customers::add_contact),
        )
        .route(
            "/api/customers/:id/contacts/:contact_id",
            axum::routing::delete(customers::remove_contact),
        )
        .route(
            "/api/customers/:id/contacts/:contact_id/primary",
            post(customers::set_primary_contact),
        )
        .route("/api/products", get(products::list).post(products::create))
        .route("/api/products/categories", get(products::categories))
        .route(
            "/api/products/:id",
            get(products::get)
                .patch(products::update)
                .delete(products::delete),
        )
        .route("/api/proposals", get(proposals::list).post(proposals::create))
        .route("/api/proposals/wizard/validate", post(proposals::validate_wizard))
        .route(
            "/api/proposals/:id",
            get(proposals::get)
                .patch(proposals::update)
                .delete(proposals::delete),
        )
        .route("/api/proposals/:id/status", post(proposals::update_status))
        .route("/api/proposals/:id/versions", get(proposals::versions))
        .route("/api/users", get(users::list).post(users::create))
        .route("/api/users/me", get(users::me))
        .route("/api/users/me/login", post(users::login))
        .route(
            "/api/users/:id",
            get(users::get).patch(users::update).delete(users::deactivate),
        )
        .route("/api/entitlements", get(tenant::entitlements))
        .route("/api/entitlements/:feature", put(tenant::set_entitlement))
        .route("/api/dashboard", get(tenant::dashboard))
        .route("/api/dashboard/sections/:section", get(tenant::dashboard_section))
        .route(
            "/api/notifications/:id/read",
            post(tenant::mark_notification_read),
        )
        .layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            limit_per_tenant,
        ))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    environment: Environment,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        environment: state.config.environment,
    })
}
