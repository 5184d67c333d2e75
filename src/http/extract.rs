//! Extractors whose rejections use the JSON error envelope

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::StandardError;

/// JSON body in, JSON body out
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(StandardError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(StandardError))]
pub struct Path<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(StandardError))]
pub struct Query<T>(pub T);

fn rejected(what: &str, detail: String, status: u16) -> StandardError {
    StandardError::validation(format!("Invalid {}: {}", what, detail))
        .component("Http")
        .with("status", status)
}

impl From<JsonRejection> for StandardError {
    fn from(rejection: JsonRejection) -> Self {
        rejected("request body", rejection.body_text(), rejection.status().as_u16())
    }
}

impl From<PathRejection> for StandardError {
    fn from(rejection: PathRejection) -> Self {
        rejected("path parameter", rejection.body_text(), rejection.status().as_u16())
    }
}

impl From<QueryRejection> for StandardError {
    fn from(rejection: QueryRejection) -> Self {
        rejected("query string", rejection.body_text(), rejection.status().as_u16())
    }
}
