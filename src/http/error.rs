//! JSON error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use tracing::error;

use crate::error::StandardError;

impl IntoResponse for StandardError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(
                code = %self.code,
                component = self.metadata.component.as_deref().unwrap_or("-"),
                operation = self.metadata.operation.as_deref().unwrap_or("-"),
                "{}",
                self.message
            );
        }

        (status, Json(json!({ "error": self }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn status_follows_the_code() {
        let response = StandardError::not_found("Customer", "c1").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = StandardError::new(ErrorCode::Conflict, "dup").into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
