//! Error taxonomy shared by services, bridges and the HTTP layer

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{ConstraintKind, StoreError};

/// Taxonomy code carried by every [`StandardError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "DATA.CREATE_FAILED")]
    CreateFailed,
    #[serde(rename = "DATA.UPDATE_FAILED")]
    UpdateFailed,
    #[serde(rename = "DATA.DELETE_FAILED")]
    DeleteFailed,
    #[serde(rename = "DATA.FETCH_FAILED")]
    FetchFailed,
    #[serde(rename = "DATA.NOT_FOUND")]
    NotFound,
    #[serde(rename = "DATA.CONFLICT")]
    Conflict,
    #[serde(rename = "DATA.INTEGRITY")]
    Integrity,
    #[serde(rename = "VALIDATION.FAILED")]
    ValidationFailed,
    #[serde(rename = "AUTH.UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "AUTH.FORBIDDEN")]
    Forbidden,
    #[serde(rename = "API.REQUEST_FAILED")]
    RequestFailed,
    #[serde(rename = "API.TIMEOUT")]
    Timeout,
    #[serde(rename = "SYNC.FAILED")]
    SyncFailed,
    #[serde(rename = "SYSTEM.INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CreateFailed => "DATA.CREATE_FAILED",
            ErrorCode::UpdateFailed => "DATA.UPDATE_FAILED",
            ErrorCode::DeleteFailed => "DATA.DELETE_FAILED",
            ErrorCode::FetchFailed => "DATA.FETCH_FAILED",
            ErrorCode::NotFound => "DATA.NOT_FOUND",
            ErrorCode::Conflict => "DATA.CONFLICT",
            ErrorCode::Integrity => "DATA.INTEGRITY",
            ErrorCode::ValidationFailed => "VALIDATION.FAILED",
            ErrorCode::Unauthorized => "AUTH.UNAUTHORIZED",
            ErrorCode::Forbidden => "AUTH.FORBIDDEN",
            ErrorCode::RequestFailed => "API.REQUEST_FAILED",
            ErrorCode::Timeout => "API.TIMEOUT",
            ErrorCode::SyncFailed => "SYNC.FAILED",
            ErrorCode::Internal => "SYSTEM.INTERNAL",
        }
    }

    /// HTTP status the API answers with for this code
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict | ErrorCode::Integrity => 409,
            ErrorCode::ValidationFailed => 422,
            ErrorCode::Unauthorized => 401,
            ErrorCode::Forbidden => 403,
            ErrorCode::Timeout => 504,
            ErrorCode::RequestFailed => 502,
            _ => 500,
        }
    }

    /// Whether a caller may reasonably try the same request again
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorCode::Timeout | ErrorCode::RequestFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error happened and which records it concerns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub identifiers: BTreeMap<String, String>,
}

/// Error surfaced by every service boundary
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct StandardError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub metadata: ErrorMetadata,
}

impl StandardError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: ErrorMetadata::default(),
        }
    }

    pub fn not_found(entity: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("{} {} not found", entity, id))
            .with("id", id)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn component(mut self, component: &str) -> Self {
        self.metadata.component = Some(component.to_string());
        self
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    /// Attach an identifier (tenant, record id, email, ...)
    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.metadata
            .identifiers
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn in_context(self, ctx: &ErrorContext) -> Self {
        let mut err = self.component(ctx.component).operation(ctx.operation);
        for (key, value) in &ctx.identifiers {
            err.metadata
                .identifiers
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        err
    }
}

/// Call-site description used when re-wrapping lower-level failures
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub component: &'static str,
    pub operation: &'static str,
    /// Human name of the entity, used in conflict/integrity messages
    pub entity: &'static str,
    pub identifiers: Vec<(String, String)>,
}

impl ErrorContext {
    pub fn new(component: &'static str, operation: &'static str, entity: &'static str) -> Self {
        Self {
            component,
            operation,
            entity,
            identifiers: Vec::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.identifiers.push((key.to_string(), value.to_string()));
        self
    }

    /// Translate a store failure into the taxonomy.
    ///
    /// `fallback` is used for anything that is not a recognised constraint
    /// violation (e.g. `DATA.CREATE_FAILED` for inserts).
    pub fn store_error(&self, err: StoreError, fallback: ErrorCode) -> StandardError {
        let translated = match &err {
            StoreError::Constraint {
                kind: ConstraintKind::Unique,
                constraint,
                ..
            } => {
                let field = constraint
                    .as_deref()
                    .and_then(conflicting_field)
                    .unwrap_or("value");
                StandardError::new(
                    ErrorCode::Conflict,
                    format!("A {} with this {} already exists", self.entity, field),
                )
            }
            StoreError::Constraint {
                kind: ConstraintKind::ForeignKey,
                ..
            } => {
                let message = if fallback == ErrorCode::DeleteFailed {
                    format!("{} is still referenced by other records", self.entity)
                } else {
                    format!("{} references a record that does not exist", self.entity)
                };
                StandardError::new(ErrorCode::Integrity, message)
            }
            StoreError::Constraint {
                kind: ConstraintKind::NotNull,
                detail,
                ..
            } => StandardError::validation(format!("Missing required field: {}", detail)),
            StoreError::Constraint {
                kind: ConstraintKind::Check,
                detail,
                ..
            } => StandardError::validation(format!("Invalid {}: {}", self.entity, detail)),
            StoreError::NotFound => StandardError::new(
                ErrorCode::NotFound,
                format!("{} not found", self.entity),
            ),
            other => StandardError::new(
                fallback,
                format!("Failed to {} {}: {}", self.operation, self.entity, other),
            ),
        };

        translated.in_context(self)
    }
}

/// Guess the column from a constraint name such as `customers_tenant_id_email_key`
fn conflicting_field(constraint: &str) -> Option<&str> {
    let trimmed = constraint
        .strip_suffix("_key")
        .or_else(|| constraint.strip_suffix("_unique"))?;
    trimmed.rsplit('_').next().filter(|s| !s.is_empty())
}
