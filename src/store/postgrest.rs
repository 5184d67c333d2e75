//! PostgREST gateway client using the service key

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;

use super::{ConstraintKind, Query, StoreError, TableStore};
use crate::config::Config;

/// Database gateway client for server-side operations.
/// The service key bypasses row-level security; every query must carry a tenant filter.
#[derive(Clone)]
pub struct PostgrestClient {
    client: Client,
    base_url: String,
    service_key: String,
}

impl PostgrestClient {
    pub fn new(config: &Config) -> Self {
        Self::with_credentials(&config.database_rest_url, &config.database_service_key)
    }

    pub fn with_credentials(base_url: &str, service_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        }
    }

    /// Get the REST API URL for a table
    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Attach the auth headers every request needs
    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status, body))
    }
}

#[async_trait]
impl TableStore for PostgrestClient {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let response = self
            .authed(self.client.get(self.rest_url(table)))
            .query(&query.to_params())
            .send()
            .await?;

        Self::check(response)
            .await?
            .json()
            .await
            .map_err(StoreError::Request)
    }

    async fn count(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        let response = self
            .authed(self.client.head(self.rest_url(table)))
            .header("Prefer", "count=exact")
            .query(&query.to_params())
            .send()
            .await?;

        let response = Self::check(response).await?;

        // Content-Range: 0-24/3573 (or */0 when empty)
        let total = response
            .headers()
            .get("Content-Range")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.rsplit('/').next())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Ok(total)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;

        // PostgREST returns an array, get first element
        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or(StoreError::NoRowReturned)
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let response = self
            .authed(self.client.patch(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&query.to_params())
            .json(&patch)
            .send()
            .await?;

        Ok(Self::check(response).await?.json().await?)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &[&str],
    ) -> Result<Value, StoreError> {
        let response = self
            .authed(self.client.post(self.rest_url(table)))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .query(&[("on_conflict", on_conflict.join(","))])
            .json(&row)
            .send()
            .await?;

        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or(StoreError::NoRowReturned)
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        let response = self
            .authed(self.client.delete(self.rest_url(table)))
            .header("Prefer", "return=representation")
            .query(&query.to_params())
            .send()
            .await?;

        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        Ok(rows.len() as u64)
    }
}

/// PostgREST error body
#[derive(Debug, Deserialize)]
struct GatewayError {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
}

/// Turn a failed response into a typed store error.
/// Postgres SQLSTATE codes are forwarded by the gateway in `code`.
fn classify_error(status: u16, body: String) -> StoreError {
    let parsed: Option<GatewayError> = serde_json::from_str(&body).ok();

    if let Some(err) = parsed {
        if let Some(kind) = err.code.as_deref().and_then(ConstraintKind::from_sqlstate) {
            let constraint = err.message.as_deref().and_then(quoted_name);
            return StoreError::Constraint {
                kind,
                constraint,
                detail: err.details.or(err.message).unwrap_or_default(),
            };
        }
        // PGRST116: singular response requested but zero rows matched
        if err.code.as_deref() == Some("PGRST116") {
            return StoreError::NotFound;
        }
    }

    StoreError::Api { status, body }
}

/// Extract `name` from `... constraint "name"`
fn quoted_name(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let end = start + message[start..].find('"')?;
    Some(message[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_is_classified() {
        let body = r#"{"code":"23505","details":"Key (tenant_id, email)=(t, a@b.c) already exists.","hint":null,"message":"duplicate key value violates unique constraint \"customers_tenant_id_email_key\""}"#;

        match classify_error(409, body.to_string()) {
            StoreError::Constraint {
                kind,
                constraint,
                detail,
            } => {
                assert_eq!(kind, ConstraintKind::Unique);
                assert_eq!(constraint.as_deref(), Some("customers_tenant_id_email_key"));
                assert!(detail.contains("already exists"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_errors_stay_api_errors() {
        match classify_error(500, "boom".to_string()) {
            StoreError::Api { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(
            classify_error(406, r#"{"code":"PGRST116","message":"x"}"#.to_string()),
            StoreError::NotFound
        ));
    }
}
