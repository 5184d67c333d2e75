//! JSON client for the proposal API

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ErrorCode, StandardError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_ATTEMPTS: u32 = 3;
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
struct ErrorBody {
    error: StandardError,
}

/// Bearer-authenticated API client.
/// Reads are retried on transient failures; writes are sent once.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    retry_delay: Duration,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StandardError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StandardError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            retry_delay: RETRY_DELAY,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StandardError> {
        self.get_with_query(path, &()).await
    }

    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, StandardError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut attempt = 1;
        loop {
            let result = match self.request(Method::GET, path).query(query).send().await {
                Ok(response) => decode(response).await,
                Err(e) => Err(transport_error(e)),
            };

            match result {
                Err(err) if err.code.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(path, attempt, error = %err, "Request failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
                other => return other.map_err(|e| e.operation("GET").with("path", path)),
            }
        }
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, StandardError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::POST, path, body).await
    }

    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, StandardError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PATCH, path, body).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, StandardError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(Method::PUT, path, body).await
    }

    /// DELETE; the response body is ignored
    pub async fn delete(&self, path: &str) -> Result<(), StandardError> {
        let response = self
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(transport_error)?;
        check(response)
            .await
            .map(|_| ())
            .map_err(|e| e.operation("DELETE").with("path", path))
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, StandardError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(method = %method, path, "API request");
        let operation = method.to_string();
        let response = self
            .request(method, path)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response)
            .await
            .map_err(|e| e.operation(&operation).with("path", path))
    }
}

fn transport_error(err: reqwest::Error) -> StandardError {
    if err.is_timeout() {
        StandardError::new(ErrorCode::Timeout, "Request timed out")
    } else {
        StandardError::new(ErrorCode::RequestFailed, format!("Request failed: {}", err))
    }
}

/// Map an error status to a code when the body carries none
fn status_code(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        StatusCode::FORBIDDEN => ErrorCode::Forbidden,
        StatusCode::NOT_FOUND => ErrorCode::NotFound,
        StatusCode::CONFLICT => ErrorCode::Conflict,
        StatusCode::UNPROCESSABLE_ENTITY | StatusCode::BAD_REQUEST => ErrorCode::ValidationFailed,
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => ErrorCode::Timeout,
        _ => ErrorCode::RequestFailed,
    }
}

fn error_from_body(status: StatusCode, body: &str) -> StandardError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => {
            let message = if body.trim().is_empty() {
                format!("Request failed with status {}", status.as_u16())
            } else {
                body.trim().to_string()
            };
            StandardError::new(status_code(status), message)
        }
    }
}

async fn check(response: Response) -> Result<Response, StandardError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body).with("status", status.as_u16()))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StandardError> {
    let response = check(response).await?;
    response.json::<T>().await.map_err(|e| {
        StandardError::new(
            ErrorCode::RequestFailed,
            format!("Failed to decode response: {}", e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_is_parsed_into_standard_error() {
        let body = r#"{"error":{"code":"DATA.CONFLICT","message":"A customer with this email already exists","metadata":{}}}"#;
        let err = error_from_body(StatusCode::CONFLICT, body);
        assert_eq!(err.code, ErrorCode::Conflict);
        assert_eq!(err.message, "A customer with this email already exists");
    }

    #[test]
    fn foreign_bodies_fall_back_to_status() {
        let err = error_from_body(StatusCode::BAD_GATEWAY, "<html>upstream</html>");
        assert_eq!(err.code, ErrorCode::RequestFailed);
        assert!(err.code.is_transient());

        let err = error_from_body(StatusCode::FORBIDDEN, "");
        assert_eq!(err.code, ErrorCode::Forbidden);
        assert_eq!(err.message, "Request failed with status 403");
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
