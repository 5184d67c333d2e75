//! Table storage: the database gateway client and an in-process store

pub mod memory;
pub mod postgrest;
pub mod query;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

pub use memory::MemoryStore;
pub use postgrest::PostgrestClient;
pub use query::Query;

/// Row-level operations on named tables. Rows travel as JSON objects.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError>;

    async fn count(&self, table: &str, query: &Query) -> Result<u64, StoreError>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError>;

    /// Merge `patch` into every matching row and return the updated rows
    async fn update(&self, table: &str, query: &Query, patch: Value)
        -> Result<Vec<Value>, StoreError>;

    /// Insert, or merge into the row that collides on `on_conflict`
    async fn upsert(&self, table: &str, row: Value, on_conflict: &[&str])
        -> Result<Value, StoreError>;

    /// Delete matching rows, returning how many went away
    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError>;
}

/// Cloneable typed facade over a [`TableStore`]
#[derive(Clone)]
pub struct Db {
    inner: Arc<dyn TableStore>,
}

impl Db {
    pub fn new(store: impl TableStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn from_arc(inner: Arc<dyn TableStore>) -> Self {
        Self { inner }
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<T>, StoreError> {
        let rows = self.inner.select(table, query).await?;
        rows.into_iter().map(decode).collect()
    }

    pub async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Option<T>, StoreError> {
        let query = query.clone().limit(1);
        let mut rows = self.inner.select(table, &query).await?;
        match rows.pop() {
            Some(row) => decode(row).map(Some),
            None => Ok(None),
        }
    }

    pub async fn count(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        self.inner.count(table, query).await
    }

    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
    ) -> Result<R, StoreError> {
        let stored = self.inner.insert(table, encode(row)?).await?;
        decode(stored)
    }

    pub async fn update<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        patch: &T,
    ) -> Result<Vec<R>, StoreError> {
        let rows = self.inner.update(table, query, encode(patch)?).await?;
        rows.into_iter().map(decode).collect()
    }

    /// Update expecting exactly one row; `StoreError::NotFound` otherwise
    pub async fn update_one<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        patch: &T,
    ) -> Result<R, StoreError> {
        let mut rows: Vec<R> = self.update(table, query, patch).await?;
        rows.pop().ok_or(StoreError::NotFound)
    }

    pub async fn upsert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
        on_conflict: &[&str],
    ) -> Result<R, StoreError> {
        let stored = self.inner.upsert(table, encode(row)?, on_conflict).await?;
        decode(stored)
    }

    pub async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        self.inner.delete(table, query).await
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(StoreError::Encode)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(StoreError::Decode)
}

/// Which integrity rule the database refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    NotNull,
    Check,
}

impl ConstraintKind {
    /// Map a Postgres SQLSTATE to a constraint kind
    pub fn from_sqlstate(code: &str) -> Option<Self> {
        match code {
            "23505" => Some(ConstraintKind::Unique),
            "23503" => Some(ConstraintKind::ForeignKey),
            "23502" => Some(ConstraintKind::NotNull),
            "23514" => Some(ConstraintKind::Check),
            _ => None,
        }
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },

    #[error("Constraint violation ({kind:?}): {detail}")]
    Constraint {
        kind: ConstraintKind,
        constraint: Option<String>,
        detail: String,
    },

    #[error("Row not found")]
    NotFound,

    #[error("Failed to encode row: {0}")]
    Encode(serde_json::Error),

    #[error("Failed to decode row: {0}")]
    Decode(serde_json::Error),

    #[error("No row returned from write")]
    NoRowReturned,
}
