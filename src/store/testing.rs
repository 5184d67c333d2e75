//! Store wrapper that fails chosen writes, for exercising rollback paths

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{Db, MemoryStore, Query, StoreError, TableStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Write {
    Insert,
    Update,
    Delete,
}

/// Delegates to a [`MemoryStore`]; armed failures fire once each
pub(crate) struct FailingStore {
    inner: MemoryStore,
    /// (write, table, matching writes still to let through)
    armed: Mutex<Vec<(Write, String, usize)>>,
}

impl FailingStore {
    /// The store plus a [`Db`] over the same rows
    pub(crate) fn with_schema() -> (Arc<Self>, Db) {
        let store = Arc::new(Self {
            inner: MemoryStore::with_schema(),
            armed: Mutex::new(Vec::new()),
        });
        let db = Db::from_arc(store.clone());
        (store, db)
    }

    /// Fail the next `write` against `table`
    pub(crate) fn fail_next(&self, write: Write, table: &str) {
        self.fail_nth(write, table, 1);
    }

    /// Let `n - 1` matching writes through, then fail the next one
    pub(crate) fn fail_nth(&self, write: Write, table: &str, n: usize) {
        self.armed
            .lock()
            .push((write, table.to_string(), n.saturating_sub(1)));
    }

    fn trip(&self, write: Write, table: &str) -> Result<(), StoreError> {
        let mut armed = self.armed.lock();
        let Some(pos) = armed.iter().position(|(w, t, _)| *w == write && t == table) else {
            return Ok(());
        };
        let skip = &mut armed[pos].2;
        if *skip > 0 {
            *skip -= 1;
            return Ok(());
        }
        armed.remove(pos);
        Err(StoreError::Api {
            status: 503,
            body: format!("{:?} on {} refused", write, table),
        })
    }
}

#[async_trait]
impl TableStore for FailingStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.inner.select(table, query).await
    }

    async fn count(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        self.inner.count(table, query).await
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        self.trip(Write::Insert, table)?;
        self.inner.insert(table, row).await
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        self.trip(Write::Update, table)?;
        self.inner.update(table, query, patch).await
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &[&str],
    ) -> Result<Value, StoreError> {
        self.trip(Write::Insert, table)?;
        self.inner.upsert(table, row, on_conflict).await
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        self.trip(Write::Delete, table)?;
        self.inner.delete(table, query).await
    }
}
