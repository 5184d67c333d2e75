//! Incremental last-write-wins replication between two databases

pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorCode, StandardError};

pub use postgres::PgSyncStore;

/// Tables replicated by the sync tool, in dependency order
pub const SYNC_TABLES: [&str; 3] = ["users", "customers", "products"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Insert,
    Update,
    Skip,
}

/// Last write wins: insert when the target lacks the row, update only when
/// the source copy is strictly newer.
pub fn decide(source: DateTime<Utc>, target: Option<DateTime<Utc>>) -> SyncAction {
    match target {
        None => SyncAction::Insert,
        Some(target) if source > target => SyncAction::Update,
        Some(_) => SyncAction::Skip,
    }
}

/// One row as read from the source: the full record plus the columns the
/// freshness check needs
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRow {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub data: Value,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Table is not replicated: {0}")]
    UnknownTable(String),

    #[error("Row {id} in {table} is malformed: {reason}")]
    MalformedRow {
        table: String,
        id: String,
        reason: String,
    },
}

impl From<SyncError> for StandardError {
    fn from(err: SyncError) -> Self {
        StandardError::new(ErrorCode::SyncFailed, err.to_string()).component("Synchronizer")
    }
}

#[async_trait]
pub trait SyncSource: Send + Sync {
    /// Rows of `table`, only those updated after `since` when given
    async fn changed_rows(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRow>, SyncError>;
}

#[async_trait]
pub trait SyncTarget: Send + Sync {
    /// `id -> updated_at` for every row of `table`
    async fn versions(&self, table: &str) -> Result<HashMap<Uuid, DateTime<Utc>>, SyncError>;

    /// Insert or overwrite the row with the source copy
    async fn write_row(&self, table: &str, row: &SyncRow) -> Result<(), SyncError>;
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TableReport {
    pub table: String,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Set when the table could not be read at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub tables: Vec<TableReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn total_written(&self) -> usize {
        self.tables.iter().map(|t| t.inserted + t.updated).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.tables
            .iter()
            .any(|t| t.failed > 0 || t.error.is_some())
    }
}

pub struct Synchronizer<S, T> {
    source: S,
    target: T,
    since: Option<DateTime<Utc>>,
}

impl<S: SyncSource, T: SyncTarget> Synchronizer<S, T> {
    pub fn new(source: S, target: T, since: Option<DateTime<Utc>>) -> Self {
        Self {
            source,
            target,
            since,
        }
    }

    /// Replicate every table. Row failures are counted and never abort
    /// the run; a table that cannot be read is reported and skipped.
    pub async fn run(&self) -> SyncReport {
        let started_at = Utc::now();
        info!(since = ?self.since, "Starting incremental sync");

        let mut tables = Vec::with_capacity(SYNC_TABLES.len());
        for table in SYNC_TABLES {
            let report = match self.sync_table(table).await {
                Ok(report) => report,
                Err(e) => {
                    error!(table, error = %e, "Table sync failed");
                    TableReport {
                        error: Some(e.to_string()),
                        ..TableReport::new(table)
                    }
                }
            };
            info!(
                table,
                inserted = report.inserted,
                updated = report.updated,
                skipped = report.skipped,
                failed = report.failed,
                "Table synced"
            );
            tables.push(report);
        }

        SyncReport {
            tables,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub async fn sync_table(&self, table: &str) -> Result<TableReport, SyncError> {
        let rows = self.source.changed_rows(table, self.since).await?;
        let existing = self.target.versions(table).await?;
        debug!(table, candidates = rows.len(), existing = existing.len(), "Comparing rows");

        let mut report = TableReport::new(table);
        for row in &rows {
            let action = decide(row.updated_at, existing.get(&row.id).copied());
            if action == SyncAction::Skip {
                report.skipped += 1;
                continue;
            }

            match self.target.write_row(table, row).await {
                Ok(()) if action == SyncAction::Insert => report.inserted += 1,
                Ok(()) => report.updated += 1,
                Err(e) => {
                    warn!(table, id = %row.id, error = %e, "Row sync failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct FakeDb {
        tables: Mutex<HashMap<String, Vec<SyncRow>>>,
        poisoned: Vec<Uuid>,
        unreadable: Option<&'static str>,
    }

    impl FakeDb {
        fn with(table: &str, rows: Vec<SyncRow>) -> Self {
            let db = FakeDb::default();
            db.tables.lock().insert(table.to_string(), rows);
            db
        }

        fn row(&self, table: &str, id: Uuid) -> Option<SyncRow> {
            self.tables
                .lock()
                .get(table)
                .and_then(|rows| rows.iter().find(|r| r.id == id).cloned())
        }
    }

    #[async_trait]
    impl SyncSource for FakeDb {
        async fn changed_rows(
            &self,
            table: &str,
            since: Option<DateTime<Utc>>,
        ) -> Result<Vec<SyncRow>, SyncError> {
            if self.unreadable == Some(table) {
                return Err(SyncError::UnknownTable(table.to_string()));
            }
            let tables = self.tables.lock();
            Ok(tables
                .get(table)
                .map(|rows| {
                    rows.iter()
                        .filter(|r| since.map_or(true, |s| r.updated_at > s))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl SyncTarget for FakeDb {
        async fn versions(&self, table: &str) -> Result<HashMap<Uuid, DateTime<Utc>>, SyncError> {
            let tables = self.tables.lock();
            Ok(tables
                .get(table)
                .map(|rows| rows.iter().map(|r| (r.id, r.updated_at)).collect())
                .unwrap_or_default())
        }

        async fn write_row(&self, table: &str, row: &SyncRow) -> Result<(), SyncError> {
            if self.poisoned.contains(&row.id) {
                return Err(SyncError::MalformedRow {
                    table: table.to_string(),
                    id: row.id.to_string(),
                    reason: "constraint".into(),
                });
            }
            let mut tables = self.tables.lock();
            let rows = tables.entry(table.to_string()).or_default();
            rows.retain(|r| r.id != row.id);
            rows.push(row.clone());
            Ok(())
        }
    }

    fn row(id: Uuid, updated_at: DateTime<Utc>, name: &str) -> SyncRow {
        SyncRow {
            id,
            updated_at,
            data: json!({"id": id, "name": name}),
        }
    }

    #[test]
    fn last_write_wins() {
        let t1 = Utc::now();
        let t2 = t1 - Duration::seconds(5);
        assert_eq!(decide(t1, None), SyncAction::Insert);
        assert_eq!(decide(t1, Some(t2)), SyncAction::Update);
        assert_eq!(decide(t2, Some(t1)), SyncAction::Skip);
        assert_eq!(decide(t1, Some(t1)), SyncAction::Skip, "equal timestamps are skipped");
    }

    #[tokio::test]
    async fn inserts_updates_and_skips() {
        let now = Utc::now();
        let (fresh, stale, missing) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let source = FakeDb::with(
            "customers",
            vec![
                row(fresh, now, "Acme v2"),
                row(stale, now - Duration::hours(1), "Globex old"),
                row(missing, now, "Initech"),
            ],
        );
        let target = FakeDb::with(
            "customers",
            vec![
                row(fresh, now - Duration::minutes(10), "Acme v1"),
                row(stale, now, "Globex new"),
            ],
        );

        let sync = Synchronizer::new(source, target, None);
        let report = sync.sync_table("customers").await.unwrap();

        assert_eq!((report.inserted, report.updated, report.skipped), (1, 1, 1));
        assert_eq!(sync.target.row("customers", fresh).unwrap().data["name"], "Acme v2");
        assert_eq!(sync.target.row("customers", stale).unwrap().data["name"], "Globex new");
        assert!(sync.target.row("customers", missing).is_some());
    }

    #[tokio::test]
    async fn row_failures_are_counted_and_run_continues() {
        let now = Utc::now();
        let bad = Uuid::new_v4();
        let source = FakeDb::with(
            "users",
            vec![row(bad, now, "broken"), row(Uuid::new_v4(), now, "ok")],
        );
        let target = FakeDb {
            poisoned: vec![bad],
            ..Default::default()
        };

        let report = Synchronizer::new(source, target, None).run().await;
        let users = report.table("users").unwrap();
        assert_eq!((users.inserted, users.failed), (1, 1));
        assert!(report.has_failures());
        assert_eq!(report.tables.len(), SYNC_TABLES.len());
    }

    #[tokio::test]
    async fn unreadable_table_does_not_stop_the_others() {
        let now = Utc::now();
        let mut source = FakeDb::with("products", vec![row(Uuid::new_v4(), now, "Widget")]);
        source.unreadable = Some("users");

        let report = Synchronizer::new(source, FakeDb::default(), None).run().await;
        assert!(report.table("users").unwrap().error.is_some());
        assert_eq!(report.table("products").unwrap().inserted, 1);
        assert_eq!(report.total_written(), 1);
    }

    #[tokio::test]
    async fn since_filters_source_rows() {
        let now = Utc::now();
        let source = FakeDb::with(
            "products",
            vec![
                row(Uuid::new_v4(), now - Duration::days(2), "old"),
                row(Uuid::new_v4(), now, "new"),
            ],
        );
        let sync = Synchronizer::new(source, FakeDb::default(), Some(now - Duration::days(1)));
        let report = sync.sync_table("products").await.unwrap();
        assert_eq!(report.inserted, 1);
    }
}
