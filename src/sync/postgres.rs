//! Direct Postgres access for the sync tool

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};
use uuid::Uuid;

use super::{SyncError, SyncRow, SyncSource, SyncTarget, SYNC_TABLES};

/// One side of a sync run. Works as source and target.
pub struct PgSyncStore {
    pool: PgPool,
    label: &'static str,
    columns: DashMap<&'static str, Vec<String>>,
}

impl PgSyncStore {
    pub async fn connect(url: &str, label: &'static str) -> Result<Self, SyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(15))
            .connect(url)
            .await?;
        info!(database = label, "Connected");

        Ok(Self {
            pool,
            label,
            columns: DashMap::new(),
        })
    }

    /// Column names of `table`, looked up once per run
    async fn columns(&self, table: &'static str) -> Result<Vec<String>, SyncError> {
        if let Some(cached) = self.columns.get(table) {
            return Ok(cached.clone());
        }

        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            select column_name::text from information_schema.columns
            where table_schema = current_schema() and table_name = $1
            order by ordinal_position
            "#,
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        if columns.is_empty() {
            return Err(SyncError::UnknownTable(table.to_string()));
        }
        debug!(database = self.label, table, columns = columns.len(), "Loaded columns");
        self.columns.insert(table, columns.clone());
        Ok(columns)
    }
}

/// Only whitelisted names are ever interpolated into SQL
fn checked(table: &str) -> Result<&'static str, SyncError> {
    SYNC_TABLES
        .iter()
        .copied()
        .find(|t| *t == table)
        .ok_or_else(|| SyncError::UnknownTable(table.to_string()))
}

fn upsert_sql(table: &str, columns: &[String]) -> String {
    let assignments: Vec<String> = columns
        .iter()
        .filter(|c| c.as_str() != "id")
        .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
        .collect();

    format!(
        "insert into {table} select * from jsonb_populate_record(null::{table}, $1) \
         on conflict (id) do update set {}",
        assignments.join(", ")
    )
}

#[async_trait]
impl SyncSource for PgSyncStore {
    async fn changed_rows(
        &self,
        table: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SyncRow>, SyncError> {
        let table = checked(table)?;
        let sql = format!(
            "select id, updated_at, to_jsonb(t) from {table} t \
             where $1::timestamptz is null or updated_at > $1 \
             order by updated_at"
        );

        let rows: Vec<(Uuid, DateTime<Utc>, Value)> = sqlx::query_as(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, updated_at, data)| SyncRow {
                id,
                updated_at,
                data,
            })
            .collect())
    }
}

#[async_trait]
impl SyncTarget for PgSyncStore {
    async fn versions(&self, table: &str) -> Result<HashMap<Uuid, DateTime<Utc>>, SyncError> {
        let table = checked(table)?;
        let rows: Vec<(Uuid, DateTime<Utc>)> =
            sqlx::query_as(&format!("select id, updated_at from {table}"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn write_row(&self, table: &str, row: &SyncRow) -> Result<(), SyncError> {
        let table = checked(table)?;
        if !row.data.is_object() {
            return Err(SyncError::MalformedRow {
                table: table.to_string(),
                id: row.id.to_string(),
                reason: "expected a JSON object".to_string(),
            });
        }

        let columns = self.columns(table).await?;
        sqlx::query(&upsert_sql(table, &columns))
            .bind(&row.data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_replicated_tables_pass() {
        assert_eq!(checked("customers").unwrap(), "customers");
        assert!(matches!(
            checked("users; drop table users"),
            Err(SyncError::UnknownTable(_))
        ));
    }

    #[test]
    fn upsert_updates_every_column_but_id() {
        let columns = vec!["id".to_string(), "name".to_string(), "updated_at".to_string()];
        let sql = upsert_sql("products", &columns);
        assert!(sql.starts_with("insert into products select * from jsonb_populate_record(null::products, $1)"));
        assert!(sql.ends_with(
            "on conflict (id) do update set \"name\" = excluded.\"name\", \"updated_at\" = excluded.\"updated_at\""
        ));
    }
}
