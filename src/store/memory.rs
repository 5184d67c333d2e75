//! In-process table store for development and tests.
//! Enforces the unique and foreign-key rules the relational schema declares.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{ConstraintKind, Query, StoreError, TableStore};

#[derive(Debug, Clone)]
struct UniqueRule {
    table: String,
    columns: Vec<String>,
    /// Partial rule: only rows whose column holds this value take part
    only_when: Option<(String, Value)>,
}

impl UniqueRule {
    fn applies_to(&self, row: &Value) -> bool {
        match &self.only_when {
            Some((column, value)) => row.get(column) == Some(value),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
struct ForeignKey {
    table: String,
    column: String,
    references: String,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    unique: Vec<UniqueRule>,
    foreign_keys: Vec<ForeignKey>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with the application's constraints
    pub fn with_schema() -> Self {
        Self::new()
            .unique("users", &["tenant_id", "email"])
            .unique("customers", &["tenant_id", "email"])
            .unique("products", &["tenant_id", "sku"])
            .unique("entitlements", &["tenant_id", "feature"])
            .unique("proposal_versions", &["proposal_id", "version"])
            .unique_where("customer_contacts", &["customer_id"], "is_primary", true)
            .foreign_key("customer_contacts", "customer_id", "customers")
            .foreign_key("proposals", "customer_id", "customers")
            .foreign_key("proposal_items", "proposal_id", "proposals")
            .foreign_key("proposal_items", "product_id", "products")
            .foreign_key("proposal_versions", "proposal_id", "proposals")
    }

    pub fn unique(mut self, table: &str, columns: &[&str]) -> Self {
        self.unique.push(UniqueRule {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            only_when: None,
        });
        self
    }

    /// Unique among rows where `column` equals `value`, like a partial index
    pub fn unique_where(
        mut self,
        table: &str,
        columns: &[&str],
        column: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.unique.push(UniqueRule {
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            only_when: Some((column.to_string(), value.into())),
        });
        self
    }

    pub fn foreign_key(mut self, table: &str, column: &str, references: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
            references: references.to_string(),
        });
        self
    }

    fn check_unique(
        &self,
        tables: &HashMap<String, Vec<Value>>,
        table: &str,
        row: &Value,
        skip_index: Option<usize>,
    ) -> Result<(), StoreError> {
        let existing = tables.get(table).map(Vec::as_slice).unwrap_or(&[]);

        for rule in self.unique.iter().filter(|r| r.table == table && r.applies_to(row)) {
            let key: Vec<&Value> = rule
                .columns
                .iter()
                .map(|c| row.get(c).unwrap_or(&Value::Null))
                .collect();
            if key.iter().any(|v| v.is_null()) {
                continue;
            }

            let clash = existing.iter().enumerate().any(|(i, other)| {
                Some(i) != skip_index
                    && rule.applies_to(other)
                    && rule
                        .columns
                        .iter()
                        .zip(&key)
                        .all(|(c, v)| other.get(c) == Some(*v))
            });

            if clash {
                return Err(StoreError::Constraint {
                    kind: ConstraintKind::Unique,
                    constraint: Some(format!("{}_{}_key", table, rule.columns.join("_"))),
                    detail: format!("Key ({}) already exists.", rule.columns.join(", ")),
                });
            }
        }

        Ok(())
    }

    fn check_references(
        &self,
        tables: &HashMap<String, Vec<Value>>,
        table: &str,
        row: &Value,
    ) -> Result<(), StoreError> {
        for fk in self.foreign_keys.iter().filter(|f| f.table == table) {
            let value = match row.get(&fk.column) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };

            let found = tables
                .get(&fk.references)
                .map(|rows| rows.iter().any(|r| r.get("id") == Some(value)))
                .unwrap_or(false);

            if !found {
                return Err(StoreError::Constraint {
                    kind: ConstraintKind::ForeignKey,
                    constraint: Some(format!("{}_{}_fkey", table, fk.column)),
                    detail: format!("Key ({})={} is not present in \"{}\".", fk.column, value, fk.references),
                });
            }
        }

        Ok(())
    }

    fn check_not_referenced(
        &self,
        tables: &HashMap<String, Vec<Value>>,
        table: &str,
        row: &Value,
    ) -> Result<(), StoreError> {
        let Some(id) = row.get("id") else {
            return Ok(());
        };

        for fk in self.foreign_keys.iter().filter(|f| f.references == table) {
            let referenced = tables
                .get(&fk.table)
                .map(|rows| rows.iter().any(|r| r.get(&fk.column) == Some(id)))
                .unwrap_or(false);

            if referenced {
                return Err(StoreError::Constraint {
                    kind: ConstraintKind::ForeignKey,
                    constraint: Some(format!("{}_{}_fkey", fk.table, fk.column)),
                    detail: format!("Key (id)={} is still referenced from table \"{}\".", id, fk.table),
                });
            }
        }

        Ok(())
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

fn as_object(row: Value) -> Result<Value, StoreError> {
    match row {
        Value::Object(_) => Ok(row),
        other => Err(StoreError::Api {
            status: 400,
            body: format!("expected JSON object row, got {}", other),
        }),
    }
}

#[async_trait]
impl TableStore for MemoryStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.read();
        let rows: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        Ok(query.page(rows))
    }

    async fn count(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, StoreError> {
        let row = as_object(row)?;
        let mut tables = self.tables.write();

        self.check_unique(&tables, table, &row, None)?;
        self.check_references(&tables, table, &row)?;

        tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoreError> {
        let mut tables = self.tables.write();

        let indices: Vec<usize> = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .enumerate()
                    .filter(|(_, r)| query.matches(r))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default();

        // Validate every candidate before touching anything
        let mut staged = Vec::with_capacity(indices.len());
        for &i in &indices {
            let mut candidate = tables[table][i].clone();
            merge(&mut candidate, &patch);
            self.check_unique(&tables, table, &candidate, Some(i))?;
            self.check_references(&tables, table, &candidate)?;
            staged.push((i, candidate));
        }

        let mut updated = Vec::with_capacity(staged.len());
        if let Some(rows) = tables.get_mut(table) {
            for (i, candidate) in staged {
                rows[i] = candidate.clone();
                updated.push(candidate);
            }
        }
        Ok(updated)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Value,
        on_conflict: &[&str],
    ) -> Result<Value, StoreError> {
        let row = as_object(row)?;

        let mut key = Query::new();
        for column in on_conflict {
            key = key.eq(column, row.get(*column).cloned().unwrap_or(Value::Null));
        }

        let exists = {
            let tables = self.tables.read();
            tables
                .get(table)
                .map(|rows| rows.iter().any(|r| key.matches(r)))
                .unwrap_or(false)
        };

        if exists {
            // Never rewrite the primary key of the existing row
            let mut patch = row;
            if let Value::Object(map) = &mut patch {
                map.remove("id");
            }
            let mut rows = self.update(table, &key, patch).await?;
            rows.pop().ok_or(StoreError::NoRowReturned)
        } else {
            self.insert(table, row).await
        }
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<u64, StoreError> {
        let mut tables = self.tables.write();

        let doomed: Vec<Value> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();

        for row in &doomed {
            self.check_not_referenced(&tables, table, row)?;
        }

        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|r| !query.matches(r));
        }
        Ok(doomed.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unique_rule_is_tenant_scoped() {
        let store = MemoryStore::new().unique("customers", &["tenant_id", "email"]);

        store
            .insert("customers", json!({"id": "1", "tenant_id": "a", "email": "x@y.z"}))
            .await
            .unwrap();
        store
            .insert("customers", json!({"id": "2", "tenant_id": "b", "email": "x@y.z"}))
            .await
            .unwrap();

        let err = store
            .insert("customers", json!({"id": "3", "tenant_id": "a", "email": "x@y.z"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Constraint {
                kind: ConstraintKind::Unique,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn partial_unique_rule_only_covers_matching_rows() {
        let store =
            MemoryStore::new().unique_where("customer_contacts", &["customer_id"], "is_primary", true);

        for (id, primary) in [("a", true), ("b", false), ("c", false)] {
            store
                .insert(
                    "customer_contacts",
                    json!({"id": id, "customer_id": "cust", "is_primary": primary}),
                )
                .await
                .unwrap();
        }

        let second = store
            .insert("customer_contacts", json!({"id": "d", "customer_id": "cust", "is_primary": true}))
            .await;
        assert!(matches!(
            second,
            Err(StoreError::Constraint {
                kind: ConstraintKind::Unique,
                ..
            })
        ));

        let promote = store
            .update("customer_contacts", &Query::new().eq("id", "b"), json!({"is_primary": true}))
            .await;
        assert!(promote.is_err(), "promoting while another primary exists");

        store
            .update("customer_contacts", &Query::new().eq("id", "a"), json!({"is_primary": false}))
            .await
            .unwrap();
        store
            .update("customer_contacts", &Query::new().eq("id", "b"), json!({"is_primary": true}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_guard_insert_and_delete() {
        let store = MemoryStore::with_schema();

        let orphan = store
            .insert("customer_contacts", json!({"id": "c1", "customer_id": "missing"}))
            .await;
        assert!(matches!(
            orphan,
            Err(StoreError::Constraint {
                kind: ConstraintKind::ForeignKey,
                ..
            })
        ));

        store
            .insert("customers", json!({"id": "cust", "tenant_id": "t"}))
            .await
            .unwrap();
        store
            .insert("customer_contacts", json!({"id": "c1", "customer_id": "cust"}))
            .await
            .unwrap();

        let blocked = store.delete("customers", &Query::new().eq("id", "cust")).await;
        assert!(blocked.is_err());

        assert_eq!(
            store
                .delete("customer_contacts", &Query::new().eq("id", "c1"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store.delete("customers", &Query::new().eq("id", "cust")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_columns() {
        let store = MemoryStore::with_schema();
        store
            .upsert(
                "entitlements",
                json!({"id": "e1", "tenant_id": "t", "feature": "pdf_export", "enabled": false}),
                &["tenant_id", "feature"],
            )
            .await
            .unwrap();
        let merged = store
            .upsert(
                "entitlements",
                json!({"id": "e2", "tenant_id": "t", "feature": "pdf_export", "enabled": true}),
                &["tenant_id", "feature"],
            )
            .await
            .unwrap();

        assert_eq!(merged["id"], "e1");
        assert_eq!(merged["enabled"], true);
        assert_eq!(store.count("entitlements", &Query::tenant("t")).await.unwrap(), 1);
    }
}
