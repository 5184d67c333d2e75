//! Row filters understood by every table store

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    IsNull,
    NotNull,
}

impl Op {
    fn postgrest(&self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::IsNull => "is",
            Op::NotNull => "not.is",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

/// Filter, ordering and paging for a select/update/delete
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub conditions: Vec<Condition>,
    /// Case-insensitive substring search across several columns (OR-ed)
    pub search: Option<(Vec<String>, String)>,
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tenant-owned query starts here
    pub fn tenant(tenant_id: impl ToString) -> Self {
        Self::new().eq("tenant_id", tenant_id.to_string())
    }

    fn push(mut self, column: &str, op: Op, value: Value) -> Self {
        self.conditions.push(Condition {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Eq, value.into())
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Neq, value.into())
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Gt, value.into())
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Gte, value.into())
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Lt, value.into())
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.push(column, Op::Lte, value.into())
    }

    pub fn is_null(self, column: &str) -> Self {
        self.push(column, Op::IsNull, Value::Null)
    }

    pub fn not_null(self, column: &str) -> Self {
        self.push(column, Op::NotNull, Value::Null)
    }

    pub fn search(mut self, columns: &[&str], term: &str) -> Self {
        let term = term.trim();
        if !term.is_empty() {
            self.search = Some((
                columns.iter().map(|c| c.to_string()).collect(),
                term.to_string(),
            ));
        }
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Encode as PostgREST query parameters
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .conditions
            .iter()
            .map(|c| {
                let value = match (&c.op, &c.value) {
                    (Op::IsNull | Op::NotNull, _) => "null".to_string(),
                    (_, Value::String(s)) => s.clone(),
                    (_, other) => other.to_string(),
                };
                (c.column.clone(), format!("{}.{}", c.op.postgrest(), value))
            })
            .collect();

        if let Some((columns, term)) = &self.search {
            let needle = term.replace(['(', ')', ',', '*'], " ");
            let clauses: Vec<String> = columns
                .iter()
                .map(|c| format!("{}.ilike.*{}*", c, needle))
                .collect();
            params.push(("or".to_string(), format!("({})", clauses.join(","))));
        }

        if let Some((column, ascending)) = &self.order {
            let dir = if *ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", column, dir)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }

        params
    }

    /// Evaluate the filter part (not paging) against a JSON row
    pub fn matches(&self, row: &Value) -> bool {
        let conditions_hold = self.conditions.iter().all(|c| {
            let field = row.get(&c.column).unwrap_or(&Value::Null);
            match c.op {
                Op::IsNull => field.is_null(),
                Op::NotNull => !field.is_null(),
                Op::Eq => loosely_equal(field, &c.value),
                Op::Neq => !loosely_equal(field, &c.value),
                Op::Gt => compare(field, &c.value) == Some(Ordering::Greater),
                Op::Gte => matches!(
                    compare(field, &c.value),
                    Some(Ordering::Greater | Ordering::Equal)
                ),
                Op::Lt => compare(field, &c.value) == Some(Ordering::Less),
                Op::Lte => matches!(
                    compare(field, &c.value),
                    Some(Ordering::Less | Ordering::Equal)
                ),
            }
        });

        let search_holds = match &self.search {
            None => true,
            Some((columns, term)) => {
                let needle = term.to_lowercase();
                columns.iter().any(|c| {
                    row.get(c)
                        .and_then(Value::as_str)
                        .map(|s| s.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            }
        };

        conditions_hold && search_holds
    }

    /// Apply ordering and paging to already-filtered rows
    pub fn page(&self, mut rows: Vec<Value>) -> Vec<Value> {
        if let Some((column, ascending)) = &self.order {
            rows.sort_by(|a, b| {
                let ord = compare(
                    a.get(column).unwrap_or(&Value::Null),
                    b.get(column).unwrap_or(&Value::Null),
                )
                .unwrap_or(Ordering::Equal);
                if *ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        let offset = self.offset.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        rows.into_iter().skip(offset).take(limit).collect()
    }
}

fn loosely_equal(field: &Value, expected: &Value) -> bool {
    match (field, expected) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::String(b)) | (Value::String(b), Value::Bool(a)) => {
            b.parse::<bool>().map(|b| *a == b).unwrap_or(false)
        }
        (a, b) => compare(a, b) == Some(Ordering::Equal),
    }
}

/// Numbers compare numerically, RFC 3339 strings chronologically
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => {
            match (
                x.parse::<DateTime<Utc>>().ok(),
                y.parse::<DateTime<Utc>>().ok(),
            ) {
                (Some(dx), Some(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_postgrest_params() {
        let q = Query::tenant("t1")
            .is_null("deleted_at")
            .search(&["name", "email"], "acme")
            .order_by("created_at", false)
            .limit(20);

        let params = q.to_params();
        assert!(params.contains(&("tenant_id".into(), "eq.t1".into())));
        assert!(params.contains(&("deleted_at".into(), "is.null".into())));
        assert!(params.contains(&("or".into(), "(name.ilike.*acme*,email.ilike.*acme*)".into())));
        assert!(params.contains(&("order".into(), "created_at.desc".into())));
        assert!(params.contains(&("limit".into(), "20".into())));
    }

    #[test]
    fn matches_rows_in_memory() {
        let row = json!({
            "tenant_id": "t1",
            "name": "Acme Corp",
            "unit_price": 12.5,
            "is_active": true,
            "updated_at": "2024-05-01T10:00:00.123Z",
            "deleted_at": null
        });

        assert!(Query::tenant("t1").is_null("deleted_at").matches(&row));
        assert!(!Query::tenant("t2").matches(&row));
        assert!(Query::new().search(&["name"], "acme").matches(&row));
        assert!(Query::new().gte("unit_price", 10).matches(&row));
        assert!(Query::new().eq("is_active", true).matches(&row));
        assert!(Query::new()
            .gt("updated_at", "2024-05-01T10:00:00Z")
            .matches(&row));
    }

    #[test]
    fn pages_sorted_rows() {
        let rows = vec![json!({"n": 2}), json!({"n": 3}), json!({"n": 1})];
        let paged = Query::new().order_by("n", true).offset(1).limit(1).page(rows);
        assert_eq!(paged, vec![json!({"n": 2})]);
    }
}
