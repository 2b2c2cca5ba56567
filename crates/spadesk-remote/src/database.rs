//! Hosted database trait

use async_trait::async_trait;
use serde_json::Value;
use spadesk_util::Result;
use std::cmp::Ordering;

/// A row as exchanged with the hosted database
pub type Row = Value;

/// Sort order for a select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Equality filters, ordering and limit for a select
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((column.into(), value.into()));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending: true,
        });
        self
    }

    pub fn order_by_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty() && self.limit.is_none()
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }

    /// Evaluate the query over rows held locally (mock tables, cache)
    pub fn apply(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
        let mut selected: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();

        if let Some(order) = &self.order {
            selected.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }

        selected
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        // Nulls sort last
        (None | Some(Value::Null), _) => Ordering::Greater,
        (_, None | Some(Value::Null)) => Ordering::Less,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

/// Table-scoped access to the hosted relational store
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>>;

    /// Insert a row. Re-inserting an existing id overwrites it, so outbox
    /// replays are harmless.
    async fn insert(&self, table: &str, row: &Row) -> Result<Row>;

    /// Patch the row with the given id
    async fn update(&self, table: &str, id: &str, patch: &Row) -> Result<Row>;

    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    async fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_filters_orders_and_limits() {
        let rows = vec![
            json!({"id": "r3", "name": "Zen", "status": "available"}),
            json!({"id": "r1", "name": "Lotus", "status": "occupied"}),
            json!({"id": "r2", "name": "Bamboo", "status": "available"}),
        ];

        let by_name = Query::new().order_by("name").apply(rows.clone());
        let names: Vec<_> = by_name.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Bamboo", "Lotus", "Zen"]);

        let available = Query::new()
            .eq("status", "available")
            .order_by_desc("name")
            .limit(1)
            .apply(rows);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0]["id"], "r3");
    }

    #[test]
    fn nulls_sort_last() {
        let rows = vec![json!({"pos": null}), json!({"pos": 2}), json!({"pos": 1})];
        let sorted = Query::new().order_by("pos").apply(rows);
        assert_eq!(sorted[0]["pos"], 1);
        assert!(sorted[2]["pos"].is_null());
    }
}
