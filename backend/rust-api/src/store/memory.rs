use async_trait::async_trait;
use serde::Serialize;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use super::{like_regex, to_row, Condition, Query, Row, Store, StoreError, DEFAULT_PAGE_SIZE};

/// Process-local store used for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    fail_writes: AtomicBool,
    max_rows: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps every read at `max_rows`, the way PostgREST does.
    pub fn with_max_rows(max_rows: usize) -> Self {
        Self {
            max_rows: Some(max_rows.max(1)),
            ..Self::default()
        }
    }

    pub async fn seed<T: Serialize>(&self, table: &str, records: &[T]) -> Result<(), StoreError> {
        let rows = records.iter().map(to_row).collect::<Result<Vec<_>, _>>()?;
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().extend(rows);
        Ok(())
    }

    /// Makes every subsequent write fail with a network error until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(StoreError::Network("simulated write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn page_size(&self) -> usize {
        self.max_rows.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let filter = Filter::new(&query.conditions)?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !query.order.is_empty() {
            rows.sort_by(|a, b| {
                for order in &query.order {
                    let left = a.get(&order.column).unwrap_or(&Value::Null);
                    let right = b.get(&order.column).unwrap_or(&Value::Null);
                    let ordering = compare(left, right).unwrap_or(Ordering::Equal);
                    let ordering = if order.ascending {
                        ordering
                    } else {
                        ordering.reverse()
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query
            .limit
            .unwrap_or(usize::MAX)
            .min(self.max_rows.unwrap_or(usize::MAX));
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect())
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError> {
        self.check_writable()?;
        let filter = Filter::new(&query.conditions)?;
        let mut tables = self.tables.write().await;
        let mut updated = Vec::new();
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                for (key, value) in &patch {
                    row.insert(key.clone(), value.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, query: &Query) -> Result<u64, StoreError> {
        self.check_writable()?;
        let filter = Filter::new(&query.conditions)?;
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&query.table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok((before - rows.len()) as u64)
    }

    async fn rpc(&self, _function: &str, _args: Value) -> Result<Value, StoreError> {
        Err(StoreError::Unsupported("memory"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Conditions of one query with their `LIKE` patterns compiled once.
struct Filter<'a> {
    conditions: &'a [Condition],
    patterns: Vec<Option<Regex>>,
}

impl<'a> Filter<'a> {
    fn new(conditions: &'a [Condition]) -> Result<Self, StoreError> {
        let patterns = conditions
            .iter()
            .map(|condition| match condition {
                Condition::ILike(_, pattern) => like_regex(pattern).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            conditions,
            patterns,
        })
    }

    fn matches(&self, row: &Row) -> bool {
        self.conditions
            .iter()
            .zip(&self.patterns)
            .all(|(condition, pattern)| matches(row, condition, pattern.as_ref()))
    }
}

fn matches(row: &Row, condition: &Condition, pattern: Option<&Regex>) -> bool {
    let field = row.get(condition.column()).unwrap_or(&Value::Null);
    match condition {
        Condition::Eq(_, value) => loose_eq(field, value),
        Condition::Lt(_, value) => compare(field, value) == Some(Ordering::Less),
        Condition::Lte(_, value) => {
            matches!(compare(field, value), Some(Ordering::Less | Ordering::Equal))
        }
        Condition::In(_, values) => values.iter().any(|value| loose_eq(field, value)),
        Condition::ILike(..) => match (field.as_str(), pattern) {
            (Some(text), Some(pattern)) => pattern.is_match(text),
            _ => false,
        },
        Condition::IsNull(_) => field.is_null(),
    }
}

fn project(row: Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row;
    }
    row.into_iter()
        .filter(|(key, _)| columns.iter().any(|c| c == key))
        .collect()
}

/// Equality that treats `1`, `1.0` and `"1"` as the same key, the way the
/// row store coerces filter values to the column type.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::Number(b)) | (Value::Number(b), Value::String(a)) => {
            *a == b.to_string()
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) => Some(Ordering::Less),
        (_, Value::Null) => Some(Ordering::Greater),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
