//! Data-access layer over the managed row store.
//!
//! Every read and write the service performs goes through [`Store`]. The
//! trait speaks in plain JSON rows and a small filter vocabulary that maps
//! onto PostgREST query strings, MongoDB filter documents and the in-memory
//! backend used in development.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod mongo;
pub mod rest;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use rest::RestStore;

pub type Row = serde_json::Map<String, Value>;

pub const QUESTIONS: &str = "questions";
pub const STUDY_SESSIONS: &str = "study_sessions";
pub const USER_ANSWERS: &str = "user_answers";
pub const FAVORITES: &str = "favorites";
pub const QUESTION_NOTES: &str = "question_notes";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Network(String),
    #[error("store request timed out")]
    Timeout,
    #[error("store rejected credentials: {0}")]
    Unauthorized(String),
    #[error("not found in store: {0}")]
    NotFound(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("store rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode store response: {0}")]
    Decode(String),
    #[error("operation not supported by the {0} backend")]
    Unsupported(&'static str),
}

impl StoreError {
    /// Stable code safe to hand to API clients; the detail stays in the logs.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Network(_) | StoreError::Timeout => "store_unavailable",
            StoreError::Unauthorized(_) => "store_unauthorized",
            StoreError::NotFound(_)
            | StoreError::Conflict(_)
            | StoreError::Rejected { .. }
            | StoreError::Unsupported(_) => "store_rejected",
            StoreError::Decode(_) => "store_decode",
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Network(_) | StoreError::Timeout => true,
            StoreError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive SQL `LIKE`: `%` and `_` are wildcards, `\` escapes
    /// the next character.
    ILike(String, String),
    IsNull(String),
}

impl Condition {
    pub fn column(&self) -> &str {
        match self {
            Condition::Eq(c, _)
            | Condition::Lt(c, _)
            | Condition::Lte(c, _)
            | Condition::In(c, _)
            | Condition::ILike(c, _)
            | Condition::IsNull(c) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A filtered read (or the target of an update/delete) against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    /// Projection; empty selects every column.
    pub columns: Vec<String>,
    pub conditions: Vec<Condition>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: Vec::new(),
            conditions: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::Eq(column.to_string(), value.into()))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::Lt(column.to_string(), value.into()))
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Condition::Lte(column.to_string(), value.into()))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.filter(Condition::IsNull(column.to_string()))
    }

    pub fn is_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.filter(Condition::In(column.to_string(), values))
    }

    pub fn ilike(self, column: &str, pattern: impl Into<String>) -> Self {
        self.filter(Condition::ILike(column.to_string(), pattern.into()))
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
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
}

/// Rows per request when reading a whole result set. PostgREST caps
/// responses at `max-rows` (1000 on Supabase) without reporting truncation.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name used in logs, metrics and health output.
    fn backend(&self) -> &'static str;

    /// Largest page [`fetch_paged`] asks this backend for.
    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Inserts one row and returns it as stored.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// Applies `patch` to every row matched by `query` and returns the updated rows.
    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError>;

    /// Deletes every row matched by `query` and returns how many were removed.
    async fn delete(&self, query: &Query) -> Result<u64, StoreError>;

    /// Calls a remote procedure. Backends without procedures return
    /// [`StoreError::Unsupported`].
    async fn rpc(&self, function: &str, args: Value) -> Result<Value, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Decode(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, StoreError> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

pub async fn fetch_all<T: DeserializeOwned>(
    store: &dyn Store,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    store
        .select(query)
        .await?
        .into_iter()
        .map(from_row)
        .collect()
}

pub async fn fetch_optional<T: DeserializeOwned>(
    store: &dyn Store,
    query: Query,
) -> Result<Option<T>, StoreError> {
    let query = query.limit(1);
    match store.select(&query).await?.into_iter().next() {
        Some(row) => from_row(row).map(Some),
        None => Ok(None),
    }
}

pub async fn insert_record<T: Serialize>(
    store: &dyn Store,
    table: &str,
    record: &T,
) -> Result<Row, StoreError> {
    store.insert(table, to_row(record)?).await
}

/// Reads the rows matched by `query` one page at a time until a short page
/// comes back, or until `query.limit` rows were collected. The query must be
/// ordered on a unique key (or end with one) so pages neither overlap nor
/// skip rows.
pub async fn fetch_paged<T: DeserializeOwned>(
    store: &dyn Store,
    query: &Query,
) -> Result<Vec<T>, StoreError> {
    let page_size = store.page_size().max(1);
    let wanted = query.limit.unwrap_or(usize::MAX);
    let mut out = Vec::new();
    let mut offset = query.offset.unwrap_or(0);
    while out.len() < wanted {
        let requested = page_size.min(wanted - out.len());
        let page = query.clone().limit(requested).offset(offset);
        let rows = store.select(&page).await?;
        let fetched = rows.len();
        for row in rows {
            out.push(from_row(row)?);
        }
        if fetched < requested {
            break;
        }
        offset += fetched;
    }
    Ok(out)
}

/// Ids per `in.(...)` filter, keeping request URLs short.
const IN_LIST_CHUNK: usize = 200;

/// Loads the rows of `table` whose `id` is in `ids`, in id order per chunk.
pub async fn fetch_by_ids<'a, T: DeserializeOwned>(
    store: &dyn Store,
    table: &str,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<T>, StoreError> {
    let ids: Vec<&str> = ids.into_iter().collect();
    let mut out = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(IN_LIST_CHUNK) {
        let query = Query::table(table)
            .is_in("id", chunk.iter().copied())
            .order_by("id", true);
        out.extend(fetch_paged::<T>(store, &query).await?);
    }
    Ok(out)
}

/// Translates a `LIKE` pattern into an anchored regular expression.
pub fn like_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut literal = String::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => literal.push(chars.next().unwrap_or('\\')),
            '%' | '_' => {
                out.push_str(&regex::escape(&literal));
                literal.clear();
                out.push_str(if c == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    out.push_str(&regex::escape(&literal));
    out.push('$');
    out
}

/// Compiles a case-insensitive `LIKE` pattern.
pub fn like_regex(pattern: &str) -> Result<Regex, StoreError> {
    RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| StoreError::Decode(format!("invalid pattern {}: {}", pattern, e)))
}

/// Escapes `LIKE` wildcards in user input. `*` becomes the single character
/// wildcard because PostgREST reads every `*` as `%`.
pub fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '*' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}
