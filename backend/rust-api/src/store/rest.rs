use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::{Condition, Query, Row, Store, StoreError, DEFAULT_PAGE_SIZE};
use crate::metrics::track_store_operation;

const BACKEND: &str = "rest";

/// PostgREST client for a Supabase project (`{project_url}/rest/v1`).
pub struct RestStore {
    http: Client,
    rest_url: Url,
    api_key: String,
    page_size: usize,
}

impl RestStore {
    pub fn new(project_url: &str, api_key: &str, timeout: Duration) -> Result<Self, StoreError> {
        let mut base = Url::parse(project_url)
            .map_err(|e| StoreError::Network(format!("invalid store url {}: {}", project_url, e)))?;
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let rest_url = base
            .join("rest/v1/")
            .map_err(|e| StoreError::Network(e.to_string()))?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Network(e.to_string()))?;

        Ok(Self {
            http,
            rest_url,
            api_key: api_key.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Must not exceed the server's `max-rows`, or paged reads stop early.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        self.rest_url
            .join(path)
            .map_err(|e| StoreError::Network(format!("invalid path {}: {}", path, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "application/json")
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body))
    }

    async fn rows(response: Response) -> Result<Vec<Row>, StoreError> {
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Store for RestStore {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        track_store_operation(BACKEND, "select", &query.table, async {
            let columns = if query.columns.is_empty() {
                "*".to_string()
            } else {
                query.columns.join(",")
            };
            let mut params = vec![("select".to_string(), columns)];
            params.extend(query_params(query));
            let url = self.url(&query.table)?;
            let response = self
                .send(self.request(Method::GET, url).query(&params))
                .await?;
            Self::rows(response).await
        })
        .await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        track_store_operation(BACKEND, "insert", table, async {
            let url = self.url(table)?;
            let response = self
                .send(
                    self.request(Method::POST, url)
                        .header("Prefer", "return=representation")
                        .json(&row),
                )
                .await?;
            Self::rows(response)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::Decode("insert returned no rows".to_string()))
        })
        .await
    }

    async fn update(&self, query: &Query, patch: Row) -> Result<Vec<Row>, StoreError> {
        track_store_operation(BACKEND, "update", &query.table, async {
            let url = self.url(&query.table)?;
            let response = self
                .send(
                    self.request(Method::PATCH, url)
                        .query(&query_params(query))
                        .header("Prefer", "return=representation")
                        .json(&patch),
                )
                .await?;
            Self::rows(response).await
        })
        .await
    }

    async fn delete(&self, query: &Query) -> Result<u64, StoreError> {
        track_store_operation(BACKEND, "delete", &query.table, async {
            let url = self.url(&query.table)?;
            let response = self
                .send(
                    self.request(Method::DELETE, url)
                        .query(&query_params(query))
                        .header("Prefer", "return=representation"),
                )
                .await?;
            Ok(Self::rows(response).await?.len() as u64)
        })
        .await
    }

    async fn rpc(&self, function: &str, args: Value) -> Result<Value, StoreError> {
        track_store_operation(BACKEND, "rpc", function, async {
            let url = self.url(&format!("rpc/{}", function))?;
            let response = self
                .send(self.request(Method::POST, url).json(&args))
                .await?;
            let body = response.text().await.map_err(classify)?;
            if body.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&body)?)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let url = self.rest_url.clone();
        self.send(self.request(Method::GET, url)).await.map(|_| ())
    }
}

fn classify(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Network(err.to_string())
    }
}

fn status_error(status: StatusCode, body: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized(body),
        StatusCode::NOT_FOUND => StoreError::NotFound(body),
        StatusCode::CONFLICT => StoreError::Conflict(body),
        _ => StoreError::Rejected {
            status: status.as_u16(),
            message: body,
        },
    }
}

/// Translates a [`Query`] into PostgREST horizontal filters, ordering and paging.
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .conditions
        .iter()
        .map(|condition| (condition.column().to_string(), operator(condition)))
        .collect();

    if !query.order.is_empty() {
        let order = query
            .order
            .iter()
            .map(|o| {
                format!(
                    "{}.{}",
                    o.column,
                    if o.ascending { "asc" } else { "desc" }
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        params.push(("order".to_string(), order));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if let Some(offset) = query.offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

fn operator(condition: &Condition) -> String {
    match condition {
        Condition::Eq(_, v) => format!("eq.{}", scalar(v)),
        Condition::Lt(_, v) => format!("lt.{}", scalar(v)),
        Condition::Lte(_, v) => format!("lte.{}", scalar(v)),
        Condition::In(_, values) => {
            let items = values
                .iter()
                .map(|v| quote_list_item(&scalar(v)))
                .collect::<Vec<_>>()
                .join(",");
            format!("in.({})", items)
        }
        // Sent as-is; the query string encoder escapes `%` and `\`
        Condition::ILike(_, pattern) => format!("ilike.{}", pattern),
        Condition::IsNull(_) => "is.null".to_string(),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn quote_list_item(item: &str) -> String {
    if item.contains(&[',', '(', ')', '"', ' '][..]) {
        format!("\"{}\"", item.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        item.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QUESTIONS;

    #[test]
    fn builds_postgrest_filters() {
        let query = Query::table(QUESTIONS)
            .eq("area", "Direito Civil")
            .eq("year", 2023)
            .ilike("statement", "%usucapião%")
            .lt("questions_answered", 4)
            .order_by("year", false)
            .order_by("number", true)
            .limit(20)
            .offset(40);

        let params = query_params(&query);
        assert_eq!(
            params,
            vec![
                ("area".to_string(), "eq.Direito Civil".to_string()),
                ("year".to_string(), "eq.2023".to_string()),
                ("statement".to_string(), "ilike.%usucapião%".to_string()),
                ("questions_answered".to_string(), "lt.4".to_string()),
                ("order".to_string(), "year.desc,number.asc".to_string()),
                ("limit".to_string(), "20".to_string()),
                ("offset".to_string(), "40".to_string()),
            ]
        );
    }

    #[test]
    fn in_lists_quote_reserved_characters() {
        let query = Query::table(QUESTIONS).is_in("area", ["Civil", "Ética, Estatuto"]);
        let params = query_params(&query);
        assert_eq!(params[0].1, "in.(Civil,\"Ética, Estatuto\")");
    }

    #[test]
    fn null_checks_use_is_operator() {
        let query = Query::table("study_sessions").is_null("completed_at");
        assert_eq!(query_params(&query)[0].1, "is.null");
    }

    #[test]
    fn status_codes_map_to_error_kinds() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "jwt expired".into()),
            StoreError::Unauthorized(_)
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, String::new()),
            StoreError::Conflict(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, String::new()),
            StoreError::Rejected { status: 502, .. }
        ));
    }

    #[test]
    fn base_url_gets_rest_prefix() {
        let store =
            RestStore::new("https://abc.supabase.co", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.url("questions").unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/questions"
        );
        assert_eq!(
            store.url("rpc/toggle_favorite").unwrap().as_str(),
            "https://abc.supabase.co/rest/v1/rpc/toggle_favorite"
        );
    }
}
