//! PostgREST-style HTTP client for the hosted database

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde_json::Value;
use spadesk_util::{AppError, Result};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Query, RemoteDatabase, Row};

/// Connection settings for [`RestDatabase`]
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project base URL, without the `/rest/v1` suffix
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Hosted database reached over its REST interface
pub struct RestDatabase {
    client: Client,
    config: RestConfig,
}

impl RestDatabase {
    pub fn new(config: RestConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| AppError::external(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/rest/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            table
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.config.api_key)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::ACCEPT, "application/json")
    }

    async fn send(&self, op: &str, table: &str, request: RequestBuilder) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        debug!(op, table, status = %status, "Remote response");

        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, &body, retry_after);
        warn!(op, table, status = %status, error = %err, "Remote request failed");
        Err(err)
    }

    async fn rows(response: Response) -> Result<Vec<Row>> {
        let value: Value = response
            .json()
            .await
            .map_err(|e| AppError::external(format!("invalid response body: {}", e)))?;

        match value {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|(column, value)| (column.clone(), format!("eq.{}", filter_value(value))))
        .collect();

    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".into(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }

    params
}

fn classify_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        AppError::network(e.to_string())
    } else if e.is_decode() {
        AppError::external(e.to_string())
    } else {
        AppError::unknown(e.to_string())
    }
}

/// Map an HTTP failure to the error taxonomy
pub fn classify_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> AppError {
    let snippet: String = body.chars().take(200).collect();
    let message = format!("HTTP {}: {}", status.as_u16(), snippet);

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AppError::authentication(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            let err = AppError::network(message);
            match retry_after {
                Some(delay) => err.with_backoff(delay),
                None => err,
            }
        }
        StatusCode::CONFLICT => AppError::database(message).not_retryable(),
        s if s.is_server_error() => {
            let err = AppError::database(message);
            match retry_after {
                Some(delay) => err.with_backoff(delay),
                None => err,
            }
        }
        _ => AppError::validation(message),
    }
}

#[async_trait]
impl RemoteDatabase for RestDatabase {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query_params(query));

        let request = self.client.get(self.table_url(table)).query(&params);
        let response = self.send("select", table, request).await?;
        Self::rows(response).await
    }

    async fn insert(&self, table: &str, row: &Row) -> Result<Row> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(row);
        let response = self.send("insert", table, request).await?;
        Ok(Self::rows(response)
            .await?
            .into_iter()
            .next()
            .unwrap_or_else(|| row.clone()))
    }

    async fn update(&self, table: &str, id: &str, patch: &Row) -> Result<Row> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(patch);
        let response = self.send("update", table, request).await?;

        Self::rows(response).await?.into_iter().next().ok_or_else(|| {
            AppError::database(format!("{} row {} not found", table, id)).not_retryable()
        })
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[("id", format!("eq.{}", id))]);
        self.send("delete", table, request).await?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let request = self.authorized(self.client.get(format!(
            "{}/rest/v1/",
            self.config.base_url.trim_end_matches('/')
        )));

        match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spadesk_util::ErrorKind;

    #[test]
    fn status_classification() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "", None).kind,
            ErrorKind::Authentication
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "bad column", None).kind,
            ErrorKind::Validation
        );

        let conflict = classify_status(StatusCode::CONFLICT, "duplicate key", None);
        assert_eq!(conflict.kind, ErrorKind::Database);
        assert!(!conflict.is_retryable());

        let unavailable = classify_status(StatusCode::SERVICE_UNAVAILABLE, "", None);
        assert!(unavailable.is_retryable());

        let throttled =
            classify_status(StatusCode::TOO_MANY_REQUESTS, "", Some(Duration::from_secs(3)));
        assert_eq!(throttled.kind, ErrorKind::Network);
        assert_eq!(throttled.suggested_backoff(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn query_params_use_postgrest_syntax() {
        let query = Query::new()
            .eq("status", "available")
            .eq("session_count", 2)
            .order_by("name")
            .limit(10);

        let params = query_params(&query);
        assert_eq!(
            params,
            vec![
                ("status".to_string(), "eq.available".to_string()),
                ("session_count".to_string(), "eq.2".to_string()),
                ("order".to_string(), "name.asc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
        assert_eq!(filter_value(&json!(true)), "true");
    }

    #[test]
    fn table_url_strips_trailing_slash() {
        let db = RestDatabase::new(RestConfig {
            base_url: "https://desk.example.co/".into(),
            api_key: "key".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        assert_eq!(db.table_url("rooms"), "https://desk.example.co/rest/v1/rooms");
    }
}
