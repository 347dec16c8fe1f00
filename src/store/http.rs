//! HTTP client for the hosted store's admin API
//!
//! Two endpoints are used:
//!
//! - `POST {base}/admin/query` with `{ "query": { "<ns>": { "$": { "where": {...} } } } }`
//! - `POST {base}/admin/transact` with `{ "steps": [["update", ns, id, attrs], ["delete", ns, id]] }`
//!
//! Creates are sent as `update` steps; the store upserts on update.

use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{Entity, EntityStore, EntityType, Filter};
use crate::error::{ReconcileError, Result};
use crate::operation::{Operation, OperationKind};

/// Connection settings for [`HttpStore`]
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub app_id: String,
    pub admin_token: String,
    pub timeout: Duration,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.instantdb.com".to_string(),
            app_id: String::new(),
            admin_token: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Admin API client; one instance is built at startup and shared by all passes
pub struct HttpStore {
    config: HttpStoreConfig,
    client: Client,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", config.admin_token))
                .map_err(|_| ReconcileError::Config("admin token is not a valid header value".into()))?,
        );
        headers.insert(
            "app-id",
            header::HeaderValue::from_str(&config.app_id)
                .map_err(|_| ReconcileError::Config("app id is not a valid header value".into()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/admin/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(path))
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(path = path, "Store rate limit hit");
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ReconcileError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

/// Build the query body for one namespace
pub(crate) fn query_body(entity_type: EntityType, filter: Option<&Filter>) -> Value {
    let clause = match filter {
        Some(f) if !f.clauses.is_empty() => json!({ "$": { "where": f.to_where() } }),
        _ => json!({}),
    };
    json!({ "query": { entity_type.namespace(): clause } })
}

/// Translate operations into transact steps
pub(crate) fn transact_body(operations: &[Operation]) -> Value {
    let steps: Vec<Value> = operations
        .iter()
        .map(|op| match op.kind {
            OperationKind::Create | OperationKind::Update => json!([
                "update",
                op.entity_type.namespace(),
                op.id,
                op.attrs.clone().unwrap_or_default()
            ]),
            OperationKind::Delete => json!(["delete", op.entity_type.namespace(), op.id]),
        })
        .collect();
    json!({ "steps": steps })
}

#[async_trait::async_trait]
impl EntityStore for HttpStore {
    async fn query(&self, entity_type: EntityType, filter: Option<&Filter>) -> Result<Vec<Entity>> {
        let filter_label = filter.map(ToString::to_string).unwrap_or_else(|| "<none>".to_string());
        let to_query_error = |message: String| ReconcileError::Query {
            entity_type,
            filter: filter_label.clone(),
            message,
        };

        let body = query_body(entity_type, filter);
        let mut response = self
            .post("query", &body)
            .await
            .map_err(|e| to_query_error(e.to_string()))?;

        let rows = response
            .get_mut(entity_type.namespace())
            .map(Value::take)
            .ok_or_else(|| to_query_error("namespace missing from response".to_string()))?;

        let entities: Vec<Entity> =
            serde_json::from_value(rows).map_err(|e| to_query_error(e.to_string()))?;

        debug!(entity_type = %entity_type, count = entities.len(), "Query returned");
        Ok(entities)
    }

    async fn transact(&self, operations: &[Operation]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }
        let body = transact_body(operations);
        self.post("transact", &body)
            .await
            .map_err(|e| ReconcileError::Transact(e.to_string()))?;
        Ok(())
    }
}
