use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::frame::{FieldColumn, FieldType, Value};

use super::{QueryExecutor, QueryRequest, QueryResult, ResultSet};

/// HTTP-based query executor.
///
/// POSTs the batch to the backend and decodes a columnar JSON result set:
///
/// ```json
/// {"results": {"A": {"fields": [{"name": "x", "type": "number", "values": [1, 2]}]}}}
/// ```
pub struct HttpExecutor {
    http: reqwest::Client,
    url: String,
}

impl HttpExecutor {
    /// Create a new executor for the configured backend.
    pub fn new(cfg: &EndpointConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            url: cfg.url.clone(),
        })
    }
}

// --- JSON wire structures ---

#[derive(Serialize)]
struct ApiRequest<'a> {
    queries: Vec<ApiQuery<'a>>,
}

#[derive(Serialize)]
struct ApiQuery<'a> {
    id: &'a str,
    query: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: HashMap<String, ApiResult>,
}

#[derive(Deserialize)]
struct ApiResult {
    #[serde(default)]
    fields: Vec<ApiField>,
}

#[derive(Deserialize)]
struct ApiField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    values: Vec<serde_json::Value>,
}

impl QueryExecutor for HttpExecutor {
    async fn execute(&self, request: &QueryRequest) -> Result<ResultSet> {
        let body = ApiRequest {
            queries: request
                .subscriptions
                .iter()
                .map(|s| ApiQuery {
                    id: &s.id,
                    query: &s.query,
                })
                .collect(),
        };

        debug!(queries = body.queries.len(), "executing query batch");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("unexpected status {status} from {}: {text}", self.url);
        }

        let api: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("decoding response from {}", self.url))?;

        let mut results = ResultSet::with_capacity(api.results.len());
        for (id, result) in api.results {
            let fields = result
                .fields
                .into_iter()
                .map(|f| convert_field(&id, f))
                .collect::<Result<Vec<_>>>()?;
            results.insert(id, QueryResult::new(fields));
        }

        Ok(results)
    }
}

/// Convert one wire field into a typed column, dropping JSON nulls.
fn convert_field(subscription_id: &str, field: ApiField) -> Result<FieldColumn> {
    let field_type = FieldType::from_name(&field.field_type).with_context(|| {
        format!(
            "subscription {subscription_id}: unknown field type {:?} for field {:?}",
            field.field_type, field.name
        )
    })?;

    let mut values = Vec::with_capacity(field.values.len());
    for raw in field.values {
        match convert_value(raw, field_type) {
            Some(value) => values.push(value),
            None => debug!(
                subscription = subscription_id,
                field = %field.name,
                "dropping null value",
            ),
        }
    }

    Ok(FieldColumn::new(field.name, field_type, values))
}

/// Convert a JSON scalar according to the declared field type.
///
/// Returns None for JSON null. Values that do not match the declared type are
/// carried as text and left to the buffer's coercion rules.
fn convert_value(raw: serde_json::Value, field_type: FieldType) -> Option<Value> {
    match raw {
        serde_json::Value::Null => None,
        serde_json::Value::Number(n) => match field_type {
            FieldType::Time => Some(Value::Time(n.as_i64().unwrap_or_else(|| {
                n.as_f64().unwrap_or_default() as i64
            }))),
            _ => Some(Value::Number(n.as_f64().unwrap_or_default())),
        },
        serde_json::Value::String(s) => Some(Value::Text(s)),
        serde_json::Value::Bool(b) => Some(Value::Text(b.to_string())),
        other => Some(Value::Text(other.to_string())),
    }
}
