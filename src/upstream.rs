//! Clients for the public datasets behind the analytics endpoints.
//!
//! * openFDA drug labels (`/drug/label.json`)
//! * openFDA adverse-event reports (`/drug/event.json`, totals only)
//! * CMS Part D spending by drug (tabular rows, no schema contract)

use crate::document::RawDocument;
use crate::error::{snippet, AnalyticsError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

pub const LABELS: &str = "openFDA labels";
pub const EVENTS: &str = "openFDA events";
pub const EXPOSURE: &str = "CMS Part D";

/// Everything the pipelines need from the outside world.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Drug-label records, optionally filtered by an openFDA `search` clause.
    async fn fetch_labels(&self, search: Option<&str>, limit: usize) -> Result<Vec<RawDocument>>;

    /// Raw rows of the exposure dataset.
    async fn fetch_exposure_rows(&self) -> Result<Vec<Value>>;

    /// Total adverse-event reports matching an openFDA `search` clause.
    async fn count_events(&self, search: &str) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub label_url: String,
    pub event_url: String,
    pub exposure_url: String,
    pub api_key: Option<String>,
}

/// [`DataSource`] over HTTP with a per-request timeout.
pub struct HttpDataSource {
    client: Client,
    endpoints: Endpoints,
    timeout: Duration,
}

impl HttpDataSource {
    pub fn new(endpoints: Endpoints, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rxsignals/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalyticsError::UpstreamUnavailable {
                source_name: "http client",
                status: None,
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoints,
            timeout,
        })
    }

    fn with_api_key(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoints.api_key {
            Some(key) => request.query(&[("api_key", key)]),
            None => request,
        }
    }

    fn transport_error(&self, source_name: &'static str, err: reqwest::Error) -> AnalyticsError {
        if err.is_timeout() {
            AnalyticsError::UpstreamTimeout {
                source_name,
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            AnalyticsError::UpstreamUnavailable {
                source_name,
                status: None,
                details: snippet(&err.to_string()),
            }
        }
    }

    /// Send `request` and parse a JSON body out of a 2xx response.
    async fn fetch_json(&self, source_name: &'static str, request: RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(source_name, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(source_name, e))?;

        if !status.is_success() {
            return Err(AnalyticsError::UpstreamUnavailable {
                source_name,
                status: Some(status.as_u16()),
                details: snippet(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| AnalyticsError::UpstreamShapeInvalid {
            source_name,
            details: format!("invalid JSON ({e}): {}", snippet(&body)),
        })
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_labels(&self, search: Option<&str>, limit: usize) -> Result<Vec<RawDocument>> {
        let mut request = self
            .client
            .get(&self.endpoints.label_url)
            .query(&[("limit", limit.to_string())]);
        if let Some(search) = search {
            request = request.query(&[("search", search)]);
        }

        let body = self.fetch_json(LABELS, self.with_api_key(request)).await?;
        label_documents(body)
    }

    async fn fetch_exposure_rows(&self) -> Result<Vec<Value>> {
        let request = self.client.get(&self.endpoints.exposure_url);
        let body = self.fetch_json(EXPOSURE, request).await?;
        exposure_rows(body)
    }

    async fn count_events(&self, search: &str) -> Result<u64> {
        let request = self
            .client
            .get(&self.endpoints.event_url)
            .query(&[("search", search), ("limit", "1")]);

        let body = self.fetch_json(EVENTS, self.with_api_key(request)).await?;
        event_total(&body)
    }
}

/// Objects under `results`; non-object entries are dropped.
pub fn label_documents(body: Value) -> Result<Vec<RawDocument>> {
    match body {
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(results)) => {
                Ok(results.into_iter().filter_map(RawDocument::from_value).collect())
            }
            _ => Err(AnalyticsError::UpstreamShapeInvalid {
                source_name: LABELS,
                details: "missing `results` array".to_string(),
            }),
        },
        _ => Err(AnalyticsError::UpstreamShapeInvalid {
            source_name: LABELS,
            details: "expected a JSON object".to_string(),
        }),
    }
}

/// Rows from either a bare array or an object wrapping one under `data`.
pub fn exposure_rows(body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(rows) => Ok(rows),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => Ok(rows),
            _ => Err(AnalyticsError::UpstreamShapeInvalid {
                source_name: EXPOSURE,
                details: "expected an array of rows".to_string(),
            }),
        },
        _ => Err(AnalyticsError::UpstreamShapeInvalid {
            source_name: EXPOSURE,
            details: "expected an array of rows".to_string(),
        }),
    }
}

/// `meta.results.total` of an event search.
pub fn event_total(body: &Value) -> Result<u64> {
    body.pointer("/meta/results/total")
        .and_then(Value::as_u64)
        .ok_or_else(|| AnalyticsError::UpstreamShapeInvalid {
            source_name: EVENTS,
            details: "missing meta.results.total".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_documents() {
        let body = json!({
            "meta": {"results": {"total": 2}},
            "results": [{"drug_interactions": ["x"]}, "junk", {"warnings": "y"}]
        });
        let docs = label_documents(body).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].field_text("drug_interactions"), "x");
    }

    #[test]
    fn test_label_documents_rejects_bad_shape() {
        let err = label_documents(json!({"error": {"code": "NOT_FOUND"}})).unwrap_err();
        assert_eq!(err.kind(), "upstream_shape_invalid");
        assert!(label_documents(json!([1, 2])).is_err());
    }

    #[test]
    fn test_exposure_rows_shapes() {
        assert_eq!(exposure_rows(json!([{"a": 1}])).unwrap().len(), 1);
        assert_eq!(exposure_rows(json!({"data": [{"a": 1}, {"a": 2}]})).unwrap().len(), 2);
        assert!(exposure_rows(json!({"rows": []})).is_err());
        assert!(exposure_rows(json!("nope")).is_err());
    }

    #[test]
    fn test_event_total() {
        assert_eq!(event_total(&json!({"meta": {"results": {"total": 1523}}})).unwrap(), 1523);
        assert!(event_total(&json!({"results": []})).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let source = HttpDataSource::new(
            Endpoints {
                label_url: "http://127.0.0.1:9/label.json".to_string(),
                event_url: "http://127.0.0.1:9/event.json".to_string(),
                exposure_url: "http://127.0.0.1:9/data".to_string(),
                api_key: None,
            },
            Duration::from_secs(2),
        )
        .unwrap();

        let err = source.fetch_exposure_rows().await.unwrap_err();
        assert!(matches!(
            err,
            AnalyticsError::UpstreamUnavailable { status: None, .. } | AnalyticsError::UpstreamTimeout { .. }
        ));
    }
}
