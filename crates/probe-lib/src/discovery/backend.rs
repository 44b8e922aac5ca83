//! Prometheus HTTP API query client
//!
//! Only instant vectors are accepted. Every other result type is reported
//! as an error so the task can skip that query.

use super::{async_trait, QueryClient};
use crate::error::QueryError;
use crate::models::RawSample;
use anyhow::Context;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const QUERY_PATH: &str = "api/v1/query";

/// Query client for one Prometheus-compatible server
pub struct PrometheusClient {
    name: String,
    client: Client,
    endpoint: Url,
}

impl PrometheusClient {
    /// Create a client for the server at `base_url`
    pub fn new(name: impl Into<String>, base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base = Url::parse(base_url).context("Invalid server URL")?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(QUERY_PATH).context("Invalid query path")?;

        Ok(Self {
            name: name.into(),
            client,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait]
impl QueryClient for PrometheusClient {
    async fn query(&self, query: &str) -> Result<Vec<RawSample>, QueryError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|source| QueryError::Transport {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| QueryError::Transport {
                endpoint: self.endpoint.to_string(),
                source,
            })?;

        // Prometheus reports query errors with 4xx/5xx and a JSON body
        match parse_response(&body) {
            Err(QueryError::Decode(_)) if !status.is_success() => Err(QueryError::Status {
                status: status.as_u16(),
                body,
            }),
            result => result,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    data: Option<ApiData>,
    error_type: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiData {
    result_type: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

/// Decode a Prometheus query API body into raw samples
pub fn parse_response(body: &str) -> Result<Vec<RawSample>, QueryError> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| QueryError::Decode(e.to_string()))?;

    if response.status != "success" {
        return Err(QueryError::Backend {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            error: response.error.unwrap_or_default(),
        });
    }

    let data = response
        .data
        .ok_or_else(|| QueryError::Decode("missing data".to_string()))?;

    if data.result_type != "vector" {
        return Err(QueryError::UnsupportedResultType(data.result_type));
    }

    let samples: Vec<VectorSample> =
        serde_json::from_value(data.result).map_err(|e| QueryError::Decode(e.to_string()))?;

    samples
        .into_iter()
        .map(|s| {
            Ok(RawSample {
                labels: s.metric,
                value: parse_value(&s.value.1)?,
            })
        })
        .collect()
}

fn parse_value(text: &str) -> Result<f64, QueryError> {
    match text {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse()
            .map_err(|_| QueryError::Decode(format!("invalid sample value {:?}", text))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const VECTOR_BODY: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                {"metric": {"instance": "10.0.0.1:8080", "job": "cart"}, "value": [1700000000.1, "12.5"]},
                {"metric": {"instance": "10.0.0.2:8080"}, "value": [1700000000.1, "NaN"]}
            ]
        }
    }"#;

    #[test]
    fn test_parse_vector_response() {
        let samples = parse_response(VECTOR_BODY).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].labels["job"], "cart");
        assert_eq!(samples[0].value, 12.5);
        assert!(samples[1].value.is_nan());
    }

    #[test]
    fn test_parse_rejects_matrix() {
        let body = r#"{"status":"success","data":{"resultType":"matrix","result":[]}}"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedResultType(t) if t == "matrix"));
    }

    #[test]
    fn test_parse_backend_error() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, QueryError::Backend { error_type, .. } if error_type == "bad_data"));
    }

    #[test]
    fn test_parse_infinities() {
        assert_eq!(parse_value("+Inf").unwrap(), f64::INFINITY);
        assert_eq!(parse_value("-Inf").unwrap(), f64::NEG_INFINITY);
        assert!(parse_value("abc").is_err());
    }

    #[tokio::test]
    async fn test_query_sends_instant_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/prom/api/v1/query")
            .match_query(Matcher::UrlEncoded(
                "query".into(),
                "rate(http_requests_total[1m])".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(VECTOR_BODY)
            .create_async()
            .await;

        let client = PrometheusClient::new(
            "prom-1",
            &format!("{}/prom", server.url()),
            Duration::from_secs(5),
        )
        .unwrap();

        let samples = client.query("rate(http_requests_total[1m])").await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(client.name(), "prom-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_query_reports_http_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v1/query")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("service unavailable")
            .create_async()
            .await;

        let client =
            PrometheusClient::new("prom-1", &server.url(), Duration::from_secs(5)).unwrap();

        let err = client.query("up").await.unwrap_err();
        assert!(matches!(err, QueryError::Status { status: 503, .. }));
    }
}
