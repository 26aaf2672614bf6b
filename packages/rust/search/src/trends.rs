//! Trend lookup over HTTP.
//!
//! Request: `POST {endpoint}` with `{"keywords": ["a", "b"]}`.
//! Response: `{"trends": {"a": {"volume": 120, "rising": true}}}`.
//! Keywords the service has no data for are omitted from the result.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use pencraft_shared::{Capability, PencraftError, Result, TrendLookup, TrendSignal};

use super::{build_client, transport_error};

#[derive(Debug, Serialize)]
struct TrendRequest<'a> {
    keywords: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TrendResponse {
    #[serde(default)]
    trends: HashMap<String, TrendSignal>,
}

#[derive(Debug, Clone)]
pub struct TrendClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl TrendClient {
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        Ok(Self {
            http: build_client(timeout)?,
            endpoint: endpoint.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl TrendLookup for TrendClient {
    #[instrument(skip_all, fields(keywords = keywords.len()))]
    async fn trends(&self, keywords: &[String]) -> Result<HashMap<String, TrendSignal>> {
        if keywords.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(&TrendRequest { keywords })
            .send()
            .await
            .map_err(|e| transport_error(Capability::Trends, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PencraftError::unavailable(
                Capability::Trends,
                format!("{}: HTTP {status}", self.endpoint),
            ));
        }

        let parsed: TrendResponse = response
            .json()
            .await
            .map_err(|e| PencraftError::parse(format!("invalid trend response: {e}")))?;

        let signals: HashMap<String, TrendSignal> = parsed
            .trends
            .into_iter()
            .filter(|(k, _)| keywords.contains(k))
            .collect();
        debug!(found = signals.len(), "trend lookup complete");
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_requested_keywords_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/trends"))
            .and(body_json(serde_json::json!({"keywords": ["rust", "tokio"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "trends": {
                    "rust": {"volume": 900, "rising": true},
                    "unrequested": {"volume": 1, "rising": false}
                }
            })))
            .mount(&server)
            .await;

        let client = TrendClient::new(&format!("{}/trends", server.uri()), 5).unwrap();
        let result = client
            .trends(&["rust".to_string(), "tokio".to_string()])
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(
            result["rust"],
            TrendSignal {
                volume: 900,
                rising: true
            }
        );
    }

    #[tokio::test]
    async fn empty_keywords_skip_request() {
        let client = TrendClient::new("http://127.0.0.1:9/unused", 1).unwrap();
        assert!(client.trends(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_error_is_trends_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = TrendClient::new(&server.uri(), 5).unwrap();
        let err = client.trends(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("trends unavailable"));
    }
}
