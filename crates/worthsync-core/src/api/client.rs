//! API client for the net-worth backend.
//!
//! Retries are handled by the revalidator; each method here is a single
//! attempt bounded by the configured request timeout.

use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::keys;

/// Body of `PUT /api/settings/<name>`.
#[derive(Debug, Serialize)]
struct SettingUpdate<'a> {
    key: &'a str,
    value: &'a Value,
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    origin: Url,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let timeout = config.request_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            origin: config.origin_url()?,
            timeout,
        })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolve a cache key (an origin-relative path) to a full URL.
    pub fn endpoint(&self, key: &str) -> Result<Url, SyncError> {
        self.origin
            .join(key)
            .map_err(|e| SyncError::Config(format!("invalid resource path {:?}: {}", key, e)))
    }

    fn request_error(&self, err: reqwest::Error) -> SyncError {
        SyncError::from_request(err, self.timeout)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, SyncError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SyncError::from_status(status, &body))
        }
    }

    /// `GET` the resource behind `key` and decode it as JSON.
    pub async fn get_json(&self, key: &str) -> Result<Value, SyncError> {
        let url = self.endpoint(key)?;
        debug!(url = %url, "GET");

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = Self::check_response(response).await?;

        let body = response.text().await.map_err(|e| self.request_error(e))?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, key: &str, body: &B) -> Result<Value, SyncError> {
        let url = self.endpoint(key)?;
        debug!(url = %url, "PUT");

        let response = self
            .client
            .put(url)
            .header(header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = Self::check_response(response).await?;

        let body = response.text().await.map_err(|e| self.request_error(e))?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn fetch_dashboard(&self) -> Result<Value, SyncError> {
        self.get_json(&keys::dashboard()).await
    }

    pub async fn fetch_history(&self, range: &str) -> Result<Value, SyncError> {
        self.get_json(&keys::history(range)).await
    }

    pub async fn fetch_budgets(&self) -> Result<Value, SyncError> {
        self.get_json(&keys::budgets()).await
    }

    pub async fn fetch_income(&self) -> Result<Value, SyncError> {
        self.get_json(&keys::income()).await
    }

    pub async fn fetch_setting(&self, name: &str) -> Result<Value, SyncError> {
        self.get_json(&keys::setting(name)).await
    }

    pub async fn fetch_risk_metrics(&self) -> Result<Value, SyncError> {
        self.get_json(&keys::risk_metrics()).await
    }

    pub async fn fetch_alerts(&self) -> Result<Value, SyncError> {
        self.get_json(&keys::alerts()).await
    }

    /// Store a user setting. The caller is responsible for revalidating the
    /// setting's key afterwards.
    pub async fn update_setting(&self, name: &str, value: &Value) -> Result<Value, SyncError> {
        self.put_json(&keys::setting(name), &SettingUpdate { key: name, value })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(origin: &str) -> ApiClient {
        let config = SyncConfig {
            origin: origin.to_string(),
            ..SyncConfig::default()
        };
        ApiClient::new(&config).unwrap()
    }

    #[test]
    fn test_endpoint_resolves_keys_against_origin() {
        let api = client("https://money.example.com");
        assert_eq!(
            api.endpoint(&keys::dashboard()).unwrap().as_str(),
            "https://money.example.com/api/dashboard/"
        );
        assert_eq!(
            api.endpoint(&keys::history("1y")).unwrap().as_str(),
            "https://money.example.com/api/stats/history?range=1y"
        );
    }

    #[test]
    fn test_endpoint_ignores_origin_path() {
        // Keys are absolute paths, so a trailing page path never leaks in
        let api = client("http://localhost:3001/dashboard/overview");
        assert_eq!(
            api.endpoint(&keys::alerts()).unwrap().as_str(),
            "http://localhost:3001/api/alerts/"
        );
    }

    #[test]
    fn test_new_rejects_bad_origin() {
        let config = SyncConfig {
            origin: "::".into(),
            ..SyncConfig::default()
        };
        assert!(matches!(ApiClient::new(&config), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_setting_update_body() {
        let value = json!({"currency": "EUR"});
        let body = serde_json::to_value(SettingUpdate {
            key: "display",
            value: &value,
        })
        .unwrap();
        assert_eq!(body, json!({"key": "display", "value": {"currency": "EUR"}}));
    }

    #[tokio::test]
    async fn test_stalled_backend_reports_configured_deadline() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = SyncConfig {
            origin: format!("http://{}", addr),
            request_timeout_ms: 50,
            ..SyncConfig::default()
        };
        let api = ApiClient::new(&config).unwrap();
        let err = api.fetch_dashboard().await.unwrap_err();
        assert_eq!(err, SyncError::Timeout(Duration::from_millis(50)));
        assert_eq!(err.to_string(), "Request timed out after 50ms");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let api = client("http://127.0.0.1:9");
        let err = api.fetch_dashboard().await.unwrap_err();
        assert!(matches!(err, SyncError::Network(_)), "{:?}", err);
        assert!(err.is_retryable());
    }
}
