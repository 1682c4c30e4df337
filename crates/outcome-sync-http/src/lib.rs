//! HTTP transport for Outcome Sync
//!
//! [`HttpRemoteClient`] implements [`RemoteClient`] over reqwest:
//! - REST calls against `{base_url}{path}` with bearer authentication
//! - GraphQL documents POSTed to `{base_url}/api/graphql`
//! - Non-2xx answers surface as [`ClientError::Status`] with the raw body

#![warn(unreachable_pub)]

use async_trait::async_trait;
use outcome_sync_core::{ClientError, RemoteClient};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// Environment variable consulted when the config carries no token
pub const TOKEN_ENV: &str = "OUTCOME_SYNC_TOKEN";

/// GraphQL endpoint path
pub const GRAPHQL_PATH: &str = "/api/graphql";

fn default_timeout_secs() -> u64 {
    30
}

/// Connection settings for [`HttpRemoteClient`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// LMS root, e.g. `https://school.instructure.com`
    pub base_url: String,
    /// Bearer token; falls back to [`TOKEN_ENV`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ClientConfig {
    /// Create config for a base URL
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    /// With bearer token
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Token from config, else from the environment
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(TOKEN_ENV).ok())
            .filter(|t| !t.is_empty())
    }
}

/// reqwest-backed [`RemoteClient`]
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl HttpRemoteClient {
    /// Build client; the base URL must be absolute http(s)
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ClientError::InvalidUrl(config.base_url.clone()));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(transport)?;

        Ok(Self {
            base_url,
            token: config.resolve_token(),
            http,
        })
    }

    /// Base URL without trailing slash
    #[inline]
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Value, ClientError> {
        let response = self.authorized(request).send().await.map_err(|e| {
            tracing::warn!("{} failed in transport: {}", operation, e);
            transport(e)
        })?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        tracing::debug!("{} answered {}", operation, status.as_u16());

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(format!("{operation}: {e}")))
    }
}

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

/// Split a GraphQL response into `data` or its request-level errors
fn graphql_data(mut body: Value) -> Result<Value, ClientError> {
    let messages: Vec<String> = body
        .get("errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .map(|e| match e.get("message").and_then(Value::as_str) {
                    Some(message) => message.to_string(),
                    None => e.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    if !messages.is_empty() {
        return Err(ClientError::GraphQl(messages));
    }
    match body.get_mut("data") {
        Some(data) => Ok(data.take()),
        None => Err(ClientError::Decode("graphql response without data".into())),
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
        operation: &str,
    ) -> Result<Value, ClientError> {
        tracing::debug!("GET {} ({})", path, operation);
        self.send(self.http.get(self.url(path)).query(params), operation)
            .await
    }

    async fn put(&self, path: &str, body: Value, operation: &str) -> Result<Value, ClientError> {
        tracing::debug!("PUT {} ({})", path, operation);
        self.send(self.http.put(self.url(path)).json(&body), operation)
            .await
    }

    async fn graphql(
        &self,
        query: &str,
        variables: Value,
        operation: &str,
    ) -> Result<Value, ClientError> {
        tracing::debug!("POST {} ({})", GRAPHQL_PATH, operation);
        let payload = json!({ "query": query, "variables": variables });
        let body = self
            .send(self.http.post(self.url(GRAPHQL_PATH)).json(&payload), operation)
            .await?;
        graphql_data(body)
    }
}
