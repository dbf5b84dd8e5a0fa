//! HTTP transport.
//!
//! A [`Transport`] sends one request and reports whatever the backend
//! answered; classifying the status is the client's job. Only failures where
//! no response arrived are errors here.

use async_trait::async_trait;
use idgate_core::{ApiError, HttpMethod, Result};
use reqwest::header::{HeaderMap, ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A single HTTP request.
#[derive(Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Fully resolved URL.
    pub url: Url,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// Bearer token for the Authorization header.
    pub bearer: Option<String>,
}

impl ApiRequest {
    /// Create a request without body or credentials.
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            query: Vec::new(),
            body: None,
            bearer: None,
        }
    }

    /// Set the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Option<serde_json::Value>) -> Self {
        self.body = body;
        self
    }

    /// Set query parameters.
    #[must_use]
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .field("authenticated", &self.bearer.is_some())
            .finish()
    }
}

/// What the backend answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
    /// Retry-After header value.
    pub retry_after: Option<Duration>,
}

impl ApiResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turn a non-2xx response into the matching [`ApiError`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(
                self.status,
                &self.body,
                self.retry_after,
            ))
        }
    }

    /// Decode the JSON body. An empty body decodes as `null`.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if self.body.trim().is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends requests to the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request.
    ///
    /// Returns the response for any HTTP status; fails with
    /// [`ApiError::Network`] only when no response was received.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

/// [`Transport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a per-call timeout.
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        debug!(method = %request.method, url = %request.url, "Making HTTP request");

        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url.clone())
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(network_error)?;

        debug!(status, url = %request.url, "Received HTTP response");
        Ok(ApiResponse {
            status,
            body,
            retry_after,
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn network_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Network(format!("request timed out: {err}"))
    } else if err.is_connect() {
        ApiError::Network(format!("connection failed: {err}"))
    } else {
        ApiError::Network(err.to_string())
    }
}

/// Parse a Retry-After header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
