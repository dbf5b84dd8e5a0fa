//! Authenticated API client.
//!
//! Every call goes through the same pipeline:
//!
//! 1. attach the current access token
//! 2. send
//! 3. on 401, refresh the token once (single-flight across all callers) and
//!    replay the request with the new token
//! 4. on network errors, 5xx and 429, retry with backoff
//! 5. if a mutating request still fails transiently, park it in the offline
//!    queue (when one is configured)

use crate::config::ClientConfig;
use crate::events::{AuthEvent, EVENT_CHANNEL_CAPACITY};
use crate::single_flight::SingleFlight;
use crate::transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
use chrono::Utc;
use idgate_core::{
    jwt, ApiError, HttpMethod, Page, PageQuery, RefreshRequest, Result, TokenKind, TokenPair,
    TokenResponse,
};
use idgate_retries::with_retry;
use idgate_storage::{DrainReport, RequestQueue, TokenStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

/// REST client that authenticates, refreshes, retries, and queues.
///
/// Construct one per process and share it behind an `Arc`.
pub struct ApiClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    queue: Option<Arc<RequestQueue>>,
    refresh: SingleFlight<String, ApiError>,
    events: broadcast::Sender<AuthEvent>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.config.base_url.as_str())
            .field("tokens", &self.tokens)
            .field("offline_queue", &self.queue.is_some())
            .field("refresh", &self.refresh)
            .finish()
    }
}

impl ApiClient {
    /// Create a client using the reqwest transport.
    pub fn new(config: ClientConfig, tokens: Arc<TokenStore>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.timeout, &config.user_agent)?;
        Ok(Self::with_transport(config, Arc::new(transport), tokens))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            transport,
            tokens,
            queue: None,
            refresh: SingleFlight::new(),
            events,
        }
    }

    /// Park failed mutating requests in `queue`.
    #[must_use]
    pub fn with_offline_queue(mut self, queue: Arc<RequestQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Token store shared with the session.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Offline queue, if configured.
    pub fn offline_queue(&self) -> Option<&Arc<RequestQueue>> {
        self.queue.as_ref()
    }

    /// Subscribe to authentication events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Whether a token refresh is in flight.
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_in_flight()
    }

    pub(crate) fn emit(&self, event: AuthEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// GET `path` and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(HttpMethod::Get, path, Vec::new(), None).await
    }

    /// GET `path` with query parameters.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<T> {
        self.request(HttpMethod::Get, path, query, None).await
    }

    /// GET one page of a list endpoint.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &PageQuery,
    ) -> Result<Page<T>> {
        self.request(HttpMethod::Get, path, query.to_pairs(), None)
            .await
    }

    /// POST a JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(HttpMethod::Post, path, Vec::new(), Some(body))
            .await
    }

    /// PUT a JSON body.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(HttpMethod::Put, path, Vec::new(), Some(body))
            .await
    }

    /// PATCH a JSON body.
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        self.request(HttpMethod::Patch, path, Vec::new(), Some(body))
            .await
    }

    /// DELETE `path`.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(HttpMethod::Delete, path, Vec::new(), None)
            .await
    }

    /// Run the full pipeline and decode the JSON body.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        self.execute(method, path, query, body).await?.json()
    }

    /// Run the full pipeline and return the raw response.
    ///
    /// A mutating request that still fails with a transient error after all
    /// retries is queued when an offline queue is configured, and the call
    /// fails with [`ApiError::Queued`].
    pub async fn execute(
        &self,
        method: HttpMethod,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse> {
        let target = with_query_string(path, &query);
        match self.dispatch(method, path, query, body.clone()).await {
            Err(error) if method.is_mutating() && error.is_transient() => match &self.queue {
                Some(queue) => {
                    let queued = queue.enqueue(target, method, body).await;
                    Err(ApiError::Queued {
                        id: queued.id,
                        reason: error.to_string(),
                    })
                }
                None => Err(error),
            },
            other => other,
        }
    }

    /// Replay every queued request. Returns `None` without an offline queue.
    pub async fn replay_offline_queue(&self) -> Option<DrainReport> {
        let queue = self.queue.as_ref()?;
        let report = queue
            .drain(|request| async move {
                self.dispatch(request.method, &request.url, Vec::new(), request.body)
                    .await
                    .map(|_| ())
            })
            .await;
        Some(report)
    }

    /// Refresh the access token, joining a refresh already in flight.
    ///
    /// On failure the tokens are cleared and
    /// [`AuthEvent::ReauthenticationRequired`] is broadcast.
    pub async fn refresh_access_token(&self) -> Result<String> {
        let refresh = RefreshTask {
            transport: self.transport.clone(),
            tokens: self.tokens.clone(),
            url: self.config.endpoint(&self.config.refresh_path)?,
            events: self.events.clone(),
        };
        self.refresh.run(move || refresh.run()).await
    }

    /// POST without credentials or refresh handling; used for login.
    pub(crate) async fn post_unauthenticated<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.config.endpoint(path)?;
        let request =
            ApiRequest::new(HttpMethod::Post, url).with_body(Some(serde_json::to_value(body)?));
        with_retry(&self.config.retry, || self.send_once(request.clone()))
            .await?
            .json()
    }

    /// Retry and refresh, without queueing.
    async fn dispatch(
        &self,
        method: HttpMethod,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    ) -> Result<ApiResponse> {
        let url = self.config.endpoint(path)?;
        let request = ApiRequest::new(method, url)
            .with_query(query)
            .with_body(body);
        with_retry(&self.config.retry, || self.send_authorized(request.clone())).await
    }

    async fn send_authorized(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.refresh_if_expiring().await;

        let token = self.tokens.get(TokenKind::Access);
        match self
            .send_once(request.clone().with_bearer(token.clone()))
            .await
        {
            Err(ApiError::Unauthorized(_)) => {
                debug!(method = %request.method, url = %request.url, "Access token rejected");
                let fresh = self.token_after_rejection(token.as_deref()).await?;
                match self.send_once(request.clone().with_bearer(Some(fresh))).await {
                    Err(ApiError::Unauthorized(message)) => {
                        warn!(
                            method = %request.method,
                            url = %request.url,
                            "Request rejected again after token refresh"
                        );
                        Err(ApiError::AuthExpired(message))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn send_once(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.transport.send(request).await?.error_for_status()
    }

    /// Token to replay a request with after `stale` was rejected.
    async fn token_after_rejection(&self, stale: Option<&str>) -> Result<String> {
        match (self.tokens.get(TokenKind::Access), stale) {
            (Some(current), stale) if stale != Some(current.as_str()) => {
                debug!("Access token already rotated, replaying with current token");
                Ok(current)
            }
            (None, Some(_)) => Err(ApiError::AuthExpired(
                "session ended while the request was in flight".into(),
            )),
            _ => self.refresh_access_token().await,
        }
    }

    async fn refresh_if_expiring(&self) {
        let Some(window) = self.config.proactive_refresh else {
            return;
        };
        if self.tokens.get(TokenKind::Refresh).is_none() {
            return;
        }
        let Some(expires_at) = self
            .tokens
            .get(TokenKind::Access)
            .and_then(|token| jwt::expires_at(&token).ok())
        else {
            return;
        };
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        if expires_at > Utc::now() + window {
            return;
        }

        debug!(%expires_at, "Access token expiring soon, refreshing ahead of request");
        if let Err(e) = self.refresh_access_token().await {
            warn!(error = %e, "Proactive token refresh failed");
        }
    }
}

/// One refresh cycle, owned so it can outlive the caller that started it.
struct RefreshTask {
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    url: Url,
    events: broadcast::Sender<AuthEvent>,
}

impl RefreshTask {
    async fn run(self) -> Result<String> {
        let Some(refresh_token) = self.tokens.get(TokenKind::Refresh) else {
            warn!("No refresh token available");
            return Err(self.end_session("no refresh token available").await);
        };

        let generation = self.tokens.generation();
        debug!(url = %self.url, "Refreshing access token");
        let body = serde_json::to_value(RefreshRequest {
            refresh_token: refresh_token.clone(),
        })?;
        let request = ApiRequest::new(HttpMethod::Post, self.url.clone()).with_body(Some(body));
        let outcome = match self.transport.send(request).await {
            Ok(response) => response
                .error_for_status()
                .and_then(|r| r.json::<TokenResponse>()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(issued) => {
                let pair = TokenPair {
                    access_token: issued.access_token,
                    refresh_token: issued.refresh_token.or(Some(refresh_token)),
                };
                if !self.tokens.set_pair_if_generation(generation, &pair).await {
                    info!("Session ended during token refresh, discarding new tokens");
                    return Err(ApiError::AuthExpired(
                        "session ended during refresh".to_string(),
                    ));
                }
                info!("Access token refreshed");
                let _ = self.events.send(AuthEvent::TokenRefreshed);
                Ok(pair.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                Err(self
                    .end_session(&format!("token refresh failed: {e}"))
                    .await)
            }
        }
    }

    async fn end_session(&self, reason: &str) -> ApiError {
        self.tokens.clear().await;
        let _ = self.events.send(AuthEvent::ReauthenticationRequired {
            reason: reason.to_string(),
        });
        ApiError::AuthExpired(reason.to_string())
    }
}

fn with_query_string(path: &str, query: &[(String, String)]) -> String {
    if query.is_empty() {
        return path.to_string();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query)
        .finish();
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}{encoded}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use idgate_retries::RetryConfig;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<ApiResponse>>>,
        sent: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        fn push(&self, status: u16, body: &str) {
            self.responses.lock().push_back(Ok(ApiResponse {
                status,
                body: body.to_string(),
                retry_after: None,
            }));
        }

        fn push_network_error(&self) {
            self.responses
                .lock()
                .push_back(Err(ApiError::network("connection refused")));
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
            self.sent.lock().push(request);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::network("script exhausted")))
        }
    }

    fn token(seconds_from_now: i64) -> String {
        jwt::encode_unsigned(&serde_json::json!({ "exp": Utc::now().timestamp() + seconds_from_now }))
    }

    fn client(transport: Arc<ScriptedTransport>) -> ApiClient {
        let config = ClientConfig::parse("http://backend.test/api")
            .unwrap()
            .retry(RetryConfig::new().max_attempts(2).fixed(Duration::from_millis(1)));
        ApiClient::with_transport(config, transport, Arc::new(TokenStore::in_memory()))
    }

    #[test]
    fn test_with_query_string() {
        assert_eq!(with_query_string("/a", &[]), "/a");
        assert_eq!(
            with_query_string(
                "/identities",
                &[
                    ("page".into(), "2".into()),
                    ("search".into(), "jane doe".into())
                ]
            ),
            "/identities?page=2&search=jane+doe"
        );
    }

    #[tokio::test]
    async fn test_bearer_attached() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(200, r#"{"ok": true}"#);
        let client = client(transport.clone());
        client.tokens().set(TokenKind::Access, "a1").await;

        let body: serde_json::Value = client.get("/health").await.unwrap();
        assert_eq!(body["ok"], true);

        let sent = transport.sent.lock();
        assert_eq!(sent[0].bearer.as_deref(), Some("a1"));
        assert_eq!(sent[0].url.as_str(), "http://backend.test/api/health");
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_auth_expired() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(401, "");
        transport.push(200, r#"{"access_token": "a2"}"#);
        transport.push(401, r#"{"detail": "inactive user"}"#);
        let client = client(transport.clone());
        client
            .tokens()
            .set_pair(&TokenPair::new("a1", Some("r1".into())))
            .await;

        let result: Result<serde_json::Value> = client.get("/applications").await;
        assert_eq!(result, Err(ApiError::AuthExpired("inactive user".into())));
        assert_eq!(transport.sent.lock().len(), 3);
        assert_eq!(client.tokens().get(TokenKind::Access).as_deref(), Some("a2"));
        assert_eq!(client.tokens().get(TokenKind::Refresh).as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_missing_refresh_token_ends_session() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(401, "");
        let client = client(transport.clone());
        let mut events = client.subscribe();
        client.tokens().set(TokenKind::Access, "a1").await;

        let result: Result<serde_json::Value> = client.get("/applications").await;
        assert!(matches!(result, Err(ApiError::AuthExpired(_))));
        assert!(client.tokens().get(TokenKind::Access).is_none());
        assert!(matches!(
            events.try_recv(),
            Ok(AuthEvent::ReauthenticationRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_mutation_queued_after_network_failures() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_network_error();
        transport.push_network_error();
        let queue = Arc::new(RequestQueue::in_memory(10));
        let client = client(transport.clone()).with_offline_queue(queue.clone());

        let result: Result<serde_json::Value> = client
            .post("/identities/9/merge", &serde_json::json!({"into": 4}))
            .await;
        let (id, reason) = match result {
            Err(ApiError::Queued { id, reason }) => (id, reason),
            other => panic!("expected queued error, got {other:?}"),
        };
        assert!(reason.contains("connection refused"));

        let queued = queue.list().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].id, id);
        assert_eq!(queued[0].url, "/identities/9/merge");
        assert_eq!(queued[0].method, HttpMethod::Post);

        transport.push(204, "");
        let report = client.replay_offline_queue().await.unwrap();
        assert_eq!(report.replayed, vec![id]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_reads_are_never_queued() {
        let transport = Arc::new(ScriptedTransport::default());
        let queue = Arc::new(RequestQueue::in_memory(10));
        let client = client(transport).with_offline_queue(queue.clone());

        let result: Result<serde_json::Value> = client.get("/applications").await;
        assert!(matches!(result, Err(ApiError::Network(_))));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_client_errors_not_queued_or_retried() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(422, r#"{"detail": "threshold must be between 0 and 1"}"#);
        let queue = Arc::new(RequestQueue::in_memory(10));
        let client = client(transport.clone()).with_offline_queue(queue.clone());

        let result: Result<serde_json::Value> = client
            .put("/settings", &serde_json::json!({"threshold": 3}))
            .await;
        assert!(matches!(result, Err(ApiError::Client { status: 422, .. })));
        assert_eq!(transport.sent.lock().len(), 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_proactive_refresh() {
        let transport = Arc::new(ScriptedTransport::default());
        let fresh = token(3600);
        transport.push(200, &format!(r#"{{"access_token": "{fresh}"}}"#));
        transport.push(200, "[]");

        let config = ClientConfig::parse("http://backend.test/")
            .unwrap()
            .proactive_refresh(Duration::from_secs(300));
        let client = ApiClient::with_transport(
            config,
            transport.clone(),
            Arc::new(TokenStore::in_memory()),
        );
        client
            .tokens()
            .set_pair(&TokenPair::new(token(60), Some("r1".into())))
            .await;

        let _: Vec<u32> = client.get("/audit-logs").await.unwrap();

        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].url.path().ends_with("auth/refresh"));
        assert_eq!(sent[1].bearer.as_deref(), Some(fresh.as_str()));
    }
}
