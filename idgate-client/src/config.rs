//! Client configuration.

use idgate_core::{ApiError, Result};
use idgate_retries::RetryConfig;
use std::time::Duration;
use url::Url;

/// Default per-call transport timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window for [`AuthSession::is_expiring_soon`](crate::AuthSession::is_expiring_soon).
pub const DEFAULT_EXPIRY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Configuration for [`ApiClient`](crate::ApiClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL every API path is resolved against.
    pub base_url: Url,
    /// Timeout applied to each transport call.
    pub timeout: Duration,
    /// Login endpoint path.
    pub login_path: String,
    /// Token refresh endpoint path.
    pub refresh_path: String,
    /// Current-user endpoint path.
    pub me_path: String,
    /// Retry policy applied to every call.
    pub retry: RetryConfig,
    /// Refresh before sending when the access token expires within this window.
    pub proactive_refresh: Option<Duration>,
    /// User-Agent header.
    pub user_agent: String,
}

impl ClientConfig {
    /// Create a config for `base_url` with default endpoints.
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            timeout: DEFAULT_TIMEOUT,
            login_path: "auth/login".to_string(),
            refresh_path: "auth/refresh".to_string(),
            me_path: "auth/me".to_string(),
            retry: RetryConfig::for_api(),
            proactive_refresh: None,
            user_agent: format!("idgate/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Parse `base_url` and create a config.
    pub fn parse(base_url: &str) -> Result<Self> {
        let url = Url::parse(base_url)
            .map_err(|e| ApiError::Configuration(format!("invalid base URL {base_url:?}: {e}")))?;
        Ok(Self::new(url))
    }

    /// Load from the environment.
    ///
    /// Reads `IDGATE_BASE_URL` (required), `IDGATE_TIMEOUT_SECS` and
    /// `IDGATE_MAX_ATTEMPTS`.
    pub fn from_env() -> Result<Self> {
        let base = std::env::var("IDGATE_BASE_URL")
            .map_err(|_| ApiError::Configuration("IDGATE_BASE_URL is not set".into()))?;
        let mut config = Self::parse(&base)?;

        if let Some(secs) = env_number::<u64>("IDGATE_TIMEOUT_SECS")? {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_number::<u32>("IDGATE_MAX_ATTEMPTS")? {
            config.retry = config.retry.max_attempts(attempts);
        }
        Ok(config)
    }

    /// Set the transport timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the login endpoint path.
    #[must_use]
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Set the refresh endpoint path.
    #[must_use]
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Set the current-user endpoint path.
    #[must_use]
    pub fn me_path(mut self, path: impl Into<String>) -> Self {
        self.me_path = path.into();
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Refresh ahead of time when the access token expires within `window`.
    #[must_use]
    pub fn proactive_refresh(mut self, window: Duration) -> Self {
        self.proactive_refresh = Some(window);
        self
    }

    /// Set the User-Agent header.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Resolve an API path against the base URL.
    ///
    /// Absolute URLs are accepted only on the base URL's origin, so the bearer
    /// token never reaches another host.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            let url = Url::parse(path)
                .map_err(|e| ApiError::Configuration(format!("invalid URL {path:?}: {e}")))?;
            if url.origin() != self.base_url.origin() {
                return Err(ApiError::Configuration(format!(
                    "URL {path:?} is outside {}",
                    self.base_url.origin().ascii_serialization()
                )));
            }
            return Ok(url);
        }
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Configuration(format!("invalid path {path:?}: {e}")))
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ApiError::Configuration(format!("{key} must be a number, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_resolution_keeps_base_path() {
        let config = ClientConfig::parse("https://dedupe.example.com/api/v1").unwrap();
        assert_eq!(
            config.endpoint("/applications").unwrap().as_str(),
            "https://dedupe.example.com/api/v1/applications"
        );
        assert_eq!(
            config.endpoint("auth/login").unwrap().as_str(),
            "https://dedupe.example.com/api/v1/auth/login"
        );
    }

    #[test]
    fn test_absolute_urls_must_share_origin() {
        let config = ClientConfig::parse("https://dedupe.example.com/api/").unwrap();
        assert_eq!(
            config
                .endpoint("https://dedupe.example.com/files/42")
                .unwrap()
                .as_str(),
            "https://dedupe.example.com/files/42"
        );
        assert!(matches!(
            config.endpoint("https://other.example.com/x"),
            Err(ApiError::Configuration(_))
        ));
        assert!(matches!(
            config.endpoint("http://dedupe.example.com/api/x"),
            Err(ApiError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            ClientConfig::parse("not a url"),
            Err(ApiError::Configuration(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::parse("http://localhost:8000")
            .unwrap()
            .timeout(Duration::from_secs(5))
            .login_path("api/token")
            .proactive_refresh(Duration::from_secs(60));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.login_path, "api/token");
        assert_eq!(config.proactive_refresh, Some(Duration::from_secs(60)));
        assert_eq!(config.retry.max_attempts, 3);
    }
}
