//! Login state on top of [`ApiClient`].

use crate::client::ApiClient;
use crate::config::DEFAULT_EXPIRY_WINDOW;
use crate::events::AuthEvent;
use chrono::Utc;
use idgate_core::{
    jwt, ApiError, Credentials, Result, TokenKind, TokenPair, TokenResponse, UserProfile, UserRole,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Authentication session manager.
///
/// Owns the logged-in user's profile and drives the token lifecycle
/// through the shared [`ApiClient`].
#[derive(Debug)]
pub struct AuthSession {
    client: Arc<ApiClient>,
    user: RwLock<Option<UserProfile>>,
}

impl AuthSession {
    /// Create a session over `client`. Tokens already in its store are kept.
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            user: RwLock::new(None),
        }
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Subscribe to authentication events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.client.subscribe()
    }

    /// Exchange credentials for tokens and load the user's profile.
    ///
    /// A 401 from the login endpoint fails with
    /// [`ApiError::InvalidCredentials`]. Other failures keep their own
    /// category (`Network`, `Server`, `RateLimited`, `Client`). If the profile
    /// cannot be loaded the freshly stored tokens are discarded again.
    pub async fn login(&self, credentials: &Credentials) -> Result<UserProfile> {
        let config = self.client.config();
        let issued: TokenResponse = self
            .client
            .post_unauthenticated(&config.login_path, credentials)
            .await
            .map_err(|e| {
                let e = match e {
                    ApiError::Unauthorized(_) => ApiError::InvalidCredentials,
                    other => other,
                };
                warn!(username = %credentials.username, error = %e, "Login failed");
                e
            })?;

        self.client.tokens().set_pair(&TokenPair::from(issued)).await;

        let user: UserProfile = match self.client.get(&config.me_path).await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "Could not load profile after login, discarding tokens");
                self.client.tokens().clear().await;
                return Err(e);
            }
        };

        info!(username = %user.username, role = ?user.role, "Logged in");
        *self.user.write() = Some(user.clone());
        self.client.emit(AuthEvent::LoggedIn {
            username: user.username.clone(),
        });
        Ok(user)
    }

    /// Forget tokens and the cached profile. Safe to call when logged out.
    pub async fn logout(&self) {
        let was_logged_in = self.client.tokens().get(TokenKind::Access).is_some()
            || self.user.read().is_some();
        self.client.tokens().clear().await;
        *self.user.write() = None;
        if was_logged_in {
            info!("Logged out");
        }
        self.client.emit(AuthEvent::LoggedOut);
    }

    /// Refresh the access token now.
    pub async fn refresh(&self) -> Result<()> {
        self.client.refresh_access_token().await.map(|_| ())
    }

    /// Reload the profile of the logged-in user.
    pub async fn reload_user(&self) -> Result<UserProfile> {
        let user: UserProfile = self.client.get(&self.client.config().me_path).await?;
        debug!(username = %user.username, "Reloaded profile");
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    /// Whether a stored access token exists and has not expired.
    pub fn is_authenticated(&self) -> bool {
        self.client
            .tokens()
            .get(TokenKind::Access)
            .is_some_and(|token| jwt::is_valid_at(&token, Utc::now()))
    }

    /// Whether the access token expires within the next five minutes.
    ///
    /// Also true when there is no token or it cannot be decoded.
    pub fn is_expiring_soon(&self) -> bool {
        self.is_expiring_within(DEFAULT_EXPIRY_WINDOW)
    }

    /// Whether the access token expires within `window`.
    pub fn is_expiring_within(&self, window: Duration) -> bool {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return true;
        };
        let token = self.client.tokens().get(TokenKind::Access);
        jwt::expires_within(token.as_deref(), window, Utc::now())
    }

    /// Profile of the logged-in user.
    ///
    /// `None` once the tokens are gone, even if a profile was loaded earlier.
    pub fn current_user(&self) -> Option<UserProfile> {
        self.client.tokens().get(TokenKind::Access)?;
        self.user.read().clone()
    }

    /// Whether the current user holds at least `role`.
    pub fn has_role(&self, role: UserRole) -> bool {
        self.current_user().is_some_and(|user| user.has_role(role))
    }

    /// Whether the current user is an admin or superadmin.
    pub fn is_admin(&self) -> bool {
        self.has_role(UserRole::Admin)
    }
}
