//! Wire models shared by the client and the storage layer.

use crate::errors::Result;
use crate::jwt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Login credentials. Never persisted.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Which token a store slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    /// Short-lived bearer token.
    Access,
    /// Long-lived token used to obtain new access tokens.
    Refresh,
}

impl TokenKind {
    /// Storage key for this kind.
    pub fn key(&self) -> &'static str {
        match self {
            TokenKind::Access => "access_token",
            TokenKind::Refresh => "refresh_token",
        }
    }

    /// All kinds.
    pub const ALL: [TokenKind; 2] = [TokenKind::Access, TokenKind::Refresh];
}

/// Token response returned by the login and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Bearer token.
    pub access_token: String,
    /// Refresh token, when the backend issues one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type, normally `bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Access and refresh tokens held by the client.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Bearer token.
    pub access_token: String,
    /// Refresh token.
    pub refresh_token: Option<String>,
}

impl TokenPair {
    /// Create a token pair.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// Expiry derived from the access token's `exp` claim.
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        jwt::expires_at(&self.access_token)
    }
}

impl From<TokenResponse> for TokenPair {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
        }
    }
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Body of the refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// The refresh token.
    pub refresh_token: String,
}

/// Role of an admin panel user.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Regular operator.
    #[default]
    User,
    /// Administrator.
    Admin,
    /// Administrator who can manage other administrators.
    Superadmin,
}

/// Profile of the logged-in user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id.
    pub id: serde_json::Value,
    /// Username.
    pub username: String,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Role.
    #[serde(default)]
    pub role: UserRole,
    /// Whether the account is active.
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Any other fields the backend returns.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl UserProfile {
    /// Whether the user holds at least `role`.
    pub fn has_role(&self, role: UserRole) -> bool {
        self.role >= role
    }
}

/// HTTP methods the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Whether requests with this method change server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get)
    }

    /// Method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: u64,
    /// 1-based page number.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
    /// Total number of pages.
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Whether a later page exists.
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }

    /// Whether an earlier page exists.
    pub fn has_previous(&self) -> bool {
        self.page > 1
    }
}

/// Paging and filter parameters for list endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    /// 1-based page number.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
    /// Additional filter parameters.
    pub filters: BTreeMap<String, String>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: 20,
            filters: BTreeMap::new(),
        }
    }
}

impl PageQuery {
    /// Create a query for the first page.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the page number (minimum 1).
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    /// Set the page size (minimum 1).
    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add a filter. Empty values are ignored.
    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.filters.insert(key.into(), value);
        }
        self
    }

    /// Query pairs in the order the backend expects.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        pairs.extend(self.filters.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_token_response_defaults() {
        let resp: TokenResponse =
            serde_json::from_value(json!({ "access_token": "abc", "token_type": "bearer" }))
                .unwrap();
        let pair = TokenPair::from(resp);
        assert_eq!(pair.access_token, "abc");
        assert!(pair.refresh_token.is_none());
    }

    #[test]
    fn test_user_profile_roles() {
        let profile: UserProfile = serde_json::from_value(json!({
            "id": 7,
            "username": "root",
            "role": "superadmin",
            "last_login": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(profile.has_role(UserRole::Admin));
        assert!(profile.is_active);
        assert!(profile.extra.contains_key("last_login"));

        let plain: UserProfile =
            serde_json::from_value(json!({ "id": "u2", "username": "op" })).unwrap();
        assert_eq!(plain.role, UserRole::User);
        assert_eq!(UserRole::default(), UserRole::User);
        assert!(!plain.has_role(UserRole::Admin));
    }

    #[test]
    fn test_method_mutating() {
        assert!(!HttpMethod::Get.is_mutating());
        assert!(HttpMethod::Post.is_mutating());
        assert!(HttpMethod::Delete.is_mutating());
        assert_eq!(serde_json::to_value(HttpMethod::Patch).unwrap(), json!("PATCH"));
    }

    #[test]
    fn test_page_query_pairs() {
        let query = PageQuery::new()
            .page(0)
            .page_size(50)
            .filter("status", "pending")
            .filter("search", "");
        assert_eq!(
            query.to_pairs(),
            vec![
                ("page".to_string(), "1".to_string()),
                ("page_size".to_string(), "50".to_string()),
                ("status".to_string(), "pending".to_string()),
            ]
        );
    }

    #[test]
    fn test_page_navigation() {
        let page: Page<u32> = serde_json::from_value(json!({
            "items": [1, 2],
            "total": 5,
            "page": 2,
            "page_size": 2,
            "total_pages": 3
        }))
        .unwrap();
        assert!(page.has_next());
        assert!(page.has_previous());
    }
}
