//! # idgate-client
//!
//! Authenticated REST client for the idgate identity backend.
//!
//! [`ApiClient`] attaches the stored access token to every call. When the
//! backend answers 401 it refreshes the token once, no matter how many calls
//! were rejected at the same time, and replays each call with the new token.
//! Transient failures are retried with exponential backoff, and mutating calls
//! that still fail can be parked in an offline queue for later replay.
//!
//! [`AuthSession`] layers login, logout, and the current user on top.
//!
//! ## Example
//!
//! ```rust,no_run
//! use idgate_client::{ApiClient, AuthSession, ClientConfig};
//! use idgate_core::Credentials;
//! use idgate_storage::TokenStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> idgate_core::Result<()> {
//! let config = ClientConfig::parse("https://dedupe.example.com/api/v1")?;
//! let client = Arc::new(ApiClient::new(config, Arc::new(TokenStore::in_memory()))?);
//! let session = AuthSession::new(client.clone());
//!
//! let user = session.login(&Credentials::new("jane", "secret")).await?;
//! println!("logged in as {}", user.username);
//!
//! let stats: serde_json::Value = client.get("/dashboard/stats").await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod events;
pub mod session;
pub mod single_flight;
pub mod transport;

pub use client::ApiClient;
pub use config::{ClientConfig, DEFAULT_EXPIRY_WINDOW, DEFAULT_TIMEOUT};
pub use events::AuthEvent;
pub use session::AuthSession;
pub use single_flight::SingleFlight;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
