//! # idgate - Authenticated API client for the identity backend
//!
//! idgate talks to the REST + JWT backend of the identity deduplication
//! platform. It keeps the session alive on its own: bearer tokens are
//! attached to every call, an expired access token is refreshed once no
//! matter how many calls noticed it, transient failures are retried with
//! exponential backoff, and writes that cannot reach the backend wait in a
//! durable offline queue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use idgate::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> idgate::Result<()> {
//!     idgate::init_tracing();
//!
//!     let session = idgate::open_session(ClientConfig::from_env()?).await?;
//!     let user = session.login(&Credentials::new("admin", "secret")).await?;
//!     println!("logged in as {} ({:?})", user.username, user.role);
//!
//!     let page: Page<serde_json::Value> = session
//!         .client()
//!         .get_page("/applications", &PageQuery::new().page_size(50))
//!         .await?;
//!     println!("{} applications", page.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`idgate_core`] - errors, JWT claims, wire models
//! - [`idgate_retries`] - retry policy and backoff
//! - [`idgate_storage`] - token store and offline request queue
//! - [`idgate_client`] - HTTP client core and auth session
//!
//! ## Feature Flags
//!
//! | Feature | Description | Default |
//! |---------|-------------|--------|
//! | `subscriber` | [`init_tracing`] via `tracing-subscriber` | ✅ |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::path::PathBuf;
use std::sync::Arc;

use idgate_storage::{KeyValueStore, MemoryStore};
use tracing::warn;

/// Errors, JWT claims, and wire models.
pub use idgate_core as core;

/// Retry policy.
pub use idgate_retries as retries;

/// Token store and offline queue.
pub use idgate_storage as storage;

/// HTTP client and session.
pub use idgate_client as client;

pub use idgate_client::{ApiClient, AuthEvent, AuthSession, ClientConfig};
pub use idgate_core::{ApiError, Credentials, Page, PageQuery, Result, UserProfile, UserRole};
pub use idgate_retries::RetryConfig;
pub use idgate_storage::{FileStore, RequestQueue, TokenStore};

/// Open a session whose tokens and offline queue persist in the platform
/// data directory.
///
/// Tokens left by a previous run are picked up, so the user stays logged in
/// across restarts until the refresh token is rejected. On platforms without
/// a data directory the session keeps everything in memory.
pub async fn open_session(config: ClientConfig) -> Result<AuthSession> {
    session_in(FileStore::default_dir(), config).await
}

async fn session_in(dir: Option<PathBuf>, config: ClientConfig) -> Result<AuthSession> {
    let backend: Arc<dyn KeyValueStore> = match dir {
        Some(dir) => Arc::new(FileStore::new(dir)),
        None => {
            warn!("No local data directory, keeping tokens and offline queue in memory");
            Arc::new(MemoryStore::new())
        }
    };
    let tokens = Arc::new(TokenStore::open(backend.clone()).await);
    let queue = Arc::new(
        RequestQueue::open(backend, idgate_storage::DEFAULT_MAX_QUEUE_SIZE).await,
    );
    let client = ApiClient::new(config, tokens)?.with_offline_queue(queue);
    Ok(AuthSession::new(Arc::new(client)))
}

/// Install a `tracing-subscriber` formatter filtered by `RUST_LOG`
/// (default `info`).
///
/// Does nothing if a global subscriber is already set.
#[cfg(feature = "subscriber")]
#[cfg_attr(docsrs, doc(cfg(feature = "subscriber")))]
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Prelude for common imports.
///
/// ```rust
/// use idgate::prelude::*;
/// ```
pub mod prelude {
    // Errors
    pub use crate::core::{ApiError, Result};

    // Models
    pub use crate::core::{
        Credentials, HttpMethod, Page, PageQuery, TokenPair, UserProfile, UserRole,
    };

    // Client
    pub use crate::client::{ApiClient, AuthEvent, AuthSession, ClientConfig};

    // Retries
    pub use crate::retries::{RetryConfig, WaitStrategy};

    // Storage
    pub use crate::storage::{DrainReport, FileStore, KeyValueStore, RequestQueue, TokenStore};
}
