//! # idgate-storage
//!
//! Durable client-side state for idgate: the token store and the offline
//! request queue, both layered over a pluggable [`KeyValueStore`].
//!
//! Storage is best-effort. A backend that cannot be read or written never
//! fails the caller; the affected component logs the condition and carries on
//! in memory.
//!
//! ## Example
//!
//! ```rust,no_run
//! use idgate_storage::{FileStore, KeyValueStore, RequestQueue, TokenStore};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), idgate_storage::StorageError> {
//! let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::in_default_dir()?);
//! let tokens = TokenStore::open(backend.clone()).await;
//! let queue = RequestQueue::open(backend, 50).await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod queue;
pub mod token;

pub use backend::{FileStore, KeyValueStore, MemoryStore};
pub use error::{StorageError, StorageResult};
pub use queue::{
    DrainReport, QueuedRequest, RequestQueue, DEFAULT_MAX_QUEUE_SIZE, QUEUE_STORAGE_KEY,
};
pub use token::TokenStore;
