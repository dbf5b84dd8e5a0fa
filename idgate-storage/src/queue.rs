//! Durable offline queue of mutating requests.
//!
//! Requests that could not reach the backend are stored here and replayed
//! later with [`RequestQueue::drain`]. The queue is bounded; when it is full
//! the oldest entry is dropped.

use crate::backend::{KeyValueStore, MemoryStore};
use chrono::{DateTime, Utc};
use idgate_core::identifier::{generate_request_id, now_utc};
use idgate_core::HttpMethod;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Default maximum number of queued requests.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

/// Storage key for the persisted queue.
pub const QUEUE_STORAGE_KEY: &str = "offline_queue";

/// A request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique id.
    pub id: String,
    /// Target URL or API path.
    pub url: String,
    /// HTTP method.
    pub method: HttpMethod,
    /// JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// When the request was queued.
    pub enqueued_at: DateTime<Utc>,
}

/// Outcome of a [`RequestQueue::drain`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Ids replayed successfully and removed.
    pub replayed: Vec<String>,
    /// Ids whose replay failed; they remain queued.
    pub failed: Vec<String>,
}

impl DrainReport {
    /// Whether every entry was replayed.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Bounded FIFO of [`QueuedRequest`]s persisted to a [`KeyValueStore`].
pub struct RequestQueue {
    backend: Arc<dyn KeyValueStore>,
    max_size: usize,
    entries: Mutex<VecDeque<QueuedRequest>>,
    drain_lock: Mutex<()>,
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("max_size", &self.max_size)
            .finish_non_exhaustive()
    }
}

impl RequestQueue {
    /// A queue that lives only in memory.
    pub fn in_memory(max_size: usize) -> Self {
        Self::with_entries(Arc::new(MemoryStore::new()), max_size, VecDeque::new())
    }

    fn with_entries(
        backend: Arc<dyn KeyValueStore>,
        max_size: usize,
        entries: VecDeque<QueuedRequest>,
    ) -> Self {
        Self {
            backend,
            max_size: max_size.max(1),
            entries: Mutex::new(entries),
            drain_lock: Mutex::new(()),
        }
    }

    /// Open a queue over `backend`, loading persisted entries.
    ///
    /// A missing, unreadable or corrupt queue starts empty.
    pub async fn open(backend: Arc<dyn KeyValueStore>, max_size: usize) -> Self {
        let mut entries = match backend.get(QUEUE_STORAGE_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<VecDeque<QueuedRequest>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, "Offline queue is corrupt, starting empty");
                    VecDeque::new()
                }
            },
            Ok(None) => VecDeque::new(),
            Err(e) => {
                warn!(error = %e, "Offline queue storage unavailable, starting empty");
                VecDeque::new()
            }
        };

        let max_size = max_size.max(1);
        while entries.len() > max_size {
            entries.pop_front();
        }
        debug!(entries = entries.len(), max_size, "Offline queue opened");
        Self::with_entries(backend, max_size, entries)
    }

    /// Maximum number of entries kept.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Queue a request. Evicts the oldest entries beyond the size limit.
    pub async fn enqueue(
        &self,
        url: impl Into<String>,
        method: HttpMethod,
        body: Option<serde_json::Value>,
    ) -> QueuedRequest {
        let request = QueuedRequest {
            id: generate_request_id(),
            url: url.into(),
            method,
            body,
            enqueued_at: now_utc(),
        };

        let mut entries = self.entries.lock().await;
        entries.push_back(request.clone());
        while entries.len() > self.max_size {
            if let Some(evicted) = entries.pop_front() {
                warn!(
                    evicted = %evicted.id,
                    url = %evicted.url,
                    max_size = self.max_size,
                    "Offline queue full, dropping oldest request"
                );
            }
        }
        info!(id = %request.id, method = %request.method, url = %request.url, "Queued request for replay");
        self.persist(&entries).await;
        request
    }

    /// Snapshot of all entries, oldest first.
    pub async fn list(&self) -> Vec<QueuedRequest> {
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Number of entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Remove an entry by id. Returns whether it was present.
    pub async fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            self.persist(&entries).await;
        }
        removed
    }

    /// Remove every entry.
    pub async fn clear(&self) {
        let mut entries = self.entries.lock().await;
        entries.clear();
        self.persist(&entries).await;
    }

    /// Replay every entry in order.
    ///
    /// Entries whose replay succeeds are removed. A failed replay leaves its
    /// entry queued and moves on to the next one. Concurrent drains run one
    /// after the other.
    pub async fn drain<F, Fut, E>(&self, mut replay: F) -> DrainReport
    where
        F: FnMut(QueuedRequest) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let _draining = self.drain_lock.lock().await;
        let mut report = DrainReport::default();

        for request in self.list().await {
            let id = request.id.clone();
            match replay(request).await {
                Ok(()) => {
                    self.remove(&id).await;
                    debug!(id = %id, "Replayed queued request");
                    report.replayed.push(id);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Replay failed, keeping request queued");
                    report.failed.push(id);
                }
            }
        }

        if !report.replayed.is_empty() || !report.failed.is_empty() {
            info!(
                replayed = report.replayed.len(),
                failed = report.failed.len(),
                "Offline queue drained"
            );
        }
        report
    }

    async fn persist(&self, entries: &VecDeque<QueuedRequest>) {
        let result = match serde_json::to_string(entries) {
            Ok(json) => self.backend.set(QUEUE_STORAGE_KEY, &json).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(error = %e, "Could not persist offline queue, keeping it in memory");
        }
    }
}
