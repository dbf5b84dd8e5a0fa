//! Access and refresh token storage.

use crate::backend::{KeyValueStore, MemoryStore};
use idgate_core::{TokenKind, TokenPair};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Holds the client's tokens.
///
/// Reads are served from an in-memory mirror, so `get` is synchronous and
/// never observes a half-applied write. Writes update the mirror and then the
/// durable backend; when the backend fails the store keeps working in memory
/// and logs the degradation.
///
/// Every [`clear`](Self::clear) starts a new generation. A writer that began
/// before the clear can use [`set_pair_if_generation`](Self::set_pair_if_generation)
/// so it cannot bring a dropped session back.
pub struct TokenStore {
    backend: Arc<dyn KeyValueStore>,
    cache: RwLock<HashMap<TokenKind, String>>,
    write_lock: Mutex<()>,
    generation: AtomicU64,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.read();
        f.debug_struct("TokenStore")
            .field("has_access_token", &cache.contains_key(&TokenKind::Access))
            .field("has_refresh_token", &cache.contains_key(&TokenKind::Refresh))
            .finish()
    }
}

impl TokenStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryStore::new()))
    }

    fn with_backend(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Open a store over `backend`, loading any persisted tokens.
    ///
    /// Unreadable entries are skipped and logged.
    pub async fn open(backend: Arc<dyn KeyValueStore>) -> Self {
        let store = Self::with_backend(backend);
        for kind in TokenKind::ALL {
            match store.backend.get(kind.key()).await {
                Ok(Some(value)) => match serde_json::from_str::<String>(&value) {
                    Ok(token) if !token.is_empty() => {
                        store.cache.write().insert(kind, token);
                    }
                    Ok(_) => {}
                    Err(e) => warn!(key = kind.key(), error = %e, "Discarding unreadable token"),
                },
                Ok(None) => {}
                Err(e) => warn!(
                    key = kind.key(),
                    error = %e,
                    "Token storage unavailable, starting with empty in-memory store"
                ),
            }
        }
        debug!(loaded = store.cache.read().len(), "Token store opened");
        store
    }

    /// Current token of `kind`.
    pub fn get(&self, kind: TokenKind) -> Option<String> {
        self.cache.read().get(&kind).cloned()
    }

    /// Both tokens, if an access token is present.
    pub fn pair(&self) -> Option<TokenPair> {
        let cache = self.cache.read();
        cache.get(&TokenKind::Access).map(|access| TokenPair {
            access_token: access.clone(),
            refresh_token: cache.get(&TokenKind::Refresh).cloned(),
        })
    }

    /// Number of times the store has been cleared.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store a token.
    pub async fn set(&self, kind: TokenKind, token: impl Into<String>) {
        let token = token.into();
        let _guard = self.write_lock.lock().await;
        self.cache.write().insert(kind, token.clone());
        self.persist(kind, Some(&token)).await;
    }

    /// Replace both tokens. A pair without a refresh token removes the stored one.
    pub async fn set_pair(&self, pair: &TokenPair) {
        let _guard = self.write_lock.lock().await;
        self.write_pair(pair).await;
    }

    /// Replace both tokens unless the store was cleared after `generation`
    /// was read. Returns whether the pair was written.
    pub async fn set_pair_if_generation(&self, generation: u64, pair: &TokenPair) -> bool {
        let _guard = self.write_lock.lock().await;
        if self.generation() != generation {
            debug!(
                expected = generation,
                current = self.generation(),
                "Token store cleared since read, dropping write"
            );
            return false;
        }
        self.write_pair(pair).await;
        true
    }

    /// Remove all tokens.
    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.write().clear();
        for kind in TokenKind::ALL {
            self.persist(kind, None).await;
        }
    }

    async fn write_pair(&self, pair: &TokenPair) {
        {
            let mut cache = self.cache.write();
            cache.insert(TokenKind::Access, pair.access_token.clone());
            match &pair.refresh_token {
                Some(refresh) => cache.insert(TokenKind::Refresh, refresh.clone()),
                None => cache.remove(&TokenKind::Refresh),
            };
        }
        self.persist(TokenKind::Access, Some(&pair.access_token))
            .await;
        self.persist(TokenKind::Refresh, pair.refresh_token.as_deref())
            .await;
    }

    async fn persist(&self, kind: TokenKind, token: Option<&str>) {
        let result = match token {
            Some(token) => match serde_json::to_string(token) {
                Ok(json) => self.backend.set(kind.key(), &json).await,
                Err(e) => Err(e.into()),
            },
            None => self.backend.remove(kind.key()).await,
        };
        if let Err(e) = result {
            warn!(
                key = kind.key(),
                error = %e,
                "Token storage unavailable, keeping token in memory only"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StorageError, StorageResult};
    use async_trait::async_trait;

    struct BrokenStore;

    #[async_trait]
    impl KeyValueStore for BrokenStore {
        async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        async fn set(&self, _key: &str, _value: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("disk gone".into()))
        }

        async fn remove(&self, _key: &str) -> StorageResult<()> {
            Err(StorageError::Unavailable("disk gone".into()))
        }
    }

    #[tokio::test]
    async fn test_get_set_clear() {
        let store = TokenStore::in_memory();
        assert!(store.get(TokenKind::Access).is_none());

        store.set(TokenKind::Access, "a1").await;
        store.set(TokenKind::Refresh, "r1").await;
        assert_eq!(store.get(TokenKind::Access).as_deref(), Some("a1"));
        assert_eq!(
            store.pair(),
            Some(TokenPair::new("a1", Some("r1".to_string())))
        );

        store.clear().await;
        assert!(store.get(TokenKind::Access).is_none());
        assert!(store.get(TokenKind::Refresh).is_none());
        assert!(store.pair().is_none());
    }

    #[tokio::test]
    async fn test_tokens_survive_reopen() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let store = TokenStore::open(backend.clone()).await;
        store
            .set_pair(&TokenPair::new("a1", Some("r1".to_string())))
            .await;

        let reopened = TokenStore::open(backend.clone()).await;
        assert_eq!(reopened.get(TokenKind::Access).as_deref(), Some("a1"));
        assert_eq!(reopened.get(TokenKind::Refresh).as_deref(), Some("r1"));

        reopened.set_pair(&TokenPair::new("a2", None)).await;
        let again = TokenStore::open(backend).await;
        assert_eq!(again.get(TokenKind::Access).as_deref(), Some("a2"));
        assert!(again.get(TokenKind::Refresh).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_skipped() {
        let backend = Arc::new(MemoryStore::new());
        backend.set("access_token", "{not json").await.unwrap();
        backend.set("refresh_token", "\"r1\"").await.unwrap();

        let store = TokenStore::open(backend).await;
        assert!(store.get(TokenKind::Access).is_none());
        assert_eq!(store.get(TokenKind::Refresh).as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_write_after_clear_is_dropped() {
        let store = TokenStore::in_memory();
        store
            .set_pair(&TokenPair::new("a1", Some("r1".to_string())))
            .await;
        let generation = store.generation();

        store.clear().await;
        assert_eq!(store.generation(), generation + 1);

        let written = store
            .set_pair_if_generation(generation, &TokenPair::new("a2", Some("r2".to_string())))
            .await;
        assert!(!written);
        assert!(store.pair().is_none());

        let written = store
            .set_pair_if_generation(store.generation(), &TokenPair::new("a3", None))
            .await;
        assert!(written);
        assert_eq!(store.pair(), Some(TokenPair::new("a3", None)));
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_memory() {
        let store = TokenStore::open(Arc::new(BrokenStore)).await;
        store.set(TokenKind::Access, "a1").await;
        assert_eq!(store.get(TokenKind::Access).as_deref(), Some("a1"));
        store.clear().await;
        assert!(store.get(TokenKind::Access).is_none());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let store = TokenStore::in_memory();
        store
            .cache
            .write()
            .insert(TokenKind::Access, "secret-token".into());
        let debug = format!("{:?}", store);
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("has_access_token: true"));
    }
}
