//! In-process agent transcript store
//!
//! Transcripts live in a `DashMap` keyed by session ID. Each entry remembers
//! the tenant that created it; a load by any other tenant behaves exactly like
//! a missing session. Idle entries expire after a TTL and the least recently
//! used entry is evicted once the store is full.

use async_trait::async_trait;
use dashmap::DashMap;
use kbgate_core::{
    Error, Result,
    session_store::{SessionStore, Transcript},
    tenant::TenantId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default idle TTL (1 hour)
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// Default maximum number of sessions kept
pub const DEFAULT_SESSION_CAPACITY: usize = 1000;

#[derive(Debug)]
struct Entry {
    tenant_id: TenantId,
    transcript: Transcript,
    last_access: Instant,
}

/// Tenant-aware transcript store held in process memory
#[derive(Debug)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Entry>,
    /// Idle time after which a session is gone
    ttl: Duration,
    /// Maximum number of live sessions
    capacity: usize,
    /// Counter for operations since last cleanup
    ops_since_cleanup: AtomicUsize,
    /// Cleanup every N operations
    cleanup_threshold: usize,
}

impl InMemorySessionStore {
    /// Create a store with default TTL and capacity
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_SESSION_TTL, DEFAULT_SESSION_CAPACITY)
    }

    /// Create a store with a custom TTL and capacity
    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            capacity: capacity.max(1),
            ops_since_cleanup: AtomicUsize::new(0),
            cleanup_threshold: 100,
        }
    }

    fn maybe_cleanup(&self) {
        let ops = self.ops_since_cleanup.fetch_add(1, Ordering::Relaxed);
        if ops >= self.cleanup_threshold {
            self.ops_since_cleanup.store(0, Ordering::Relaxed);
            self.cleanup_expired();
        }
    }

    /// Drop every session idle for longer than the TTL
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.sessions
            .retain(|_, entry| now.duration_since(entry.last_access) < self.ttl);
    }

    /// Evict least recently used sessions until the store fits its capacity.
    /// `keep` is never evicted.
    fn evict_to_capacity(&self, keep: &str) {
        while self.sessions.len() > self.capacity {
            let oldest = self
                .sessions
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().last_access)
                .map(|e| e.key().clone());

            match oldest {
                Some(session_id) => {
                    debug!(session_id = %session_id, "Evicting least recently used session");
                    self.sessions.remove(&session_id);
                }
                None => break,
            }
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, tenant_id: &TenantId, session_id: &str) -> Result<Transcript> {
        self.maybe_cleanup();

        let not_found = || Error::SessionNotFound(session_id.to_string());

        {
            let mut entry = self.sessions.get_mut(session_id).ok_or_else(not_found)?;

            if &entry.tenant_id != tenant_id {
                debug!(session_id = %session_id, "Session belongs to another tenant");
                return Err(not_found());
            }

            if entry.last_access.elapsed() < self.ttl {
                entry.last_access = Instant::now();
                return Ok(entry.transcript.clone());
            }
        }

        // Expired
        self.sessions.remove(session_id);
        Err(not_found())
    }

    async fn save(
        &self,
        tenant_id: &TenantId,
        session_id: &str,
        transcript: Transcript,
    ) -> Result<()> {
        self.maybe_cleanup();

        if let Some(existing) = self.sessions.get(session_id)
            && &existing.tenant_id != tenant_id
        {
            return Err(Error::SessionStore(format!(
                "session '{}' is owned by another tenant",
                session_id
            )));
        }

        self.sessions.insert(
            session_id.to_string(),
            Entry {
                tenant_id: tenant_id.clone(),
                transcript,
                last_access: Instant::now(),
            },
        );

        self.evict_to_capacity(session_id);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbgate_core::model::ChatMessage;
    use std::thread::sleep;

    fn tenant(id: &str) -> TenantId {
        TenantId::parse(id).unwrap()
    }

    fn transcript(text: &str) -> Transcript {
        Transcript {
            messages: vec![ChatMessage::user_text(text)],
        }
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemorySessionStore::new();
        store
            .save(&tenant("tenant-a"), "sess-1", transcript("hello"))
            .await
            .unwrap();

        let loaded = store.load(&tenant("tenant-a"), "sess-1").await.unwrap();
        assert_eq!(loaded, transcript("hello"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let store = InMemorySessionStore::new();
        let err = store.load(&tenant("tenant-a"), "nope").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_cross_tenant_load_is_not_found() {
        let store = InMemorySessionStore::new();
        store
            .save(&tenant("tenant-a"), "sess-1", transcript("secret"))
            .await
            .unwrap();

        let err = store.load(&tenant("tenant-b"), "sess-1").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));

        // Still there for the owner
        assert!(store.load(&tenant("tenant-a"), "sess-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_cross_tenant_overwrite_rejected() {
        let store = InMemorySessionStore::new();
        store
            .save(&tenant("tenant-a"), "sess-1", transcript("a"))
            .await
            .unwrap();

        let err = store
            .save(&tenant("tenant-b"), "sess-1", transcript("b"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionStore(_)));
        assert_eq!(
            store.load(&tenant("tenant-a"), "sess-1").await.unwrap(),
            transcript("a")
        );
    }

    #[tokio::test]
    async fn test_expired_session_is_removed() {
        let store = InMemorySessionStore::with_limits(Duration::from_millis(50), 10);
        store
            .save(&tenant("tenant-a"), "sess-1", transcript("hi"))
            .await
            .unwrap();

        sleep(Duration::from_millis(80));

        let err = store.load(&tenant("tenant-a"), "sess-1").await.unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = InMemorySessionStore::with_limits(Duration::from_millis(50), 100);
        for i in 0..20 {
            store
                .save(&tenant("tenant-a"), &format!("sess-{i}"), transcript("x"))
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 20);

        sleep(Duration::from_millis(80));
        store.cleanup_expired();
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let store = InMemorySessionStore::with_limits(DEFAULT_SESSION_TTL, 2);
        let a = tenant("tenant-a");

        store.save(&a, "first", transcript("1")).await.unwrap();
        sleep(Duration::from_millis(5));
        store.save(&a, "second", transcript("2")).await.unwrap();
        sleep(Duration::from_millis(5));

        // Touch "first" so "second" becomes least recently used
        store.load(&a, "first").await.unwrap();
        sleep(Duration::from_millis(5));

        store.save(&a, "third", transcript("3")).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.load(&a, "first").await.is_ok());
        assert!(store.load(&a, "third").await.is_ok());
        assert!(matches!(
            store.load(&a, "second").await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_overwrite_same_session() {
        let store = InMemorySessionStore::new();
        let a = tenant("tenant-a");
        store.save(&a, "sess-1", transcript("v1")).await.unwrap();
        store.save(&a, "sess-1", transcript("v2")).await.unwrap();

        assert_eq!(store.load(&a, "sess-1").await.unwrap(), transcript("v2"));
        assert_eq!(store.len().await, 1);
    }
}
