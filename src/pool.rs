//! Connection pool: one reusable client per (endpoint, credential).
//!
//! Building an HTTP client is cheap, but throwing it away is not: every fresh
//! client re-does DNS, TCP and TLS against the inference host. The pool keeps
//! exactly one handle per [`ConnectionKey`] for as long as the pool lives so
//! keep-alive connections are reused across requests.
//!
//! ## Lifecycle
//!
//! * **Init**: lazily, on the first [`ClientPool::acquire`] for a key.
//! * **Teardown**: [`ClientPool::release_all`], invoked once at orderly
//!   shutdown. Later acquires build fresh handles.
//!
//! There is no eviction or expiry.

use crate::client::{HttpConnector, InferenceService};
use crate::config::PoolSettings;
use crate::error::HandwriteError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Identity of a pooled handle.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub endpoint: String,
    pub api_key: String,
}

impl ConnectionKey {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionKey")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Factory for the handles the pool caches.
pub trait Connector: Send + Sync {
    type Service: InferenceService + 'static;

    fn connect(&self, key: &ConnectionKey) -> Result<Self::Service, HandwriteError>;
}

/// Process-wide cache of inference clients.
///
/// Constructed explicitly and shared (`Arc<ClientPool<_>>`) with every
/// [`crate::run::Pipeline`] that needs it.
pub struct ClientPool<C: Connector = HttpConnector> {
    connector: C,
    clients: Mutex<HashMap<ConnectionKey, Arc<C::Service>>>,
}

impl ClientPool<HttpConnector> {
    /// Pool of HTTP clients built with `settings`.
    pub fn http(settings: PoolSettings) -> Self {
        Self::new(HttpConnector::new(settings))
    }
}

impl Default for ClientPool<HttpConnector> {
    fn default() -> Self {
        Self::http(PoolSettings::default())
    }
}

impl<C: Connector> ClientPool<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Return the handle for `(endpoint, api_key)`, creating it on first use.
    ///
    /// The lookup and the insert happen under one lock, so two tasks racing
    /// on the same unseen key never build two handles.
    pub async fn acquire(
        &self,
        endpoint: &str,
        api_key: &str,
    ) -> Result<Arc<C::Service>, HandwriteError> {
        let key = ConnectionKey::new(endpoint, api_key);
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let client = Arc::new(self.connector.connect(&key)?);
        debug!("Pooled new client for {}", key.endpoint);
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Shut down and forget every cached handle.
    pub async fn release_all(&self) {
        let mut clients = self.clients.lock().await;
        let count = clients.len();
        for (_, client) in clients.drain() {
            client.shutdown().await;
        }
        info!("Released {} pooled client(s)", count);
    }

    /// Number of cached handles.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{IncrementStream, StageRequest};
    use crate::error::ServiceError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct NullService {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl InferenceService for NullService {
        async fn list_models(&self) -> Result<Vec<String>, ServiceError> {
            Ok(vec![])
        }

        async fn stream_chat(&self, _: &StageRequest) -> Result<IncrementStream, ServiceError> {
            Err(ServiceError::Transport("unused".into()))
        }

        async fn shutdown(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        built: AtomicUsize,
        closed: Arc<AtomicBool>,
    }

    impl Connector for CountingConnector {
        type Service = NullService;

        fn connect(&self, _: &ConnectionKey) -> Result<NullService, HandwriteError> {
            self.built.fetch_add(1, Ordering::SeqCst);
            Ok(NullService {
                closed: Arc::clone(&self.closed),
            })
        }
    }

    #[tokio::test]
    async fn same_key_shares_one_handle() {
        let pool = ClientPool::new(CountingConnector::default());
        let a = pool.acquire("http://a/v1", "k").await.unwrap();
        let b = pool.acquire("http://a/v1", "k").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.connector.built.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_key_or_endpoint_gets_distinct_handle() {
        let pool = ClientPool::new(CountingConnector::default());
        let a = pool.acquire("http://a/v1", "k1").await.unwrap();
        let b = pool.acquire("http://a/v1", "k2").await.unwrap();
        let c = pool.acquire("http://b/v1", "k1").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(pool.len().await, 3);
    }

    #[tokio::test]
    async fn release_all_shuts_down_and_rebuilds() {
        let pool = ClientPool::new(CountingConnector::default());
        let before = pool.acquire("http://a/v1", "k").await.unwrap();
        pool.release_all().await;
        assert!(pool.is_empty().await);
        assert!(pool.connector.closed.load(Ordering::SeqCst));

        let after = pool.acquire("http://a/v1", "k").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(pool.connector.built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_builds_once() {
        let pool = Arc::new(ClientPool::new(CountingConnector::default()));
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.acquire("http://a/v1", "k").await.unwrap() })
            })
            .collect();
        let handles = futures::future::join_all(tasks).await;
        let first = handles[0].as_ref().unwrap();
        for h in &handles {
            assert!(Arc::ptr_eq(first, h.as_ref().unwrap()));
        }
        assert_eq!(pool.connector.built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn key_debug_redacts_credential() {
        let key = ConnectionKey::new("http://a/v1", "sk-secret");
        assert!(!format!("{key:?}").contains("sk-secret"));
    }
}
