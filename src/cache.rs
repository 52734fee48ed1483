use crate::middleware::{ClientWindow, Decision, RateLimitPolicy};
use futures::future::BoxFuture;
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Backing storage for per-client rate-limit windows.
pub trait RateLimitStore: Send + Sync + 'static {
    fn record(&self, key: String, now: u64, policy: RateLimitPolicy) -> BoxFuture<'_, Decision>;
}

/// Process-local store. Idle clients are purged at most once per window,
/// on the first request after the window has elapsed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryWindows>,
}

#[derive(Debug, Default)]
struct MemoryWindows {
    windows: HashMap<String, ClientWindow>,
    last_purge: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimitStore for MemoryStore {
    fn record(&self, key: String, now: u64, policy: RateLimitPolicy) -> BoxFuture<'_, Decision> {
        let decision = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if now >= inner.last_purge.saturating_add(policy.window_secs) {
                inner.last_purge = now;
                inner.windows.retain(|client, window| {
                    client == &key || !window.is_idle(now, policy.window_secs)
                });
            }
            inner.windows.entry(key).or_default().record(now, policy)
        };
        Box::pin(futures::future::ready(decision))
    }
}

/// Store backed by a bounded moka cache. Entries expire once a client has
/// been idle for `idle`.
#[derive(Clone)]
pub struct CacheStore {
    cache: Cache<String, Arc<tokio::sync::Mutex<ClientWindow>>>,
}

impl CacheStore {
    pub fn new(max_capacity: u64, idle: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_idle(idle)
            .build();

        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl RateLimitStore for CacheStore {
    fn record(&self, key: String, now: u64, policy: RateLimitPolicy) -> BoxFuture<'_, Decision> {
        Box::pin(async move {
            let window = self
                .cache
                .get_with(key, async { Arc::new(tokio::sync::Mutex::new(ClientWindow::default())) })
                .await;
            let mut window = window.lock().await;
            window.record(now, policy)
        })
    }
}
