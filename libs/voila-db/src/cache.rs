//! Bounded scope-key → handle cache.
//!
//! Two concurrent lookups of the same cold scope collapse to a single handle
//! construction (the loser awaits the winner), which is what keeps handle
//! identity stable under parallel request load. The cache owns client
//! lifetimes: handles are only ever evicted and recreated, never replaced in
//! place.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::handle::ScopedDb;
use crate::ident::ScopeKey;
use crate::Result;

/// Overall budget for closing every connection at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct CacheEntry {
    handle: ScopedDb,
    created_at: Instant,
    last_used_at: Mutex<Instant>,
    use_count: AtomicU64,
}

/// Observability snapshot of one cache entry.
#[derive(Clone, Debug)]
pub struct CacheEntryInfo {
    pub scope: ScopeKey,
    pub age: Duration,
    pub idle: Duration,
    pub use_count: u64,
}

/// Scope-key → live handle map with single-flight construction.
pub struct ConnectionCache {
    entries: DashMap<ScopeKey, Arc<OnceCell<CacheEntry>>>,
    shutdown_timeout: Duration,
}

impl ConnectionCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Return the cached handle for `scope`, constructing it with `build` on
    /// a cold cache. Concurrent cold lookups construct exactly once.
    ///
    /// # Errors
    /// Propagates the constructor's error; nothing is cached on failure.
    pub async fn get_or_create<F, Fut>(&self, scope: &ScopeKey, build: F) -> Result<ScopedDb>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ScopedDb>>,
    {
        let cell = self
            .entries
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        let entry = cell
            .get_or_try_init(|| async {
                let handle = build().await?;
                tracing::debug!(scope = %scope, "opened scoped handle");
                let now = Instant::now();
                Ok::<_, crate::Error>(CacheEntry {
                    handle,
                    created_at: now,
                    last_used_at: Mutex::new(now),
                    use_count: AtomicU64::new(0),
                })
            })
            .await?;
        *entry.last_used_at.lock() = Instant::now();
        entry.use_count.fetch_add(1, Ordering::Relaxed);
        Ok(entry.handle.clone())
    }

    /// Remove one scope's entry, eagerly closing its client unless another
    /// live scope still shares it.
    pub async fn evict(&self, scope: &ScopeKey) {
        let Some((_, cell)) = self.entries.remove(scope) else {
            return;
        };
        let Some(entry) = cell.get() else {
            return;
        };
        let client = Arc::clone(entry.handle.client());
        let still_shared = self.entries.iter().any(|e| {
            e.value()
                .get()
                .is_some_and(|other| Arc::ptr_eq(other.handle.client(), &client))
        });
        if still_shared {
            tracing::debug!(scope = %scope, "evicted scope; client still shared");
        } else {
            tracing::debug!(scope = %scope, "evicted scope; closing client");
            client.close().await;
        }
    }

    /// Drop every entry without touching clients (test entry point).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Close every cached client concurrently, bounded by an overall
    /// timeout; stragglers are abandoned with a warning.
    pub async fn shutdown(&self) {
        let mut clients: Vec<Arc<dyn crate::driver::DriverClient>> = Vec::new();
        for entry in self.entries.iter() {
            if let Some(cached) = entry.value().get() {
                let client = cached.handle.client();
                if !clients.iter().any(|known| Arc::ptr_eq(known, client)) {
                    clients.push(Arc::clone(client));
                }
            }
        }
        self.entries.clear();

        let count = clients.len();
        let closes = clients.into_iter().map(|client| async move {
            client.close().await;
        });
        if tokio::time::timeout(self.shutdown_timeout, futures::future::join_all(closes))
            .await
            .is_err()
        {
            tracing::warn!(
                clients = count,
                timeout = ?self.shutdown_timeout,
                "shutdown timed out; abandoning unclosed connections"
            );
        }
    }

    /// Number of (possibly in-flight) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of one entry's accounting, if present and initialized.
    #[must_use]
    pub fn entry_info(&self, scope: &ScopeKey) -> Option<CacheEntryInfo> {
        let cell = self.entries.get(scope)?;
        let entry = cell.get()?;
        Some(CacheEntryInfo {
            scope: scope.clone(),
            age: entry.created_at.elapsed(),
            idle: entry.last_used_at.lock().elapsed(),
            use_count: entry.use_count.load(Ordering::Relaxed),
        })
    }
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

// ===================== tests =====================
