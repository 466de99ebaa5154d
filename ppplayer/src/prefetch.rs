//! Background cache population.
//!
//! Every prefetch runs as a detached tokio task so a slow or failing download
//! never delays audible playback. Failures are logged and dropped.

use crate::entry::PlaylistEntry;
use crate::resolver::Resolver;
use ppcache::{AudioCache, CacheMetadata, Fetched, Fetcher};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Default number of entries fetched ahead of the current one.
pub const DEFAULT_LOOKAHEAD: usize = 2;

#[derive(Clone)]
pub struct Prefetcher {
    cache: Arc<AudioCache>,
    fetcher: Arc<dyn Fetcher>,
    resolver: Resolver,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Prefetcher {
    pub fn new(cache: Arc<AudioCache>, fetcher: Arc<dyn Fetcher>, resolver: Resolver) -> Self {
        Self {
            cache,
            fetcher,
            resolver,
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    /// Schedules a download of `entry` into the cache.
    ///
    /// Returns false when nothing was scheduled: the entry cannot be cached
    /// (remote origin) or does not resolve to a URL.
    pub fn prefetch(&self, entry: &PlaylistEntry) -> bool {
        if !entry.is_cacheable() {
            tracing::info!(entry = %entry, "Remote entry, not cached");
            return false;
        }

        let key = match self.resolver.resource_key(entry) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(entry = %entry, "Cannot prefetch: {}", e);
                return false;
            }
        };

        let cache = self.cache.clone();
        let fetcher = self.fetcher.clone();
        self.track(tokio::spawn(async move {
            if cache.has(&key).await {
                tracing::debug!(key = %key, "Already cached");
                return;
            }
            match fetcher.get_bytes(&key).await {
                Ok(fetched) => {
                    let metadata = CacheMetadata::from(&fetched);
                    cache.put_logged(&key, fetched.bytes, metadata).await;
                    tracing::debug!(key = %key, "Prefetched");
                }
                Err(e) => tracing::warn!(key = %key, "Prefetch failed: {}", e),
            }
        }));
        true
    }

    /// Prefetches up to `lookahead` entries following `current_index`.
    pub fn prefetch_next(&self, playlist: &[PlaylistEntry], current_index: usize, lookahead: usize) -> usize {
        playlist
            .iter()
            .skip(current_index + 1)
            .take(lookahead)
            .filter(|entry| self.prefetch(entry))
            .count()
    }

    /// Writes already downloaded bytes to the cache in the background.
    pub fn store(&self, key: String, fetched: Fetched) {
        let cache = self.cache.clone();
        self.track(tokio::spawn(async move {
            let metadata = CacheMetadata::from(&fetched);
            cache.put_logged(&key, fetched.bytes, metadata).await;
            tracing::debug!(key = %key, "Stored downloaded bytes");
        }));
    }

    /// Number of tasks still running.
    pub fn in_flight(&self) -> usize {
        let tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        tasks.iter().filter(|task| !task.is_finished()).count()
    }

    /// Waits for every scheduled task to finish.
    pub async fn wait_idle(&self) {
        loop {
            let pending: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
                tasks.drain(..).collect()
            };
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(e) = task.await {
                    tracing::warn!("Prefetch task aborted: {}", e);
                }
            }
        }
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("resolver", &self.resolver)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
