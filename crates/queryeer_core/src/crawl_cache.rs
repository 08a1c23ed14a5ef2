//! Crawled catalogs keyed by (endpoint, database).
//!
//! Reads never block on a crawl. A missing or expired entry schedules at most
//! one background crawl per key; while it runs, callers keep getting the
//! previous snapshot (or `None` if there has never been one).

use crate::{Catalog, CatalogCrawler, TaskKind, WorkerPool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatalogKey {
    pub endpoint: String,
    pub database: String,
}

impl CatalogKey {
    pub fn new(endpoint: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            database: database.into(),
        }
    }
}

impl std::fmt::Display for CatalogKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.endpoint, self.database)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    Loaded(CatalogKey),
    Failed { key: CatalogKey, message: String },
}

#[derive(Default)]
struct EntryState {
    value: Option<Arc<Catalog>>,
    /// `None` until the first crawl attempt finishes.
    expires_at: Option<Instant>,
    loading: bool,
    last_error: Option<String>,
    /// Bumped by invalidation; a crawl started under an older generation
    /// does not publish its result.
    generation: u64,
}

impl EntryState {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now >= at)
    }

    fn reset(&mut self) {
        self.value = None;
        self.expires_at = None;
        self.last_error = None;
        self.generation += 1;
    }
}

#[derive(Default)]
struct CacheEntry {
    state: Mutex<EntryState>,
}

impl CacheEntry {
    fn lock(&self) -> MutexGuard<'_, EntryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Catalog cache entry mutex poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    /// Sets the loading flag if it is clear. Returns the generation the
    /// crawl runs under when it did.
    fn try_begin_load(&self, only_if_expired: bool) -> (Option<Arc<Catalog>>, Option<u64>) {
        let mut state = self.lock();
        let due = !only_if_expired || state.is_expired(Instant::now());
        if due && !state.loading {
            state.loading = true;
            return (state.value.clone(), Some(state.generation));
        }
        (state.value.clone(), None)
    }
}

/// Clears the loading flag when dropped, whether the crawl finished, failed,
/// panicked, or never ran.
struct LoadingGuard {
    entry: Arc<CacheEntry>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.entry.lock().loading = false;
    }
}

pub struct SchemaCrawlCache {
    entries: RwLock<HashMap<CatalogKey, Arc<CacheEntry>>>,
    ttl: Duration,
    pool: Arc<WorkerPool>,
    events: broadcast::Sender<CacheEvent>,
}

impl SchemaCrawlCache {
    pub fn new(pool: Arc<WorkerPool>, ttl: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            pool,
            events,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached catalog, scheduling a crawl when the entry is
    /// missing or expired and none is running.
    ///
    /// `None` means nothing has been loaded yet; subscribe or poll.
    pub fn get_catalog(
        &self,
        key: &CatalogKey,
        crawler: Arc<dyn CatalogCrawler>,
    ) -> Option<Arc<Catalog>> {
        let entry = self.entry(key);
        let (value, generation) = entry.try_begin_load(true);

        if let Some(generation) = generation {
            log::debug!(
                "Scheduling crawl of {} ({})",
                key,
                if value.is_some() { "refresh" } else { "initial" }
            );
            self.schedule(key.clone(), entry, generation, crawler);
        }

        value
    }

    /// Forces a crawl unless one is already running for `key`.
    pub fn reload(&self, key: &CatalogKey, crawler: Arc<dyn CatalogCrawler>) -> bool {
        let entry = self.entry(key);
        let (_, generation) = entry.try_begin_load(false);

        if let Some(generation) = generation {
            log::debug!("Forced reload of {}", key);
            self.schedule(key.clone(), entry, generation, crawler);
        }

        generation.is_some()
    }

    /// Current value without scheduling anything.
    pub fn peek(&self, key: &CatalogKey) -> Option<Arc<Catalog>> {
        self.existing(key).and_then(|entry| entry.lock().value.clone())
    }

    pub fn is_loading(&self, key: &CatalogKey) -> bool {
        self.existing(key).is_some_and(|entry| entry.lock().loading)
    }

    /// Message of the most recent failed crawl, cleared by the next success.
    pub fn last_error(&self, key: &CatalogKey) -> Option<String> {
        self.existing(key)
            .and_then(|entry| entry.lock().last_error.clone())
    }

    /// Drops the cached value for `key`.
    ///
    /// An entry with a crawl in flight stays in place with its loading flag,
    /// so no second crawl starts for the key; the running crawl's result is
    /// discarded.
    pub fn invalidate(&self, key: &CatalogKey) {
        self.evict(|candidate| candidate == key);
    }

    pub fn invalidate_endpoint(&self, endpoint: &str) {
        self.evict(|candidate| candidate.endpoint == endpoint);
    }

    pub fn clear(&self) {
        self.evict(|_| true);
    }

    pub fn len(&self) -> usize {
        self.entries_read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    fn evict(&self, matches: impl Fn(&CatalogKey) -> bool) {
        self.entries_write().retain(|key, entry| {
            if !matches(key) {
                return true;
            }

            let mut state = entry.lock();
            state.reset();
            state.loading
        });
    }

    fn schedule(
        &self,
        key: CatalogKey,
        entry: Arc<CacheEntry>,
        generation: u64,
        crawler: Arc<dyn CatalogCrawler>,
    ) {
        let guard = LoadingGuard { entry };
        let events = self.events.clone();
        let ttl = self.ttl;
        let description = format!("Crawl {}", key);

        let accepted = self.pool.spawn(TaskKind::Crawl, description, move || {
            let guard = guard;
            let started = Instant::now();

            let result = crawler.crawl(&key.database);

            let event = {
                let mut state = guard.entry.lock();
                if state.generation != generation {
                    log::debug!("Discarding crawl of {} invalidated while running", key);
                    None
                } else {
                    match result {
                        Ok(catalog) => {
                            log::info!(
                                "Crawled {}: {} objects in {:?}",
                                key,
                                catalog.object_count(),
                                started.elapsed()
                            );
                            state.value = Some(Arc::new(catalog));
                            state.expires_at = Some(Instant::now() + ttl);
                            state.last_error = None;
                            Some(CacheEvent::Loaded(key))
                        }
                        Err(e) => {
                            log::warn!("Crawl of {} failed: {}", key, e);
                            let message = e.to_string();
                            state.expires_at = Some(Instant::now() + ttl);
                            state.last_error = Some(message.clone());
                            Some(CacheEvent::Failed { key, message })
                        }
                    }
                }
            };

            drop(guard);
            if let Some(event) = event {
                let _ = events.send(event);
            }
        });

        if !accepted {
            log::warn!("Worker pool rejected crawl, loading flag released");
        }
    }

    fn entry(&self, key: &CatalogKey) -> Arc<CacheEntry> {
        if let Some(entry) = self.existing(key) {
            return entry;
        }

        self.entries_write()
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn existing(&self, key: &CatalogKey) -> Option<Arc<CacheEntry>> {
        self.entries_read().get(key).cloned()
    }

    fn entries_read(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<CatalogKey, Arc<CacheEntry>>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Catalog cache RwLock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }

    fn entries_write(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<CatalogKey, Arc<CacheEntry>>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poison_err) => {
                log::warn!("Catalog cache RwLock poisoned, recovering...");
                poison_err.into_inner()
            }
        }
    }
}
