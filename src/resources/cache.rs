//! Reference-counted, budget-bounded resource cache.
//!
//! Loads run on the tokio runtime behind an admission gate. Concurrent
//! requests for the same id share one in-flight load. GPU-resident kinds are
//! charged against a soft byte budget enforced by LRU eviction of
//! unreferenced entries; everything else is reclaimed only by the GC sweep.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use super::admission::LoadAdmission;
use super::lru::LruQueue;
use super::resource::{LoadError, Resource, ResourceId, ResourceKind, ResourceState};
use crate::memory::{AllocatorStats, GpuAllocator, MemoryBlock};
use crate::scheduler::panic_message;
use crate::telemetry::{load_span, SpanExt};

/// Configuration for the resource cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Soft GPU byte budget for texture and buffer resources.
    pub gpu_budget: u64,
    /// Maximum loads running at once.
    pub max_concurrent_loads: usize,
    /// Interval between GC sweeps.
    pub gc_interval: Duration,
    /// Idle time after which an unreferenced entry is collected.
    pub max_unused_time: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            gpu_budget: 256 * 1024 * 1024, // 256 MiB
            max_concurrent_loads: 4,
            gc_interval: Duration::from_secs(30),
            max_unused_time: Duration::from_secs(60),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CacheError {
    #[error("Resource not found: {0}")]
    NotFound(ResourceId),

    #[error("Resource {id} still referenced ({ref_count} refs)")]
    InUse { id: ResourceId, ref_count: u32 },

    #[error("Resource {0} is still loading")]
    Loading(ResourceId),
}

/// Snapshot of cache occupancy and activity counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub loaded: usize,
    pub loading: usize,
    pub errored: usize,
    pub gpu_usage: u64,
    pub gpu_budget: u64,
    pub in_flight_loads: usize,
    pub pending_loads: usize,
    pub hits: u64,
    pub misses: u64,
    pub loads_started: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub gc_collected: u64,
}

type SharedLoad = Shared<BoxFuture<'static, Result<(), LoadError>>>;

enum Slot {
    Loading(SharedLoad),
    Loaded,
    Failed,
}

enum Lookup {
    Ready(Arc<dyn Resource>),
    InFlight(Arc<dyn Resource>, SharedLoad, u64),
    Missing,
}

struct CacheEntry {
    resource: Arc<dyn Resource>,
    kind: ResourceKind,
    size: u64,
    slot: Slot,
    ref_count: u32,
    last_access: Instant,
    generation: u64,
    /// Bytes charged to `gpu_usage` on behalf of this entry.
    charged: u64,
    placement: Option<MemoryBlock>,
}

impl CacheEntry {
    fn state(&self) -> ResourceState {
        match self.slot {
            Slot::Loading(_) => ResourceState::Loading,
            Slot::Loaded => ResourceState::Loaded,
            Slot::Failed => ResourceState::Error,
        }
    }

    fn is_evictable(&self) -> bool {
        self.ref_count == 0 && matches!(self.slot, Slot::Loaded)
    }
}

struct CacheState {
    entries: HashMap<ResourceId, CacheEntry>,
    lru: LruQueue,
    gpu_usage: u64,
    allocator: Option<Box<dyn GpuAllocator>>,
    next_generation: u64,
    shut_down: bool,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads_started: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
    gc_collected: AtomicU64,
}

struct CacheInner {
    config: CacheConfig,
    state: Mutex<CacheState>,
    admission: LoadAdmission,
    counters: CacheCounters,
}

/// Shared handle to the resource cache. Cloning is cheap.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<CacheInner>,
}

impl ResourceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a cache that also places GPU-resident resources in `allocator`.
    pub fn with_allocator(config: CacheConfig, allocator: Box<dyn GpuAllocator>) -> Self {
        Self::build(config, Some(allocator))
    }

    fn build(config: CacheConfig, allocator: Option<Box<dyn GpuAllocator>>) -> Self {
        let admission = LoadAdmission::new(config.max_concurrent_loads);
        Self {
            inner: Arc::new(CacheInner {
                config,
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    lru: LruQueue::new(),
                    gpu_usage: 0,
                    allocator,
                    next_generation: 1,
                    shut_down: false,
                }),
                admission,
                counters: CacheCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Get a loaded resource, loading it through `factory` on first request.
    ///
    /// Every successful call takes one reference that must be returned with
    /// [`release`](Self::release). Requests arriving while a load is in
    /// flight share it; a failed load is reported to all of them and the next
    /// `acquire` starts over with a fresh resource. A panicking `load` counts
    /// as a failed load.
    ///
    /// `factory` runs without the cache lock held, so it may query the cache.
    /// If a concurrent request starts the same load first, the value it built
    /// is dropped without being loaded or disposed.
    pub async fn acquire<F, R>(
        &self,
        id: impl Into<ResourceId>,
        factory: F,
        priority: i32,
    ) -> Result<Arc<dyn Resource>, LoadError>
    where
        F: FnOnce() -> R + Send,
        R: Resource + 'static,
    {
        let id = id.into();
        let existing = self.lookup(&mut self.inner.state.lock(), &id)?;
        let (resource, load, generation) = match existing {
            Lookup::Ready(resource) => return Ok(resource),
            Lookup::InFlight(resource, load, generation) => (resource, load, generation),
            Lookup::Missing => {
                // Built without the lock held so the factory may use the cache.
                let fresh: Arc<dyn Resource> = Arc::new(factory());
                let mut guard = self.inner.state.lock();
                let state = &mut *guard;
                match self.lookup(state, &id)? {
                    // Another request got there first; `fresh` was never loaded.
                    Lookup::Ready(resource) => return Ok(resource),
                    Lookup::InFlight(resource, load, generation) => (resource, load, generation),
                    Lookup::Missing => self.insert_loading(state, &id, fresh, priority),
                }
            }
        };

        let mut pending = PendingRef { cache: self, id: &id, generation, armed: true };
        let result = load.await;
        pending.armed = false;
        result?;

        let mut state = self.inner.state.lock();
        if let Some(entry) = state.entries.get_mut(&id) {
            if entry.generation == generation {
                entry.last_access = Instant::now();
            }
        }
        Ok(resource)
    }

    /// Take a reference on an existing loaded or loading entry.
    fn lookup(&self, state: &mut CacheState, id: &ResourceId) -> Result<Lookup, LoadError> {
        if state.shut_down {
            return Err(LoadError::ShutDown);
        }
        let now = Instant::now();
        match state.entries.get_mut(id) {
            Some(entry) if matches!(entry.slot, Slot::Loaded) => {
                entry.ref_count += 1;
                entry.last_access = now;
                if entry.kind.is_gpu_resident() {
                    state.lru.touch(id);
                }
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Lookup::Ready(entry.resource.clone()))
            }
            Some(CacheEntry {
                slot: Slot::Loading(load),
                resource,
                ref_count,
                last_access,
                generation,
                ..
            }) => {
                *ref_count += 1;
                *last_access = now;
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Lookup::InFlight(resource.clone(), load.clone(), *generation))
            }
            _ => Ok(Lookup::Missing),
        }
    }

    /// Replace a missing or failed entry with a fresh load holding one
    /// reference.
    fn insert_loading(
        &self,
        state: &mut CacheState,
        id: &ResourceId,
        resource: Arc<dyn Resource>,
        priority: i32,
    ) -> (Arc<dyn Resource>, SharedLoad, u64) {
        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        let generation = state.next_generation;
        state.next_generation += 1;
        let load = self.start_load(id.clone(), resource.clone(), generation, priority);
        state.entries.insert(
            id.clone(),
            CacheEntry {
                kind: resource.kind(),
                size: resource.byte_size(),
                resource: resource.clone(),
                slot: Slot::Loading(load.clone()),
                ref_count: 1,
                last_access: Instant::now(),
                generation,
                charged: 0,
                placement: None,
            },
        );
        (resource, load, generation)
    }

    /// Return one reference. Never evicts; reclaiming is the GC's job.
    pub fn release(&self, id: &ResourceId) {
        let mut state = self.inner.state.lock();
        match state.entries.get_mut(id) {
            Some(entry) => entry.ref_count = entry.ref_count.saturating_sub(1),
            None => tracing::debug!(resource = %id, "release of unknown resource"),
        }
    }

    /// Dispose an unreferenced entry immediately.
    pub fn dispose(&self, id: &ResourceId) -> Result<(), CacheError> {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let entry = state
            .entries
            .get(id)
            .ok_or_else(|| CacheError::NotFound(id.clone()))?;
        if matches!(entry.slot, Slot::Loading(_)) {
            return Err(CacheError::Loading(id.clone()));
        }
        if entry.ref_count > 0 {
            return Err(CacheError::InUse { id: id.clone(), ref_count: entry.ref_count });
        }
        Self::remove_locked(state, id);
        Ok(())
    }

    /// Evict every unreferenced GPU-resident entry. Returns the count.
    pub fn evict_unused(&self) -> usize {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let victims: Vec<ResourceId> = state
            .lru
            .iter_oldest()
            .filter(|id| state.entries.get(*id).is_some_and(CacheEntry::is_evictable))
            .cloned()
            .collect();
        for id in &victims {
            Self::remove_locked(state, id);
        }
        if !victims.is_empty() {
            self.inner
                .counters
                .evictions
                .fetch_add(victims.len() as u64, Ordering::Relaxed);
            tracing::info!(evicted = victims.len(), gpu_usage = state.gpu_usage, "evicted unused resources");
        }
        victims.len()
    }

    /// Run one GC sweep against the current time.
    pub fn collect_garbage(&self) -> usize {
        self.collect_garbage_at(Instant::now())
    }

    /// Dispose unreferenced entries idle for longer than `max_unused_time`
    /// as of `now`. Failed entries are dropped on the same schedule.
    pub fn collect_garbage_at(&self, now: Instant) -> usize {
        let max_unused = self.inner.config.max_unused_time;
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let stale: Vec<ResourceId> = state
            .entries
            .iter()
            .filter(|(_, e)| {
                e.ref_count == 0
                    && !matches!(e.slot, Slot::Loading(_))
                    && now.saturating_duration_since(e.last_access) > max_unused
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            Self::remove_locked(state, id);
        }
        if !stale.is_empty() {
            self.inner
                .counters
                .gc_collected
                .fetch_add(stale.len() as u64, Ordering::Relaxed);
            tracing::info!(collected = stale.len(), remaining = state.entries.len(), "resource gc sweep");
        }
        stale.len()
    }

    /// Dispose everything and reject further requests.
    pub fn shutdown(&self) {
        self.inner.admission.close();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        state.shut_down = true;
        let ids: Vec<ResourceId> = state.entries.keys().cloned().collect();
        for id in &ids {
            if let Some(entry) = state.entries.get(id) {
                if entry.ref_count > 0 {
                    tracing::warn!(resource = %id, refs = entry.ref_count, "disposing referenced resource at shutdown");
                }
                if matches!(entry.slot, Slot::Loading(_)) {
                    // The load task disposes its own resource when it finishes.
                    state.entries.remove(id);
                    continue;
                }
            }
            Self::remove_locked(state, id);
        }
        state.lru.clear();
        state.gpu_usage = 0;
        tracing::info!(disposed = ids.len(), "resource cache shut down");
    }

    pub fn state(&self, id: &ResourceId) -> Option<ResourceState> {
        self.inner.state.lock().entries.get(id).map(CacheEntry::state)
    }

    pub fn ref_count(&self, id: &ResourceId) -> Option<u32> {
        self.inner.state.lock().entries.get(id).map(|e| e.ref_count)
    }

    /// GPU placement of a loaded resource, when the cache owns an allocator.
    pub fn placement(&self, id: &ResourceId) -> Option<MemoryBlock> {
        self.inner.state.lock().entries.get(id).and_then(|e| e.placement)
    }

    pub fn gpu_usage(&self) -> u64 {
        self.inner.state.lock().gpu_usage
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().entries.is_empty()
    }

    pub fn allocator_stats(&self) -> Option<AllocatorStats> {
        self.inner.state.lock().allocator.as_ref().map(|a| a.stats())
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let mut stats = CacheStats {
            gpu_budget: self.inner.config.gpu_budget,
            in_flight_loads: self.inner.admission.active(),
            pending_loads: self.inner.admission.pending(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            loads_started: c.loads_started.load(Ordering::Relaxed),
            load_failures: c.load_failures.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            gc_collected: c.gc_collected.load(Ordering::Relaxed),
            ..CacheStats::default()
        };
        let state = self.inner.state.lock();
        stats.entries = state.entries.len();
        stats.gpu_usage = state.gpu_usage;
        for entry in state.entries.values() {
            match entry.slot {
                Slot::Loading(_) => stats.loading += 1,
                Slot::Loaded => stats.loaded += 1,
                Slot::Failed => stats.errored += 1,
            }
        }
        stats
    }

    fn start_load(
        &self,
        id: ResourceId,
        resource: Arc<dyn Resource>,
        generation: u64,
        priority: i32,
    ) -> SharedLoad {
        let cache = self.clone();
        let task = {
            let cache = cache.clone();
            let id = id.clone();
            tokio::spawn(async move { cache.run_load(id, resource, generation, priority).await })
        };
        async move {
            task.await.unwrap_or_else(|join_error| {
                let error = LoadError::Aborted(join_error.to_string());
                // The load task died without settling its entry.
                let mut guard = cache.inner.state.lock();
                let state = &mut *guard;
                let loading = Self::is_current(state, &id, generation)
                    && state.entries.get(&id).is_some_and(|entry| matches!(entry.slot, Slot::Loading(_)));
                if loading {
                    cache.fail_load(state, &id, &error);
                }
                Err(error)
            })
        }
        .boxed()
        .shared()
    }

    async fn run_load(
        &self,
        id: ResourceId,
        resource: Arc<dyn Resource>,
        generation: u64,
        priority: i32,
    ) -> Result<(), LoadError> {
        let _permit = self.inner.admission.acquire(priority).await?;
        let size = resource.byte_size();
        let gpu_resident = resource.kind().is_gpu_resident();

        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !Self::is_current(state, &id, generation) {
                return Err(LoadError::ShutDown);
            }
            if gpu_resident {
                self.ensure_budget(state, size);
                state.gpu_usage += size;
                if let Some(entry) = state.entries.get_mut(&id) {
                    entry.charged = size;
                }
            }
        }

        self.inner.counters.loads_started.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let span = load_span(id.as_str(), size);
        // A panicking load is an ordinary failure; the entry must not stay Loading.
        let result = AssertUnwindSafe(resource.load())
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|payload| Err(LoadError::Aborted(panic_message(payload.as_ref()))));
        span.record_result(&result);

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if !Self::is_current(state, &id, generation) {
            // Cache was shut down mid-load; nobody owns this resource now.
            resource.dispose();
            return Err(LoadError::ShutDown);
        }

        match result {
            Ok(()) => {
                if gpu_resident {
                    state.lru.touch(&id);
                    let placement = self.place(state, &id, size);
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.placement = placement;
                    }
                }
                if let Some(entry) = state.entries.get_mut(&id) {
                    entry.slot = Slot::Loaded;
                    entry.last_access = Instant::now();
                }
                tracing::debug!(
                    resource = %id,
                    bytes = size,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "resource loaded",
                );
                Ok(())
            }
            Err(e) => {
                self.fail_load(state, &id, &e);
                Err(e)
            }
        }
    }

    /// Move a loading entry to `Failed`: dispose it, refund its budget
    /// charge and drop the references its waiters took.
    fn fail_load(&self, state: &mut CacheState, id: &ResourceId, error: &LoadError) {
        let Some(entry) = state.entries.get_mut(id) else {
            return;
        };
        entry.resource.dispose();
        state.gpu_usage = state.gpu_usage.saturating_sub(entry.charged);
        entry.charged = 0;
        entry.slot = Slot::Failed;
        entry.ref_count = 0;
        self.inner.counters.load_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(resource = %id, error = %error, "resource load failed");
    }

    fn is_current(state: &CacheState, id: &ResourceId, generation: u64) -> bool {
        !state.shut_down
            && state
                .entries
                .get(id)
                .is_some_and(|e| e.generation == generation)
    }

    /// Evict LRU entries until `size` more bytes fit in the budget or no
    /// candidate remains. The budget is soft: if the queue runs dry the load
    /// proceeds over budget.
    fn ensure_budget(&self, state: &mut CacheState, size: u64) {
        let budget = self.inner.config.gpu_budget;
        while state.gpu_usage + size > budget {
            let Some(victim) = Self::lru_candidate(state, None) else {
                tracing::debug!(
                    requested = size,
                    gpu_usage = state.gpu_usage,
                    budget,
                    "no evictable resources; exceeding soft budget",
                );
                break;
            };
            Self::remove_locked(state, &victim);
            self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(resource = %victim, gpu_usage = state.gpu_usage, "evicted for budget");
        }
    }

    /// Place a freshly loaded resource, evicting LRU entries while the
    /// allocator has no block that fits.
    fn place(&self, state: &mut CacheState, id: &ResourceId, size: u64) -> Option<MemoryBlock> {
        loop {
            let allocator = state.allocator.as_mut()?;
            if let Some(block) = allocator.allocate(id, size) {
                return Some(block);
            }
            let Some(victim) = Self::lru_candidate(state, Some(id)) else {
                tracing::debug!(resource = %id, bytes = size, "no GPU block available; resource left unplaced");
                return None;
            };
            Self::remove_locked(state, &victim);
            self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn lru_candidate(state: &CacheState, exclude: Option<&ResourceId>) -> Option<ResourceId> {
        state
            .lru
            .iter_oldest()
            .filter(|id| Some(*id) != exclude)
            .find(|id| state.entries.get(*id).is_some_and(CacheEntry::is_evictable))
            .cloned()
    }

    /// Remove an entry, returning its bytes and disposing a loaded resource.
    fn remove_locked(state: &mut CacheState, id: &ResourceId) {
        state.lru.remove(id);
        let Some(entry) = state.entries.remove(id) else {
            return;
        };
        state.gpu_usage = state.gpu_usage.saturating_sub(entry.charged);
        if let (Some(block), Some(allocator)) = (entry.placement, state.allocator.as_mut()) {
            allocator.deallocate(id, block.size);
        }
        if matches!(entry.slot, Slot::Loaded) {
            entry.resource.dispose();
        }
        tracing::trace!(resource = %id, bytes = entry.size, "resource disposed");
    }
}

/// Returns the reference an `acquire` took if the caller stops waiting
/// before the shared load resolves.
struct PendingRef<'a> {
    cache: &'a ResourceCache,
    id: &'a ResourceId,
    generation: u64,
    armed: bool,
}

impl Drop for PendingRef<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.inner.state.lock();
        if let Some(entry) = state.entries.get_mut(self.id) {
            if entry.generation == self.generation {
                entry.ref_count = entry.ref_count.saturating_sub(1);
            }
        }
    }
}
