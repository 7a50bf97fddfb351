//! RAM page cache with LRU eviction and visibility pinning
//!
//! Holds decoded page bitmaps bounded by total byte size. Entries that are
//! currently visible in some pane are pinned and skipped by eviction until
//! they leave the visible set.

use dualread_render::{Bitmap, DocumentId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::key::PageKey;

/// Lifecycle state of a cache entry
#[derive(Debug, Clone)]
pub enum EntryState {
    /// A render has been scheduled but has not finished
    Pending,
    /// The bitmap is decoded and can be displayed
    Ready(Bitmap),
}

/// A snapshot of one cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: PageKey,
    pub state: EntryState,
    pub last_access: Instant,
}

impl CacheEntry {
    pub fn bitmap(&self) -> Option<&Bitmap> {
        match &self.state {
            EntryState::Ready(bitmap) => Some(bitmap),
            EntryState::Pending => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EntryState::Ready(_))
    }

    fn byte_len(&self) -> usize {
        self.bitmap().map_or(0, Bitmap::byte_len)
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of ready entries
    pub ready_count: usize,

    /// Number of pending entries
    pub pending_count: usize,

    /// Bytes held by ready entries
    pub memory_used: usize,

    /// Byte budget
    pub memory_limit: usize,

    pub hits: u64,

    pub misses: u64,

    /// Entries removed by the eviction policy (not by invalidation)
    pub evictions: u64,

    /// Number of `put` calls that admitted an entry while over budget
    /// because every other entry was pinned
    pub over_budget_admissions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (may exceed 1.0 while pinned)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

struct CacheState {
    entries: HashMap<PageKey, CacheEntry>,

    /// Ready keys only; least recently used at the front
    lru_queue: VecDeque<PageKey>,

    /// Keys currently visible in some pane
    visible: HashSet<PageKey>,

    memory_used: usize,

    memory_limit: usize,

    stats: CacheStats,
}

impl CacheState {
    fn new(memory_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            visible: HashSet::new(),
            memory_used: 0,
            memory_limit,
            stats: CacheStats { memory_limit, ..Default::default() },
        }
    }

    fn touch(&mut self, key: &PageKey) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.clone());
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_access = Instant::now();
        }
    }

    fn remove_entry(&mut self, key: &PageKey) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(entry.byte_len());
        self.lru_queue.retain(|k| k != key);
        Some(entry)
    }

    /// Evict the least recently used entry that is not pinned
    fn evict_lru(&mut self) -> Option<PageKey> {
        let position = self.lru_queue.iter().position(|key| !self.visible.contains(key))?;
        let key = self.lru_queue.remove(position)?;
        if let Some(entry) = self.entries.remove(&key) {
            self.memory_used = self.memory_used.saturating_sub(entry.byte_len());
        }
        self.stats.evictions += 1;
        log::debug!("evicted {key}");
        Some(key)
    }

    /// Evict until `required_size` more bytes fit within `budget`
    fn evict_to_fit(&mut self, required_size: usize, budget: usize) -> usize {
        let mut evicted = 0;
        while self.memory_used + required_size > budget {
            if self.evict_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    fn refresh_stats(&mut self) {
        let ready = self.lru_queue.len();
        self.stats.ready_count = ready;
        self.stats.pending_count = self.entries.len() - ready;
        self.stats.memory_used = self.memory_used;
        self.stats.memory_limit = self.memory_limit;
    }
}

/// Bounded page bitmap cache
///
/// Thread-safe and cheap to clone; clones share the same storage. All
/// state transitions for a key happen under one lock, so a reader that
/// observes a completion notification for a key and then calls
/// [`get`](Self::get) sees the ready bitmap.
///
/// # Example
///
/// ```
/// use dualread_cache::{PageKey, RenderCache};
/// use dualread_render::{Bitmap, DocumentId, Rotation};
///
/// let cache = RenderCache::new(64 * 1024 * 1024);
/// let key = PageKey::new(DocumentId::new("paper"), 0, 1.0, Rotation::Deg0);
///
/// let bitmap = Bitmap::from_rgba(2, 2, vec![0u8; 16]).unwrap();
/// cache.put(key.clone(), bitmap);
///
/// assert!(cache.get_bitmap(&key).is_some());
/// println!("Hit rate: {:.2}%", cache.stats().hit_rate() * 100.0);
/// ```
#[derive(Clone)]
pub struct RenderCache {
    state: Arc<Mutex<CacheState>>,
}

impl RenderCache {
    /// Create a cache with a byte budget
    pub fn new(memory_limit: usize) -> Self {
        Self { state: Arc::new(Mutex::new(CacheState::new(memory_limit))) }
    }

    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up an entry, ready or pending
    ///
    /// Ready hits refresh the entry's LRU position.
    pub fn get(&self, key: &PageKey) -> Option<CacheEntry> {
        let mut state = self.lock();

        let entry = match state.entries.get(key) {
            Some(entry) => entry.clone(),
            None => {
                state.stats.misses += 1;
                return None;
            }
        };

        if entry.is_ready() {
            state.touch(key);
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        Some(entry)
    }

    /// The ready bitmap for `key`, if any
    pub fn get_bitmap(&self, key: &PageKey) -> Option<Bitmap> {
        self.get(key).and_then(|entry| entry.bitmap().cloned())
    }

    /// Record that a render for `key` has been scheduled
    ///
    /// Does nothing if the key already has an entry.
    pub fn mark_pending(&self, key: &PageKey) {
        let mut state = self.lock();
        if !state.entries.contains_key(key) {
            state.entries.insert(
                key.clone(),
                CacheEntry {
                    key: key.clone(),
                    state: EntryState::Pending,
                    last_access: Instant::now(),
                },
            );
            state.refresh_stats();
        }
    }

    /// Drop a pending entry whose render was cancelled or failed
    pub fn clear_pending(&self, key: &PageKey) {
        let mut state = self.lock();
        if state.entries.get(key).is_some_and(|entry| !entry.is_ready()) {
            state.entries.remove(key);
            state.refresh_stats();
        }
    }

    /// Store a ready bitmap
    ///
    /// Least recently used unpinned entries are evicted first to make room.
    /// If only pinned entries remain, the bitmap is admitted anyway and the
    /// cache stays over budget until visibility changes.
    pub fn put(&self, key: PageKey, bitmap: Bitmap) {
        let mut state = self.lock();
        let size = bitmap.byte_len();

        state.remove_entry(&key);

        let budget = state.memory_limit;
        state.evict_to_fit(size, budget);
        if state.memory_used + size > budget {
            state.stats.over_budget_admissions += 1;
            log::debug!(
                "admitting {key} over budget ({} + {size} > {budget} bytes)",
                state.memory_used
            );
        }

        state.memory_used += size;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key: key.clone(),
                state: EntryState::Ready(bitmap),
                last_access: Instant::now(),
            },
        );
        state.touch(&key);
        state.refresh_stats();
    }

    /// Remove every entry, ready or pending, belonging to `document`
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, document: &DocumentId) -> usize {
        let mut state = self.lock();
        let keys: Vec<PageKey> =
            state.entries.keys().filter(|key| &key.document == document).cloned().collect();
        for key in &keys {
            state.remove_entry(key);
        }
        state.visible.retain(|key| &key.document != document);
        state.refresh_stats();
        if !keys.is_empty() {
            log::debug!("invalidated {} entries for {document}", keys.len());
        }
        keys.len()
    }

    /// Remove a single entry
    pub fn remove(&self, key: &PageKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        let removed = state.remove_entry(key);
        state.refresh_stats();
        removed
    }

    /// Evict unpinned entries, oldest access first, until at most
    /// `budget_bytes` are resident
    ///
    /// Returns the number of entries evicted.
    pub fn evict_if_over(&self, budget_bytes: usize) -> usize {
        let mut state = self.lock();
        let evicted = state.evict_to_fit(0, budget_bytes);
        state.refresh_stats();
        evicted
    }

    /// Replace the set of visible (pinned) keys
    ///
    /// Entries that just lost their pin become evictable and the cache is
    /// brought back under budget if it had been admitted over it.
    pub fn set_visible(&self, visible: HashSet<PageKey>) {
        let mut state = self.lock();
        state.visible = visible;
        let budget = state.memory_limit;
        state.evict_to_fit(0, budget);
        state.refresh_stats();
    }

    pub fn is_pinned(&self, key: &PageKey) -> bool {
        self.lock().visible.contains(key)
    }

    /// Check if a ready bitmap exists without updating LRU tracking
    pub fn contains_ready(&self, key: &PageKey) -> bool {
        self.lock().entries.get(key).is_some_and(CacheEntry::is_ready)
    }

    /// Ready keys, least recently used first
    pub fn lru_order(&self) -> Vec<PageKey> {
        self.lock().lru_queue.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.lru_queue.clear();
        state.memory_used = 0;
        state.refresh_stats();
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Change the byte budget, evicting if now over it
    pub fn set_memory_limit(&self, new_limit: usize) {
        let mut state = self.lock();
        state.memory_limit = new_limit;
        state.evict_to_fit(0, new_limit);
        state.refresh_stats();
    }

    pub fn memory_limit(&self) -> usize {
        self.lock().memory_limit
    }

    pub fn memory_used(&self) -> usize {
        self.lock().memory_used
    }
}

impl Default for RenderCache {
    /// Create a cache with a default 256MB limit
    fn default() -> Self {
        Self::with_mb_limit(256)
    }
}
