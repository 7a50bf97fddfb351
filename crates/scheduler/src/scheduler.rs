//! Render request scheduler
//!
//! Every page key the scheduler knows about is in exactly one phase:
//!
//! - `Queued`: waiting in the dispatch queue
//! - `InProgress`: claimed by one worker
//! - `Failed`: decode attempts exhausted; answered with a placeholder until
//!   a manual [`RenderScheduler::retry`]
//!
//! A finished render leaves the scheduler and lives on in the
//! [`RenderCache`]. Keys never have more than one phase, which is what keeps
//! two workers from rendering the same key at once.
//!
//! All phase transitions happen under one lock. Completion stores the bitmap
//! in the cache before any waiter is notified, so a waiter that reads the
//! cache after its notification always sees the ready bitmap.

use dualread_cache::{DiskPageCache, PageKey, RenderCache};
use dualread_render::{Bitmap, DocumentId, PageSource, RenderError, RenderResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::priority::{DispatchQueue, RenderPriority};

/// Identifies a pane or other party waiting on renders
pub type RequesterId = u64;

/// Scheduler tuning, loaded from the `[scheduler]` configuration table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; `0` picks the number of logical cores (capped at 8)
    pub workers: usize,
    /// Rasterization attempts per key before falling back to a placeholder
    pub max_decode_attempts: u32,
    /// Pixels per PDF point at 100% zoom
    pub base_scale: f32,
    /// Pages on each side of the viewport rendered ahead of time
    pub lookahead_pages: u16,
    /// How long an idle worker waits before re-checking for shutdown
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            max_decode_attempts: 3,
            base_scale: 1.5,
            lookahead_pages: 1,
            poll_interval_ms: 100,
        }
    }
}

impl SchedulerConfig {
    /// Resolved worker count
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Something the UI wants rendered
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub key: PageKey,
    pub priority: RenderPriority,
    pub requester: RequesterId,
    /// Viewport generation of the requester when the request was made
    pub generation: u64,
}

/// Final answer to one request
#[derive(Debug, Clone)]
pub enum RenderOutcome {
    /// The bitmap is ready and already stored in the cache
    Ready { key: PageKey, bitmap: Bitmap },
    /// The page could not be decoded; draw a placeholder
    Placeholder { key: PageKey, reason: String },
    /// Superseded or closed before it was rendered
    Cancelled { key: PageKey },
}

impl RenderOutcome {
    pub fn key(&self) -> &PageKey {
        match self {
            RenderOutcome::Ready { key, .. }
            | RenderOutcome::Placeholder { key, .. }
            | RenderOutcome::Cancelled { key } => key,
        }
    }

    pub fn bitmap(&self) -> Option<&Bitmap> {
        match self {
            RenderOutcome::Ready { bitmap, .. } => Some(bitmap),
            _ => None,
        }
    }
}

/// Handle on a pending render notification
///
/// Exactly one [`RenderOutcome`] is sent per ticket. It is sent from the
/// worker thread that finished the render, or from the requesting thread
/// itself when the request is answered immediately (cache hit, stale
/// generation, exhausted key). Use [`recv_async`](Self::recv_async) from
/// async UI code or [`try_recv`](Self::try_recv) from a frame loop.
#[derive(Debug)]
pub struct RenderTicket {
    key: PageKey,
    receiver: flume::Receiver<RenderOutcome>,
}

impl RenderTicket {
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    /// Non-blocking poll
    pub fn try_recv(&self) -> Option<RenderOutcome> {
        self.receiver.try_recv().ok()
    }

    /// Block until the outcome arrives or `timeout` elapses
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RenderOutcome> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Await the outcome
    ///
    /// Resolves to `Cancelled` if the scheduler is dropped first.
    pub async fn recv_async(self) -> RenderOutcome {
        match self.receiver.recv_async().await {
            Ok(outcome) => outcome,
            Err(_) => RenderOutcome::Cancelled { key: self.key },
        }
    }

    pub fn into_receiver(self) -> flume::Receiver<RenderOutcome> {
        self.receiver
    }
}

/// Errors raised by [`RenderScheduler::request`]
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("document {0} is not open")]
    UnknownDocument(DocumentId),

    #[error("page {page} out of range for {document} (page_count={page_count})")]
    PageOutOfRange { document: DocumentId, page: u16, page_count: u16 },

    #[error("scheduler is shut down")]
    ShutDown,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStats {
    /// Requests accepted
    pub requests: u64,
    /// Requests answered straight from the cache
    pub served_from_cache: u64,
    /// Requests merged into an existing queued or in-progress key
    pub merged: u64,
    /// Jobs handed to workers
    pub dispatched: u64,
    /// Renders that produced a bitmap
    pub completed: u64,
    /// Keys dropped before completing
    pub cancelled: u64,
    /// Failed rasterization attempts
    pub failed_attempts: u64,
    /// Keys that exhausted their attempts
    pub placeholders: u64,
    /// Keys currently queued
    pub queued: usize,
    /// Keys currently being rendered
    pub in_progress: usize,
}

struct Waiter {
    requester: RequesterId,
    generation: u64,
    sender: flume::Sender<RenderOutcome>,
}

impl Waiter {
    fn notify(self, outcome: RenderOutcome) {
        // A dropped ticket means nobody is listening anymore.
        let _ = self.sender.send(outcome);
    }
}

enum Phase {
    Queued,
    InProgress { job_id: u64, token: CancellationToken },
    Failed { reason: String },
}

struct KeyEntry {
    phase: Phase,
    priority: RenderPriority,
    seq: u64,
    attempts: u32,
    waiters: Vec<Waiter>,
}

struct SchedulerState {
    entries: HashMap<PageKey, KeyEntry>,
    queue: DispatchQueue,
    next_seq: u64,
    generations: HashMap<RequesterId, u64>,
    documents: HashMap<DocumentId, Arc<dyn PageSource>>,
    visible: HashMap<RequesterId, HashSet<PageKey>>,
    stats: SchedulerStats,
    shutdown: bool,
}

impl SchedulerState {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn enqueue(&mut self, key: &PageKey) {
        let seq = self.bump_seq();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.phase = Phase::Queued;
            entry.seq = seq;
            self.queue.push(entry.priority, seq, key.clone());
        }
    }

    fn refresh_counts(&mut self) {
        let mut queued = 0;
        let mut in_progress = 0;
        for entry in self.entries.values() {
            match entry.phase {
                Phase::Queued => queued += 1,
                Phase::InProgress { .. } => in_progress += 1,
                Phase::Failed { .. } => {}
            }
        }
        self.stats.queued = queued;
        self.stats.in_progress = in_progress;
    }
}

/// A claimed unit of work
///
/// Obtained from [`RenderScheduler::next_job`] and handed back through
/// [`RenderScheduler::complete`].
pub struct RenderJob {
    pub key: PageKey,
    pub source: Arc<dyn PageSource>,
    /// Pixels per point for this key's zoom bucket
    pub scale: f32,
    pub token: CancellationToken,
    pub attempt: u32,
    job_id: u64,
}

impl RenderJob {
    /// Rasterize, consulting the disk tier first and filling it afterwards
    pub fn run(&self, disk: Option<&DiskPageCache>) -> RenderResult<Bitmap> {
        if self.token.is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        if let Some(disk) = disk {
            match disk.get(&self.key) {
                Ok(Some(bitmap)) => return Ok(bitmap),
                Ok(None) => {}
                Err(e) => log::warn!("disk cache read failed for {}: {e}", self.key),
            }
        }

        let token = &self.token;
        let bitmap = self.source.rasterize(
            self.key.page,
            self.scale,
            self.key.rotation,
            &|| token.is_cancelled(),
        )?;

        if let Some(disk) = disk {
            if let Err(e) = disk.put(&self.key, &bitmap) {
                log::warn!("disk cache write failed for {}: {e}", self.key);
            }
        }
        Ok(bitmap)
    }
}

/// Deduplicating, prioritizing render scheduler
///
/// The scheduler owns no threads; a [`WorkerPool`](crate::WorkerPool)
/// drives it, or tests can drive it by hand with
/// [`next_job`](Self::next_job) and [`complete`](Self::complete).
pub struct RenderScheduler {
    state: Mutex<SchedulerState>,
    work_ready: Condvar,
    cache: RenderCache,
    disk: Option<DiskPageCache>,
    config: SchedulerConfig,
}

impl RenderScheduler {
    pub fn new(cache: RenderCache, disk: Option<DiskPageCache>, config: SchedulerConfig) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                entries: HashMap::new(),
                queue: DispatchQueue::default(),
                next_seq: 0,
                generations: HashMap::new(),
                documents: HashMap::new(),
                visible: HashMap::new(),
                stats: SchedulerStats::default(),
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            cache,
            disk,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn disk(&self) -> Option<&DiskPageCache> {
        self.disk.as_ref()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Make a document's pages renderable
    pub fn register_document(&self, id: DocumentId, source: Arc<dyn PageSource>) {
        let mut state = self.lock();
        log::debug!("registered {id} ({} pages)", source.page_count());
        state.documents.insert(id, source);
    }

    pub fn page_source(&self, id: &DocumentId) -> Option<Arc<dyn PageSource>> {
        self.lock().documents.get(id).cloned()
    }

    /// Forget a document: cancel its work and drop its cached bitmaps
    ///
    /// In-progress renders are told to stop; whatever they produce is
    /// discarded rather than cached.
    pub fn close_document(&self, id: &DocumentId) {
        let mut state = self.lock();
        state.documents.remove(id);

        let keys: Vec<PageKey> =
            state.entries.keys().filter(|key| &key.document == id).cloned().collect();
        for key in keys {
            if let Some(entry) = state.entries.remove(&key) {
                if let Phase::InProgress { token, .. } = &entry.phase {
                    token.cancel();
                }
                if !matches!(entry.phase, Phase::Failed { .. }) {
                    state.stats.cancelled += 1;
                }
                for waiter in entry.waiters {
                    waiter.notify(RenderOutcome::Cancelled { key: key.clone() });
                }
            }
        }
        for keys in state.visible.values_mut() {
            keys.retain(|key| &key.document != id);
        }
        state.refresh_counts();
        drop(state);

        self.cache.invalidate(id);
        if let Some(disk) = &self.disk {
            if let Err(e) = disk.invalidate(id) {
                log::warn!("failed to clear disk cache for {id}: {e}");
            }
        }
        self.publish_visible();
    }

    /// Latest generation seen from `requester`
    pub fn generation(&self, requester: RequesterId) -> u64 {
        self.lock().generations.get(&requester).copied().unwrap_or(0)
    }

    /// Start a new viewport generation for `requester`
    ///
    /// Waiters from older generations of this requester are dropped with a
    /// `Cancelled` outcome. Keys left with no waiters leave the queue, or
    /// have their in-progress render cancelled. Work other requesters still
    /// wait on is untouched.
    pub fn begin_generation(&self, requester: RequesterId) -> u64 {
        let mut state = self.lock();
        let generation = state.generations.get(&requester).copied().unwrap_or(0) + 1;
        state.generations.insert(requester, generation);
        self.prune_stale(&mut state, requester, generation);
        generation
    }

    fn prune_stale(&self, state: &mut SchedulerState, requester: RequesterId, generation: u64) {
        let mut abandoned = Vec::new();
        for (key, entry) in state.entries.iter_mut() {
            if matches!(entry.phase, Phase::Failed { .. }) {
                continue;
            }
            let had_waiters = !entry.waiters.is_empty();
            let (stale, keep): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut entry.waiters)
                .into_iter()
                .partition(|w| w.requester == requester && w.generation < generation);
            entry.waiters = keep;
            for waiter in stale {
                waiter.notify(RenderOutcome::Cancelled { key: key.clone() });
            }
            if had_waiters && entry.waiters.is_empty() {
                abandoned.push(key.clone());
            }
        }

        for key in abandoned {
            let queued =
                matches!(state.entries.get(&key), Some(KeyEntry { phase: Phase::Queued, .. }));
            if queued {
                state.entries.remove(&key);
                state.stats.cancelled += 1;
                self.cache.clear_pending(&key);
                log::debug!("dropped stale request {key}");
            } else if let Some(KeyEntry { phase: Phase::InProgress { token, .. }, .. }) =
                state.entries.get(&key)
            {
                token.cancel();
            }
        }
        state.refresh_counts();
    }

    /// Ask for a page to be rendered
    ///
    /// Never blocks on rasterization. The returned ticket resolves once:
    /// immediately for cache hits, stale generations and exhausted keys;
    /// otherwise when a worker finishes the key.
    ///
    /// # Errors
    /// Fails if the document is not registered or the page does not exist.
    pub fn request(&self, request: RenderRequest) -> Result<RenderTicket, ScheduleError> {
        let RenderRequest { key, priority, requester, generation } = request;
        let (sender, receiver) = flume::unbounded();
        let ticket = RenderTicket { key: key.clone(), receiver };

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.shutdown {
            return Err(ScheduleError::ShutDown);
        }

        let page_count = state
            .documents
            .get(&key.document)
            .map(|source| source.page_count())
            .ok_or_else(|| ScheduleError::UnknownDocument(key.document.clone()))?;
        if key.page >= page_count {
            return Err(ScheduleError::PageOutOfRange {
                document: key.document.clone(),
                page: key.page,
                page_count,
            });
        }

        state.stats.requests += 1;
        let waiter = Waiter { requester, generation, sender };

        let current = state.generations.get(&requester).copied().unwrap_or(0);
        if generation < current {
            waiter.notify(RenderOutcome::Cancelled { key });
            return Ok(ticket);
        }
        if generation > current {
            state.generations.insert(requester, generation);
            self.prune_stale(state, requester, generation);
        }

        if let Some(bitmap) = self.cache.get_bitmap(&key) {
            state.stats.served_from_cache += 1;
            waiter.notify(RenderOutcome::Ready { key, bitmap });
            return Ok(ticket);
        }

        let seq = state.bump_seq();
        match state.entries.get_mut(&key) {
            Some(entry) => match &entry.phase {
                Phase::Failed { reason } => {
                    waiter.notify(RenderOutcome::Placeholder { key, reason: reason.clone() });
                }
                Phase::Queued => {
                    entry.waiters.push(waiter);
                    if priority >= entry.priority {
                        entry.priority = priority;
                        entry.seq = seq;
                        state.queue.push(priority, seq, key);
                    }
                    state.stats.merged += 1;
                }
                Phase::InProgress { .. } => {
                    entry.waiters.push(waiter);
                    entry.priority = entry.priority.max(priority);
                    state.stats.merged += 1;
                }
            },
            None => {
                state.entries.insert(
                    key.clone(),
                    KeyEntry {
                        phase: Phase::Queued,
                        priority,
                        seq,
                        attempts: 0,
                        waiters: vec![waiter],
                    },
                );
                state.queue.push(priority, seq, key.clone());
                self.cache.mark_pending(&key);
                self.work_ready.notify_one();
            }
        }
        state.refresh_counts();
        Ok(ticket)
    }

    /// Re-request a key that fell back to a placeholder
    ///
    /// Returns `false` if the key was not in the failed state.
    pub fn retry(&self, key: &PageKey) -> bool {
        let mut state = self.lock();
        let failed =
            matches!(state.entries.get(key), Some(KeyEntry { phase: Phase::Failed { .. }, .. }));
        if failed {
            state.entries.remove(key);
            log::info!("manual retry for {key}");
        }
        failed
    }

    /// Replace the keys `requester` currently shows
    ///
    /// The union over all requesters is pinned in the cache.
    pub fn set_visible(&self, requester: RequesterId, keys: HashSet<PageKey>) {
        self.lock().visible.insert(requester, keys);
        self.publish_visible();
    }

    /// Drop everything a requester is waiting on (pane closed)
    pub fn release_requester(&self, requester: RequesterId) {
        let mut state = self.lock();
        state.visible.remove(&requester);
        self.prune_stale(&mut state, requester, u64::MAX);
        state.generations.remove(&requester);
        drop(state);
        self.publish_visible();
    }

    fn publish_visible(&self) {
        let union: HashSet<PageKey> = self.lock().visible.values().flatten().cloned().collect();
        self.cache.set_visible(union);
    }

    /// Claim the most urgent queued key, waiting up to `timeout` for one
    pub fn next_job(&self, timeout: Duration) -> Option<RenderJob> {
        let mut state = self.lock();
        if let Some(job) = self.claim(&mut state) {
            return Some(job);
        }
        if state.shutdown {
            return None;
        }
        state = self
            .work_ready
            .wait_timeout(state, timeout)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
        self.claim(&mut state)
    }

    fn claim(&self, state: &mut SchedulerState) -> Option<RenderJob> {
        if state.shutdown {
            return None;
        }
        let entries = &state.entries;
        let item = state.queue.pop_live(|item| {
            matches!(
                entries.get(&item.key),
                Some(entry) if matches!(entry.phase, Phase::Queued) && entry.seq == item.seq
            )
        })?;

        let source = match state.documents.get(&item.key.document) {
            Some(source) => Arc::clone(source),
            None => {
                state.entries.remove(&item.key);
                return None;
            }
        };

        let job_id = state.bump_seq();
        let token = CancellationToken::new();
        let entry = state.entries.get_mut(&item.key)?;
        entry.phase = Phase::InProgress { job_id, token: token.clone() };
        let attempt = entry.attempts + 1;
        state.stats.dispatched += 1;
        state.refresh_counts();

        Some(RenderJob {
            scale: item.key.zoom.zoom() * self.config.base_scale,
            key: item.key,
            source,
            token,
            attempt,
            job_id,
        })
    }

    /// Hand back a claimed job with its result
    pub fn complete(&self, job: RenderJob, result: RenderResult<Bitmap>) {
        let mut guard = self.lock();
        let state = &mut *guard;

        let current = matches!(
            state.entries.get(&job.key),
            Some(KeyEntry { phase: Phase::InProgress { job_id, .. }, .. }) if *job_id == job.job_id
        );
        if !current {
            // Document closed or reloaded while rendering.
            log::debug!("discarding result for {}", job.key);
            return;
        }

        match result {
            Ok(bitmap) => {
                self.cache.put(job.key.clone(), bitmap.clone());
                state.stats.completed += 1;
                if let Some(entry) = state.entries.remove(&job.key) {
                    for waiter in entry.waiters {
                        waiter.notify(RenderOutcome::Ready {
                            key: job.key.clone(),
                            bitmap: bitmap.clone(),
                        });
                    }
                }
            }
            Err(RenderError::Cancelled) => {
                let has_waiters =
                    state.entries.get(&job.key).is_some_and(|entry| !entry.waiters.is_empty());
                if has_waiters {
                    // Re-requested after the cancel reached the worker.
                    state.enqueue(&job.key);
                    self.work_ready.notify_one();
                } else {
                    state.entries.remove(&job.key);
                    state.stats.cancelled += 1;
                    self.cache.clear_pending(&job.key);
                }
            }
            Err(error) => {
                state.stats.failed_attempts += 1;
                let max_attempts = self.config.max_decode_attempts.max(1);
                let Some(entry) = state.entries.get_mut(&job.key) else {
                    return;
                };
                entry.attempts += 1;
                let attempts = entry.attempts;
                let has_waiters = !entry.waiters.is_empty();

                if attempts >= max_attempts {
                    log::error!("giving up on {} after {attempts} attempts: {error}", job.key);
                    let reason = error.to_string();
                    entry.phase = Phase::Failed { reason: reason.clone() };
                    for waiter in std::mem::take(&mut entry.waiters) {
                        waiter.notify(RenderOutcome::Placeholder {
                            key: job.key.clone(),
                            reason: reason.clone(),
                        });
                    }
                    state.stats.placeholders += 1;
                    self.cache.clear_pending(&job.key);
                } else if has_waiters {
                    log::warn!("render of {} failed (attempt {attempts}): {error}", job.key);
                    state.enqueue(&job.key);
                    self.work_ready.notify_one();
                } else {
                    state.entries.remove(&job.key);
                    self.cache.clear_pending(&job.key);
                }
            }
        }
        state.refresh_counts();
    }

    /// True if `key` is queued or being rendered
    pub fn is_pending(&self, key: &PageKey) -> bool {
        matches!(
            self.lock().entries.get(key),
            Some(KeyEntry { phase: Phase::Queued | Phase::InProgress { .. }, .. })
        )
    }

    /// True if `key` exhausted its attempts
    pub fn is_failed(&self, key: &PageKey) -> bool {
        matches!(self.lock().entries.get(key), Some(KeyEntry { phase: Phase::Failed { .. }, .. }))
    }

    pub fn stats(&self) -> SchedulerStats {
        self.lock().stats.clone()
    }

    /// Stop dispatching; every outstanding waiter receives `Cancelled`
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.shutdown = true;
        for (key, entry) in state.entries.drain() {
            if let Phase::InProgress { token, .. } = &entry.phase {
                token.cancel();
            }
            for waiter in entry.waiters {
                waiter.notify(RenderOutcome::Cancelled { key: key.clone() });
            }
        }
        state.queue.clear();
        state.refresh_counts();
        drop(state);
        self.work_ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown
    }
}
