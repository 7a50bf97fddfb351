//! Debounced persistence of document records
//!
//! The UI thread hands over a snapshot of a document's record after every
//! mutation. The snapshot is written once no newer one has arrived for the
//! debounce window, or once the oldest unwritten change reaches the maximum
//! debounce age. A failed write stays pending and is retried on a later
//! tick; after a configurable number of consecutive failures one
//! [`FlushWarning`] is emitted for the document.

use dualread_render::DocumentId;
use std::collections::HashMap;
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Condvar, Mutex, MutexGuard, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::AnnotationConfig;
use crate::persistence::{DocumentRecord, MetadataRecord, PersistenceError, RecordStore};

/// Timing for the flush coordinator
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Quiet time after the last change before writing
    pub debounce: Duration,
    /// Upper bound on how long a change may stay unwritten
    pub max_debounce: Duration,
    /// Consecutive failures before a warning is emitted
    pub warn_after_failures: u32,
    /// How often the background thread looks for due writes
    pub check_interval: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self::from(&AnnotationConfig::default())
    }
}

impl From<&AnnotationConfig> for FlushConfig {
    fn from(config: &AnnotationConfig) -> Self {
        let debounce = Duration::from_millis(config.debounce_ms);
        Self {
            debounce,
            max_debounce: Duration::from_millis(config.max_debounce_ms).max(debounce),
            warn_after_failures: config.warn_after_failures.max(1),
            check_interval: (debounce / 4)
                .clamp(Duration::from_millis(10), Duration::from_millis(250)),
        }
    }
}

/// Repeated persistence failure for one document
#[derive(Debug, Clone, PartialEq)]
pub struct FlushWarning {
    pub document: DocumentId,
    pub failures: u32,
    pub error: String,
}

#[derive(Debug)]
struct PendingWrite {
    record: DocumentRecord,
    /// Only `record.metadata` may be written
    metadata_only: bool,
    first_marked_at: Instant,
    last_marked_at: Instant,
    revision: u64,
    failures: u32,
}

impl PendingWrite {
    fn is_due(&self, now: Instant, config: &FlushConfig) -> bool {
        now.saturating_duration_since(self.last_marked_at) >= config.debounce
            || now.saturating_duration_since(self.first_marked_at) >= config.max_debounce
    }
}

struct FlushInner {
    config: FlushConfig,
    store: Arc<dyn RecordStore>,
    pending: Mutex<HashMap<DocumentId, PendingWrite>>,
    /// Serializes writes so an older snapshot never lands after a newer one.
    writing: Mutex<()>,
    warnings: flume::Sender<FlushWarning>,
    stop: AtomicBool,
    stop_signal: Condvar,
    stop_lock: Mutex<()>,
}

impl FlushInner {
    fn pending(&self) -> MutexGuard<'_, HashMap<DocumentId, PendingWrite>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the given documents' current snapshots.
    fn write(
        &self,
        documents: Vec<DocumentId>,
        now: Instant,
    ) -> Vec<(DocumentId, PersistenceError)> {
        let _writing = self.writing.lock().unwrap_or_else(PoisonError::into_inner);
        let mut failed = Vec::new();

        for document in documents {
            let snapshot = self
                .pending()
                .get(&document)
                .map(|pending| (pending.record.clone(), pending.metadata_only, pending.revision));
            let Some((record, metadata_only, revision)) = snapshot else {
                continue;
            };

            let result = if metadata_only {
                self.store.save_metadata(&document, &record.metadata)
            } else {
                self.store.save(&document, &record)
            };

            let mut pending = self.pending();
            match result {
                Ok(()) => {
                    let superseded =
                        pending.get(&document).is_some_and(|entry| entry.revision != revision);
                    if superseded {
                        if let Some(entry) = pending.get_mut(&document) {
                            entry.failures = 0;
                        }
                    } else {
                        pending.remove(&document);
                    }
                    log::debug!("saved records for {document}");
                }
                Err(error) => {
                    let Some(entry) = pending.get_mut(&document) else {
                        continue;
                    };
                    entry.failures += 1;
                    entry.first_marked_at = now;
                    entry.last_marked_at = now;
                    let failures = entry.failures;
                    drop(pending);

                    if failures == self.config.warn_after_failures {
                        log::warn!("saving {document} failed {failures} times in a row: {error}");
                        let _ = self.warnings.send(FlushWarning {
                            document: document.clone(),
                            failures,
                            error: error.to_string(),
                        });
                    } else {
                        log::debug!("saving {document} failed (attempt {failures}): {error}");
                    }
                    failed.push((document, error));
                }
            }
        }
        failed
    }
}

/// Coalesces record snapshots and writes them in the background
pub struct FlushCoordinator {
    inner: Arc<FlushInner>,
    thread: Option<JoinHandle<()>>,
}

impl FlushCoordinator {
    /// Coordinator without a background thread; call [`tick`](Self::tick)
    /// to write due records.
    pub fn manual(
        store: Arc<dyn RecordStore>,
        config: FlushConfig,
        warnings: flume::Sender<FlushWarning>,
    ) -> Self {
        let inner = Arc::new(FlushInner {
            config,
            store,
            pending: Mutex::new(HashMap::new()),
            writing: Mutex::new(()),
            warnings,
            stop: AtomicBool::new(false),
            stop_signal: Condvar::new(),
            stop_lock: Mutex::new(()),
        });
        Self { inner, thread: None }
    }

    /// Coordinator with a background thread ticking every
    /// `config.check_interval`.
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        config: FlushConfig,
        warnings: flume::Sender<FlushWarning>,
    ) -> io::Result<Self> {
        let mut coordinator = Self::manual(store, config, warnings);
        let inner = Arc::clone(&coordinator.inner);
        let thread = thread::Builder::new()
            .name("dualread-flush".into())
            .spawn(move || run_flusher(&inner))?;
        coordinator.thread = Some(thread);
        Ok(coordinator)
    }

    pub fn config(&self) -> &FlushConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    /// Replace the pending snapshot for `document`.
    pub fn mark_dirty(&self, document: &DocumentId, record: DocumentRecord) {
        self.mark(document, record, false);
    }

    /// Queue a metadata write that leaves the stored annotations alone
    ///
    /// A full snapshot already pending for `document` keeps its annotations
    /// and takes the new metadata.
    pub fn mark_metadata_dirty(&self, document: &DocumentId, metadata: MetadataRecord) {
        let record = DocumentRecord { metadata, ..DocumentRecord::default() };
        self.mark(document, record, true);
    }

    fn mark(&self, document: &DocumentId, record: DocumentRecord, metadata_only: bool) {
        let now = Instant::now();
        let mut pending = self.inner.pending();
        match pending.get_mut(document) {
            Some(entry) => {
                if metadata_only && !entry.metadata_only {
                    entry.record.metadata = record.metadata;
                } else {
                    entry.record = record;
                    entry.metadata_only = metadata_only;
                }
                entry.last_marked_at = now;
                entry.revision += 1;
            }
            None => {
                pending.insert(
                    document.clone(),
                    PendingWrite {
                        record,
                        metadata_only,
                        first_marked_at: now,
                        last_marked_at: now,
                        revision: 0,
                        failures: 0,
                    },
                );
            }
        }
    }

    pub fn is_dirty(&self, document: &DocumentId) -> bool {
        self.inner.pending().contains_key(document)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Write every record that is due at `now`. Returns how many were saved.
    pub fn tick(&self, now: Instant) -> usize {
        let due: Vec<DocumentId> = self
            .inner
            .pending()
            .iter()
            .filter(|(_, pending)| pending.is_due(now, &self.inner.config))
            .map(|(document, _)| document.clone())
            .collect();
        let attempted = due.len();
        let failed = self.inner.write(due, now).len();
        attempted - failed
    }

    /// Write `document` now if it has unsaved changes
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    /// The write error; the snapshot stays pending.
    pub fn flush(&self, document: &DocumentId) -> Result<bool, PersistenceError> {
        if !self.is_dirty(document) {
            return Ok(false);
        }
        match self.inner.write(vec![document.clone()], Instant::now()).pop() {
            Some((_, error)) => Err(error),
            None => Ok(true),
        }
    }

    /// Write everything pending, regardless of debounce
    pub fn flush_all(&self) -> Vec<(DocumentId, PersistenceError)> {
        let documents: Vec<DocumentId> = self.inner.pending().keys().cloned().collect();
        self.inner.write(documents, Instant::now())
    }

    /// Drop a pending snapshot without writing it
    pub fn discard(&self, document: &DocumentId) -> bool {
        self.inner.pending().remove(document).is_some()
    }
}

impl Drop for FlushCoordinator {
    fn drop(&mut self) {
        {
            let _guard = self.inner.stop_lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.inner.stop.store(true, Ordering::Release);
            self.inner.stop_signal.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("flush thread panicked");
            }
        }
        for (document, error) in self.flush_all() {
            log::error!("unsaved changes for {document} lost: {error}");
        }
    }
}

fn run_flusher(inner: &FlushInner) {
    let interval = inner.config.check_interval;
    loop {
        {
            let guard = inner.stop_lock.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.stop.load(Ordering::Acquire) {
                break;
            }
            let _ = inner
                .stop_signal
                .wait_timeout(guard, interval)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if inner.stop.load(Ordering::Acquire) {
            break;
        }

        let now = Instant::now();
        let due: Vec<DocumentId> = inner
            .pending()
            .iter()
            .filter(|(_, pending)| pending.is_due(now, &inner.config))
            .map(|(document, _)| document.clone())
            .collect();
        if !due.is_empty() {
            inner.write(due, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceResult;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<HashMap<DocumentId, DocumentRecord>>,
        writes: AtomicUsize,
        metadata_writes: AtomicUsize,
        failing: AtomicBool,
    }

    impl RecordStore for MemoryStore {
        fn load(&self, document: &DocumentId) -> PersistenceResult<DocumentRecord> {
            Ok(self.saved.lock().unwrap().get(document).cloned().unwrap_or_default())
        }

        fn save(&self, document: &DocumentId, record: &DocumentRecord) -> PersistenceResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(PersistenceError::Io {
                    path: PathBuf::from("/read-only"),
                    source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.saved.lock().unwrap().insert(document.clone(), record.clone());
            Ok(())
        }

        fn save_metadata(
            &self,
            document: &DocumentId,
            metadata: &MetadataRecord,
        ) -> PersistenceResult<()> {
            self.metadata_writes.fetch_add(1, Ordering::SeqCst);
            let mut saved = self.saved.lock().unwrap();
            saved.entry(document.clone()).or_default().metadata = metadata.clone();
            Ok(())
        }
    }

    fn config() -> FlushConfig {
        FlushConfig {
            debounce: Duration::from_millis(100),
            max_debounce: Duration::from_millis(500),
            warn_after_failures: 3,
            check_interval: Duration::from_millis(10),
        }
    }

    fn record(path: &str) -> DocumentRecord {
        let mut record = DocumentRecord::default();
        record.metadata.path = Some(PathBuf::from(path));
        record
    }

    fn manual() -> (FlushCoordinator, Arc<MemoryStore>, flume::Receiver<FlushWarning>) {
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = flume::unbounded();
        (FlushCoordinator::manual(store.clone(), config(), tx), store, rx)
    }

    #[test]
    fn test_flush_config_from_annotation_config() {
        let config = FlushConfig::from(&AnnotationConfig {
            debounce_ms: 750,
            max_debounce_ms: 100,
            warn_after_failures: 0,
        });
        assert_eq!(config.debounce, Duration::from_millis(750));
        assert_eq!(config.max_debounce, Duration::from_millis(750));
        assert_eq!(config.warn_after_failures, 1);
    }

    #[test]
    fn test_rapid_changes_coalesce() {
        let (flusher, store, _rx) = manual();
        let doc = DocumentId::new("doc");
        let start = Instant::now();

        flusher.mark_dirty(&doc, record("a"));
        flusher.mark_dirty(&doc, record("b"));
        flusher.mark_dirty(&doc, record("c"));
        assert_eq!(flusher.tick(start), 0, "still inside the debounce window");

        assert_eq!(flusher.tick(start + Duration::from_millis(200)), 1);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.load(&doc).unwrap(), record("c"));
        assert!(!flusher.is_dirty(&doc));
    }

    #[test]
    fn test_max_debounce_forces_write() {
        let (flusher, store, _rx) = manual();
        let doc = DocumentId::new("doc");
        flusher.mark_dirty(&doc, record("a"));
        // Pretend the document has been changing continuously.
        flusher.inner.pending().get_mut(&doc).unwrap().first_marked_at -=
            Duration::from_millis(600);
        flusher.mark_dirty(&doc, record("b"));

        assert_eq!(flusher.tick(Instant::now()), 1);
        assert_eq!(store.load(&doc).unwrap(), record("b"));
    }

    #[test]
    fn test_forced_flush_ignores_debounce() {
        let (flusher, store, _rx) = manual();
        let doc = DocumentId::new("doc");

        assert!(!flusher.flush(&doc).unwrap());
        flusher.mark_dirty(&doc, record("a"));
        assert!(flusher.flush(&doc).unwrap());
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failures_retried_and_warned_once() {
        let (flusher, store, warnings) = manual();
        let doc = DocumentId::new("doc");
        store.failing.store(true, Ordering::SeqCst);
        flusher.mark_dirty(&doc, record("a"));

        let mut now = Instant::now();
        for _ in 0..5 {
            now += Duration::from_millis(200);
            assert_eq!(flusher.tick(now), 0);
            assert!(flusher.is_dirty(&doc));
        }

        let warning = warnings.try_recv().unwrap();
        assert_eq!(warning.document, doc);
        assert_eq!(warning.failures, 3);
        assert!(warnings.try_recv().is_err(), "warned only once");

        store.failing.store(false, Ordering::SeqCst);
        now += Duration::from_millis(200);
        assert_eq!(flusher.tick(now), 1);
        assert_eq!(store.load(&doc).unwrap(), record("a"));
    }

    #[test]
    fn test_flush_all_reports_failures() {
        let (flusher, store, _rx) = manual();
        flusher.mark_dirty(&DocumentId::new("a"), record("a"));
        flusher.mark_dirty(&DocumentId::new("b"), record("b"));
        store.failing.store(true, Ordering::SeqCst);

        assert_eq!(flusher.flush_all().len(), 2);
        assert_eq!(flusher.pending_count(), 2);
        assert!(flusher.discard(&DocumentId::new("a")));
        assert_eq!(flusher.pending_count(), 1);
    }

    #[test]
    fn test_drop_flushes_pending() {
        let store = Arc::new(MemoryStore::default());
        let (tx, _rx) = flume::unbounded();
        let doc = DocumentId::new("doc");
        {
            let flusher = FlushCoordinator::manual(store.clone(), config(), tx);
            flusher.mark_dirty(&doc, record("final"));
        }
        assert_eq!(store.load(&doc).unwrap(), record("final"));
    }

    #[test]
    fn test_background_thread_writes_after_debounce() {
        let store = Arc::new(MemoryStore::default());
        let (tx, _rx) = flume::unbounded();
        let flusher = FlushCoordinator::spawn(store.clone(), config(), tx).unwrap();
        let doc = DocumentId::new("doc");
        flusher.mark_dirty(&doc, record("a"));

        let deadline = Instant::now() + Duration::from_secs(5);
        while flusher.is_dirty(&doc) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!flusher.is_dirty(&doc));
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_metadata_only_write_keeps_stored_annotations() {
        let (flusher, store, _rx) = manual();
        let doc = DocumentId::new("doc");
        let mut stored = record("old");
        stored.annotations.pages.insert(0, Vec::new());
        store.saved.lock().unwrap().insert(doc.clone(), stored.clone());

        flusher.mark_metadata_dirty(&doc, record("new").metadata);
        assert!(flusher.flush(&doc).unwrap());

        assert_eq!(store.writes.load(Ordering::SeqCst), 0);
        assert_eq!(store.metadata_writes.load(Ordering::SeqCst), 1);
        let saved = store.load(&doc).unwrap();
        assert_eq!(saved.annotations, stored.annotations);
        assert_eq!(saved.metadata, record("new").metadata);
    }

    #[test]
    fn test_metadata_change_merges_into_pending_full_write() {
        let (flusher, store, _rx) = manual();
        let doc = DocumentId::new("doc");
        let mut full = record("a");
        full.annotations.pages.insert(3, Vec::new());

        flusher.mark_dirty(&doc, full.clone());
        flusher.mark_metadata_dirty(&doc, record("b").metadata);
        assert!(flusher.flush(&doc).unwrap());

        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
        assert_eq!(store.metadata_writes.load(Ordering::SeqCst), 0);
        let saved = store.load(&doc).unwrap();
        assert_eq!(saved.annotations, full.annotations);
        assert_eq!(saved.metadata, record("b").metadata);
    }
}
