//! Render worker pool
//!
//! Workers pull jobs from a shared [`RenderScheduler`], rasterize them, and
//! hand the result back. Notifications to waiters are sent from the worker
//! thread that finished the job.

use crate::scheduler::{RenderScheduler, SchedulerConfig};
use std::io;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Configuration for the render worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads to spawn.
    pub num_workers: usize,

    /// Maximum time an idle worker waits for a job before checking shutdown.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for WorkerPoolConfig {
    fn from(config: &SchedulerConfig) -> Self {
        Self { num_workers: config.worker_count(), poll_interval: config.poll_interval() }
    }
}

impl WorkerPoolConfig {
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers, ..Self::default() }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Fixed set of render threads driving one scheduler
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    scheduler: Arc<RenderScheduler>,
}

impl WorkerPool {
    /// Spawn `config.num_workers` threads (at least one).
    ///
    /// # Errors
    /// Fails if the OS refuses to spawn a thread; threads already started
    /// are stopped before returning.
    pub fn start(scheduler: Arc<RenderScheduler>, config: WorkerPoolConfig) -> io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let count = config.num_workers.max(1);
        let mut pool = Self {
            workers: Vec::with_capacity(count),
            shutdown: shutdown.clone(),
            scheduler: scheduler.clone(),
        };

        for id in 0..count {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            let poll_interval = config.poll_interval;
            let spawned = thread::Builder::new()
                .name(format!("dualread-render-worker-{id}"))
                .spawn(move || run_worker(&scheduler, &shutdown, poll_interval));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.stop();
                    return Err(e);
                }
            }
        }

        log::debug!("started {count} render workers");
        Ok(pool)
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn scheduler(&self) -> &Arc<RenderScheduler> {
        &self.scheduler
    }

    /// Stop the scheduler and wait for every worker to exit.
    ///
    /// Renders in progress are cancelled at their next checkpoint.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.shutdown();
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("render worker").to_string();
            if handle.join().is_err() {
                log::error!("{name} panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

fn run_worker(scheduler: &RenderScheduler, shutdown: &AtomicBool, poll_interval: Duration) {
    while !shutdown.load(Ordering::Acquire) {
        let Some(job) = scheduler.next_job(poll_interval) else {
            continue;
        };
        let result = job.run(scheduler.disk());
        scheduler.complete(job, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RenderOutcome, RenderPriority, RenderRequest};
    use dualread_cache::{DiskPageCache, PageKey, RenderCache};
    use dualread_render::{DocumentId, PageSize, Rotation, SyntheticSource};
    use std::sync::Barrier;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn scheduler_with(
        source: Arc<SyntheticSource>,
        disk: Option<DiskPageCache>,
    ) -> Arc<RenderScheduler> {
        let scheduler = RenderScheduler::new(
            RenderCache::new(64 * 1024 * 1024),
            disk,
            SchedulerConfig { base_scale: 0.1, ..Default::default() },
        );
        scheduler.register_document(DocumentId::new("doc"), source);
        Arc::new(scheduler)
    }

    fn key(page: u16) -> PageKey {
        PageKey::new(DocumentId::new("doc"), page, 1.0, Rotation::Deg0)
    }

    fn visible(page: u16, requester: u64) -> RenderRequest {
        let priority = RenderPriority::Visible;
        RenderRequest { key: key(page), priority, requester, generation: 0 }
    }

    fn pool(scheduler: &Arc<RenderScheduler>, workers: usize) -> WorkerPool {
        let config = WorkerPoolConfig::new(workers).with_poll_interval(Duration::from_millis(10));
        WorkerPool::start(scheduler.clone(), config).unwrap()
    }

    #[test]
    fn test_worker_pool_config_from_scheduler_config() {
        let config = WorkerPoolConfig::from(&SchedulerConfig {
            workers: 3,
            poll_interval_ms: 50,
            ..Default::default()
        });
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert!(WorkerPoolConfig::default().num_workers > 0);
    }

    #[test]
    fn test_pool_renders_requests() {
        let source = Arc::new(SyntheticSource::uniform(5, PageSize::new(100.0, 100.0)));
        let scheduler = scheduler_with(source.clone(), None);
        let pool = pool(&scheduler, 2);

        let tickets: Vec<_> =
            (0..5).map(|page| scheduler.request(visible(page, 1)).unwrap()).collect();
        for ticket in tickets {
            let outcome = ticket.recv_timeout(TIMEOUT).expect("render finished");
            assert!(matches!(outcome, RenderOutcome::Ready { .. }));
        }
        assert_eq!(source.render_count(), 5);
        pool.shutdown();
    }

    #[test]
    fn test_concurrent_duplicate_requests_render_once() {
        let source = Arc::new(SyntheticSource::uniform(10, PageSize::new(100.0, 100.0)));
        source.hold();
        let scheduler = scheduler_with(source.clone(), None);
        let pool = pool(&scheduler, 4);

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|requester| {
                let scheduler = scheduler.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    scheduler.request(visible(3, requester)).unwrap()
                })
            })
            .collect();
        let tickets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        source.release();
        let bitmaps: Vec<_> = tickets
            .into_iter()
            .map(|t| t.recv_timeout(TIMEOUT).and_then(|o| o.bitmap().cloned()).unwrap())
            .collect();

        assert_eq!(source.render_count(), 1);
        assert!(bitmaps.windows(2).all(|pair| pair[0].same_pixels(&pair[1])));
        pool.shutdown();
    }

    #[test]
    fn test_disk_tier_filled_and_reused() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(SyntheticSource::uniform(2, PageSize::new(100.0, 100.0)));
        let disk = DiskPageCache::new(dir.path(), 16 * 1024 * 1024).unwrap();
        let scheduler = scheduler_with(source.clone(), Some(disk));
        let pool = pool(&scheduler, 1);

        let ticket = scheduler.request(visible(1, 1)).unwrap();
        assert!(ticket.recv_timeout(TIMEOUT).is_some());
        assert!(scheduler.disk().unwrap().contains(&key(1)));

        scheduler.cache().clear();
        let ticket = scheduler.request(visible(1, 1)).unwrap();
        assert!(matches!(ticket.recv_timeout(TIMEOUT), Some(RenderOutcome::Ready { .. })));
        assert_eq!(source.render_count(), 1, "second render came from disk");
        pool.shutdown();
    }

    #[test]
    fn test_shutdown_cancels_held_render() {
        let source = Arc::new(SyntheticSource::uniform(2, PageSize::new(100.0, 100.0)));
        source.hold();
        let scheduler = scheduler_with(source.clone(), None);
        let pool = pool(&scheduler, 1);

        let ticket = scheduler.request(visible(0, 1)).unwrap();
        pool.shutdown();

        assert!(matches!(ticket.recv_timeout(TIMEOUT), Some(RenderOutcome::Cancelled { .. })));
        assert_eq!(source.render_count(), 0);
        assert!(scheduler.is_shut_down());
    }

    #[test]
    fn test_drop_stops_workers() {
        let source = Arc::new(SyntheticSource::uniform(1, PageSize::new(10.0, 10.0)));
        let scheduler = scheduler_with(source, None);
        {
            let pool = pool(&scheduler, 2);
            assert_eq!(pool.num_workers(), 2);
            assert!(!pool.is_shutting_down());
        }
        assert!(scheduler.is_shut_down());
    }
}
