//! Render scheduling for dualread
//!
//! Turns "show page N at zoom Z" into background rasterization jobs.
//! Identical requests share one render, visible pages jump the queue, and
//! work a viewport no longer needs is dropped or cancelled.
//!
//! # Example
//!
//! ```
//! use dualread_cache::{PageKey, RenderCache};
//! use dualread_render::{DocumentId, PageSize, Rotation, SyntheticSource};
//! use dualread_scheduler::{
//!     RenderPriority, RenderRequest, RenderScheduler, SchedulerConfig, WorkerPool,
//!     WorkerPoolConfig,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let scheduler = Arc::new(RenderScheduler::new(
//!     RenderCache::default(),
//!     None,
//!     SchedulerConfig::default(),
//! ));
//! let doc = DocumentId::new("demo");
//! let source = SyntheticSource::uniform(3, PageSize::new(200.0, 300.0));
//! scheduler.register_document(doc.clone(), Arc::new(source));
//!
//! let pool = WorkerPool::start(scheduler.clone(), WorkerPoolConfig::new(2)).unwrap();
//! let ticket = scheduler
//!     .request(RenderRequest {
//!         key: PageKey::new(doc, 0, 1.0, Rotation::Deg0),
//!         priority: RenderPriority::Visible,
//!         requester: 1,
//!         generation: 0,
//!     })
//!     .unwrap();
//!
//! let outcome = ticket.recv_timeout(Duration::from_secs(5)).unwrap();
//! assert!(outcome.bitmap().is_some());
//! pool.shutdown();
//! ```

mod cancel;
mod priority;
mod scheduler;
mod viewport;
mod worker;

pub use cancel::CancellationToken;
pub use priority::RenderPriority;
pub use scheduler::{
    RenderJob, RenderOutcome, RenderRequest, RenderScheduler, RenderTicket, RequesterId,
    ScheduleError, SchedulerConfig, SchedulerStats,
};
pub use viewport::{thumbnail_pages, PageWindow, PlannedPage, ViewportPlan};
pub use worker::{WorkerPool, WorkerPoolConfig};
