//! Dualread Cache Library
//!
//! Page raster caching: a byte-bounded RAM cache with LRU eviction and
//! visibility pinning, plus an optional persistent disk tier.

pub mod config;
pub mod disk;
pub mod key;
pub mod ram;

pub use config::{CacheConfig, CacheConfigError};
pub use disk::{DiskCacheStats, DiskPageCache};
pub use key::{PageKey, ZoomBucket, MAX_ZOOM, MIN_ZOOM, ZOOM_STEP_PERCENT};
pub use ram::{CacheEntry, CacheStats, EntryState, RenderCache};
