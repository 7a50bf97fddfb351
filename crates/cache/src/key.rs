//! Cache keys for rendered pages
//!
//! A page raster is identified by its document, page index, quantized zoom
//! and rotation. Quantizing zoom keeps small zoom jitter (pinch gestures,
//! fit-to-width recomputation) from producing new keys.

use dualread_render::{DocumentId, Rotation};
use std::fmt;

/// Smallest zoom factor a pane may use
pub const MIN_ZOOM: f32 = 0.2;

/// Largest zoom factor a pane may use
pub const MAX_ZOOM: f32 = 10.0;

/// Width of one zoom bucket in percent
pub const ZOOM_STEP_PERCENT: u16 = 5;

/// Zoom level quantized to a multiple of [`ZOOM_STEP_PERCENT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoomBucket(u16);

impl ZoomBucket {
    /// Quantize a continuous zoom factor (1.0 = 100%).
    ///
    /// The factor is clamped to `[MIN_ZOOM, MAX_ZOOM]` first, so every bucket
    /// lies in `[20, 1000]` percent. Non-finite input maps to 100%.
    pub fn from_zoom(zoom: f32) -> Self {
        let zoom = if zoom.is_finite() { zoom.clamp(MIN_ZOOM, MAX_ZOOM) } else { 1.0 };
        let step = f32::from(ZOOM_STEP_PERCENT);
        let percent = ((zoom * 100.0) / step).round() * step;
        Self(percent as u16)
    }

    pub fn from_percent(percent: u16) -> Self {
        Self::from_zoom(f32::from(percent) / 100.0)
    }

    pub fn percent(self) -> u16 {
        self.0
    }

    /// The representative zoom factor of this bucket.
    pub fn zoom(self) -> f32 {
        f32::from(self.0) / 100.0
    }
}

impl Default for ZoomBucket {
    fn default() -> Self {
        Self(100)
    }
}

/// Identifies one cached page raster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageKey {
    pub document: DocumentId,
    pub page: u16,
    pub zoom: ZoomBucket,
    pub rotation: Rotation,
}

impl PageKey {
    pub fn new(document: DocumentId, page: u16, zoom: f32, rotation: Rotation) -> Self {
        Self { document, page, zoom: ZoomBucket::from_zoom(zoom), rotation }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{}@{}%/{}",
            self.document,
            self.page,
            self.zoom.percent(),
            self.rotation.degrees()
        )
    }
}
