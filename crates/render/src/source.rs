//! Backend seam: anything that can hand out page sizes, rasters and text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::page::{Bitmap, GlyphSpan, PageSize, Rotation};

/// Errors raised while opening or decoding a document
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The PDF backend library could not be loaded
    #[error("PDF backend initialization error: {0}")]
    Library(String),

    /// The file is missing, unreadable or not a PDF
    #[error("failed to open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: u16, page_count: u16 },

    /// The backend failed on one page; other pages are unaffected
    #[error("failed to decode page {page}: {reason}")]
    Decode { page: u16, reason: String },

    #[error("bitmap buffer has {actual} bytes, expected {expected}")]
    InvalidBitmap { expected: usize, actual: usize },

    /// The caller asked us to stop; not a failure of the page
    #[error("render cancelled")]
    Cancelled,
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// An opened, read-only document.
///
/// Implementations must tolerate concurrent calls from several worker
/// threads. `rasterize` receives a cancellation check that it polls between
/// decoding steps; once the check reports `true` it should return
/// [`RenderError::Cancelled`] at its next checkpoint.
pub trait PageSource: Send + Sync {
    fn page_count(&self) -> u16;

    fn page_size(&self, page: u16) -> RenderResult<PageSize>;

    /// Render `page` at `scale` pixels per point, rotated clockwise.
    fn rasterize(
        &self,
        page: u16,
        scale: f32,
        rotation: Rotation,
        is_cancelled: &dyn Fn() -> bool,
    ) -> RenderResult<Bitmap>;

    /// Text runs with page-normalized bounds, in discovery order.
    fn text_spans(&self, page: u16) -> RenderResult<Vec<GlyphSpan>>;

    fn check_page(&self, page: u16) -> RenderResult<()> {
        let page_count = self.page_count();
        if page >= page_count {
            return Err(RenderError::PageOutOfRange { page, page_count });
        }
        Ok(())
    }
}

/// Opens documents by path.
pub trait DocumentLoader: Send + Sync {
    fn open(&self, path: &Path) -> RenderResult<Arc<dyn PageSource>>;
}
