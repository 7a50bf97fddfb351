//! Dualread Render Library
//!
//! Page rasterization behind the [`PageSource`] trait, plus the value types
//! (document ids, rotations, bitmaps, normalized rectangles) the rest of the
//! reader core is built on.

pub mod page;
#[cfg(feature = "pdfium")]
pub mod pdf;
pub mod source;
#[cfg(any(test, feature = "test-support"))]
pub mod synthetic;

pub use page::{Bitmap, DocumentId, GlyphSpan, NormRect, PageSize, Rotation};
#[cfg(feature = "pdfium")]
pub use pdf::{PdfiumLoader, PdfiumSource};
pub use source::{DocumentLoader, PageSource, RenderError, RenderResult};
#[cfg(any(test, feature = "test-support"))]
pub use synthetic::{SyntheticLoader, SyntheticSource};
