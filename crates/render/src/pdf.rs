//! PDFium-backed page source
//!
//! Every call opens its own document handle, so concurrent workers never
//! share PDFium page or bitmap objects. Only the library binding itself is
//! process wide.

use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::page::{Bitmap, GlyphSpan, NormRect, PageSize, Rotation};
use crate::source::{DocumentLoader, PageSource, RenderError, RenderResult};

static PDFIUM: OnceLock<Pdfium> = OnceLock::new();

/// Bind the PDFium library once per process.
///
/// Search order:
/// 1. Executable's directory (for app bundles)
/// 2. Current working directory
/// 3. System library paths
fn pdfium() -> RenderResult<&'static Pdfium> {
    if let Some(pdfium) = PDFIUM.get() {
        return Ok(pdfium);
    }

    let exe_dir = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf));

    let bindings = exe_dir
        .and_then(|dir| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir)).ok()
        })
        .map(Ok)
        .unwrap_or_else(|| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
        })
        .map_err(|e| RenderError::Library(e.to_string()))?;

    log::debug!("bound PDFium library");
    Ok(PDFIUM.get_or_init(|| Pdfium::new(bindings)))
}

fn to_render_rotation(rotation: Rotation) -> PdfPageRenderRotation {
    match rotation {
        Rotation::Deg0 => PdfPageRenderRotation::None,
        Rotation::Deg90 => PdfPageRenderRotation::Degrees90,
        Rotation::Deg180 => PdfPageRenderRotation::Degrees180,
        Rotation::Deg270 => PdfPageRenderRotation::Degrees270,
    }
}

/// A PDF file opened through PDFium.
///
/// Page geometry is read once at open time; pixels and text are decoded on
/// demand from a fresh handle.
#[derive(Debug)]
pub struct PdfiumSource {
    path: PathBuf,
    sizes: Vec<PageSize>,
    page_count: u16,
}

impl PdfiumSource {
    /// Open a PDF and read its page geometry
    ///
    /// # Errors
    /// [`RenderError::Open`] when the file is missing or not a readable PDF
    pub fn open<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let document = Self::load(&path)?;

        let sizes = document
            .pages()
            .iter()
            .map(|page| PageSize::new(page.width().value, page.height().value))
            .collect::<Vec<_>>();
        let page_count = checked_page_count(&path, sizes.len())?;

        log::info!("opened {} ({page_count} pages)", path.display());
        Ok(Self { path, sizes, page_count })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> RenderResult<PdfDocument<'static>> {
        pdfium()?.load_pdf_from_file(path, None).map_err(|e| RenderError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn decode_error(page: u16, error: impl ToString) -> RenderError {
        RenderError::Decode { page, reason: error.to_string() }
    }
}

/// Page indices are `u16`; longer documents are refused rather than cut short.
fn checked_page_count(path: &Path, pages: usize) -> RenderResult<u16> {
    u16::try_from(pages).map_err(|_| RenderError::Open {
        path: path.to_path_buf(),
        reason: format!("{pages} pages exceeds the supported maximum of {}", u16::MAX),
    })
}

impl PageSource for PdfiumSource {
    fn page_count(&self) -> u16 {
        self.page_count
    }

    fn page_size(&self, page: u16) -> RenderResult<PageSize> {
        self.check_page(page)?;
        Ok(self.sizes[page as usize])
    }

    fn rasterize(
        &self,
        page: u16,
        scale: f32,
        rotation: Rotation,
        is_cancelled: &dyn Fn() -> bool,
    ) -> RenderResult<Bitmap> {
        self.check_page(page)?;
        if is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let document = Self::load(&self.path).map_err(|e| Self::decode_error(page, e))?;
        let pdf_page = document.pages().get(page).map_err(|e| Self::decode_error(page, e))?;
        if is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .rotate(to_render_rotation(rotation), true);

        let bitmap =
            pdf_page.render_with_config(&config).map_err(|e| Self::decode_error(page, e))?;
        if is_cancelled() {
            return Err(RenderError::Cancelled);
        }

        let width = bitmap.width().max(0) as u32;
        let height = bitmap.height().max(0) as u32;
        Bitmap::from_rgba(width, height, bitmap.as_rgba_bytes())
    }

    /// Group PDFium characters into whitespace-separated words.
    fn text_spans(&self, page: u16) -> RenderResult<Vec<GlyphSpan>> {
        self.check_page(page)?;
        let size = self.sizes[page as usize];
        let document = Self::load(&self.path).map_err(|e| Self::decode_error(page, e))?;
        let pdf_page = document.pages().get(page).map_err(|e| Self::decode_error(page, e))?;
        let text_page = pdf_page.text().map_err(|e| Self::decode_error(page, e))?;

        let mut builder = WordBuilder::new(size);
        for glyph in text_page.chars().iter() {
            let Some(c) = glyph.unicode_char() else { continue };
            let Ok(bounds) = glyph.loose_bounds() else { continue };

            if c.is_whitespace() {
                builder.finish_word();
                continue;
            }

            // PDFium reports bottom-left origin; flip to top-left.
            builder.push(
                c,
                bounds.left().value,
                size.height - bounds.top().value,
                bounds.right().value,
                size.height - bounds.bottom().value,
            );
        }
        builder.finish_word();

        Ok(builder.spans)
    }
}

/// Accumulates characters of one word and its bounding box in points.
struct WordBuilder {
    page: PageSize,
    text: String,
    bounds: Option<(f32, f32, f32, f32)>,
    spans: Vec<GlyphSpan>,
}

impl WordBuilder {
    fn new(page: PageSize) -> Self {
        Self { page, text: String::new(), bounds: None, spans: Vec::new() }
    }

    fn push(&mut self, c: char, left: f32, top: f32, right: f32, bottom: f32) {
        self.text.push(c);
        self.bounds = Some(match self.bounds {
            None => (left, top, right, bottom),
            Some((l, t, r, b)) => (l.min(left), t.min(top), r.max(right), b.max(bottom)),
        });
    }

    fn finish_word(&mut self) {
        if let Some((left, top, right, bottom)) = self.bounds.take() {
            let width = self.page.width.max(f32::EPSILON);
            let height = self.page.height.max(f32::EPSILON);
            self.spans.push(GlyphSpan {
                text: std::mem::take(&mut self.text),
                bounds: NormRect {
                    x0: (left / width).clamp(0.0, 1.0),
                    y0: (top / height).clamp(0.0, 1.0),
                    x1: (right / width).clamp(0.0, 1.0),
                    y1: (bottom / height).clamp(0.0, 1.0),
                },
            });
        }
        self.text.clear();
    }
}

/// [`DocumentLoader`] producing [`PdfiumSource`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumLoader;

impl DocumentLoader for PdfiumLoader {
    fn open(&self, path: &Path) -> RenderResult<Arc<dyn PageSource>> {
        Ok(Arc::new(PdfiumSource::open(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count_beyond_u16_is_refused() {
        let path = Path::new("/papers/huge.pdf");
        assert_eq!(checked_page_count(path, 65_535).unwrap(), u16::MAX);

        let err = checked_page_count(path, 65_536).unwrap_err();
        assert!(matches!(err, RenderError::Open { .. }));
        assert!(err.to_string().contains("65536 pages"));
    }

    #[test]
    fn test_word_builder_normalizes_and_splits() {
        let mut builder = WordBuilder::new(PageSize::new(200.0, 100.0));
        builder.push('H', 10.0, 10.0, 20.0, 20.0);
        builder.push('i', 20.0, 8.0, 30.0, 20.0);
        builder.finish_word();
        builder.finish_word();
        builder.push('x', 100.0, 50.0, 110.0, 60.0);
        builder.finish_word();

        assert_eq!(builder.spans.len(), 2);
        assert_eq!(builder.spans[0].text, "Hi");
        assert_eq!(builder.spans[0].bounds, NormRect { x0: 0.05, y0: 0.08, x1: 0.15, y1: 0.2 });
        assert_eq!(builder.spans[1].text, "x");
    }

    #[test]
    fn test_open_missing_file_fails() {
        let result = PdfiumSource::open("/nonexistent/path/to/file.pdf");
        assert!(result.is_err());
    }

    #[test]
    fn test_render_rotation_mapping() {
        assert!(matches!(to_render_rotation(Rotation::Deg0), PdfPageRenderRotation::None));
        assert!(matches!(
            to_render_rotation(Rotation::Deg270),
            PdfPageRenderRotation::Degrees270
        ));
    }
}
