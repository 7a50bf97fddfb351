//! Text selection over page glyph boxes
//!
//! Spans are pulled from the page source the first time a page is queried
//! and kept, in reading order, for as long as the document stays open.

use dualread_render::{GlyphSpan, NormRect, PageSource, RenderResult};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A run of text with its position in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub page: u16,
    pub bounds: NormRect,
    pub text: String,
    /// Visual line index on the page, top line is 0
    pub line: u32,
}

/// Lazily built per-page span index for one document
pub struct TextSpanIndex {
    source: Arc<dyn PageSource>,
    pages: Mutex<HashMap<u16, Arc<[TextSpan]>>>,
}

impl std::fmt::Debug for TextSpanIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextSpanIndex").field("built_pages", &self.lock().len()).finish()
    }
}

impl TextSpanIndex {
    pub fn new(source: Arc<dyn PageSource>) -> Self {
        Self { source, pages: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Arc<[TextSpan]>>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_built(&self, page: u16) -> bool {
        self.lock().contains_key(&page)
    }

    /// All spans of `page` in reading order, building the page on first use
    ///
    /// # Errors
    /// Out-of-range pages and text extraction failures. A failed page is
    /// not cached and will be retried on the next call.
    pub fn page(&self, page: u16) -> RenderResult<Arc<[TextSpan]>> {
        if let Some(spans) = self.lock().get(&page) {
            return Ok(Arc::clone(spans));
        }

        let glyphs = self.source.text_spans(page)?;
        let spans: Arc<[TextSpan]> = reading_order(page, glyphs).into();
        log::debug!("indexed {} text spans on page {page}", spans.len());

        let mut pages = self.lock();
        Ok(Arc::clone(pages.entry(page).or_insert(spans)))
    }

    /// Spans of `page` overlapping `rect`, in reading order
    pub fn spans_intersecting(&self, page: u16, rect: &NormRect) -> RenderResult<Vec<TextSpan>> {
        Ok(self.page(page)?.iter().filter(|span| span.bounds.intersects(rect)).cloned().collect())
    }

    /// Plain text under `rect`, see [`join_spans`]
    pub fn selected_text(&self, page: u16, rect: &NormRect) -> RenderResult<String> {
        Ok(join_spans(&self.spans_intersecting(page, rect)?))
    }
}

/// Join spans into plain text: a space within a line, a newline between
/// lines.
pub fn join_spans(spans: &[TextSpan]) -> String {
    let mut text = String::new();
    let mut previous: Option<(u16, u32)> = None;
    for span in spans {
        let position = (span.page, span.line);
        match previous {
            Some(prev) if prev == position => text.push(' '),
            Some(_) => text.push('\n'),
            None => {}
        }
        text.push_str(span.text.trim());
        previous = Some(position);
    }
    text
}

fn by_top(a: &GlyphSpan, b: &GlyphSpan) -> Ordering {
    a.bounds.y0.total_cmp(&b.bounds.y0).then(a.bounds.x0.total_cmp(&b.bounds.x0))
}

/// Group glyph runs into visual lines, top to bottom, and order each line
/// left to right.
///
/// A run joins the current line when its vertical centre falls inside the
/// line's band.
fn reading_order(page: u16, mut glyphs: Vec<GlyphSpan>) -> Vec<TextSpan> {
    glyphs.retain(|glyph| !glyph.text.trim().is_empty());
    glyphs.sort_by(by_top);

    let mut lines: Vec<(f32, f32, Vec<GlyphSpan>)> = Vec::new();
    for glyph in glyphs {
        let center = glyph.bounds.center_y();
        match lines.last_mut() {
            Some((top, bottom, members)) if center >= *top && center <= *bottom => {
                *bottom = bottom.max(glyph.bounds.y1);
                members.push(glyph);
            }
            _ => lines.push((glyph.bounds.y0, glyph.bounds.y1, vec![glyph])),
        }
    }

    let mut spans = Vec::new();
    for (line, (_, _, mut members)) in lines.into_iter().enumerate() {
        members.sort_by(|a, b| a.bounds.x0.total_cmp(&b.bounds.x0));
        spans.extend(members.into_iter().map(|glyph| TextSpan {
            page,
            bounds: glyph.bounds,
            text: glyph.text,
            line: line as u32,
        }));
    }
    spans
}
