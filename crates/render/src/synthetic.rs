//! Deterministic in-memory page source used by tests across the workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::page::{Bitmap, GlyphSpan, PageSize, Rotation};
use crate::source::{DocumentLoader, PageSource, RenderError, RenderResult};

#[derive(Debug, Default)]
struct Faults {
    /// Remaining failures per page; `u32::MAX` fails forever.
    failing: HashMap<u16, u32>,
    held: bool,
}

/// A fake document with fixed page sizes and scripted behaviour.
///
/// Pixels are filled with the page index so tests can tell rasters apart.
#[derive(Debug)]
pub struct SyntheticSource {
    sizes: Vec<PageSize>,
    spans: HashMap<u16, Vec<GlyphSpan>>,
    faults: Mutex<Faults>,
    gate: Condvar,
    row_delay: Duration,
    renders: AtomicUsize,
    text_loads: AtomicUsize,
}

impl SyntheticSource {
    pub fn uniform(page_count: u16, size: PageSize) -> Self {
        Self::with_sizes(vec![size; page_count as usize])
    }

    pub fn with_sizes(sizes: Vec<PageSize>) -> Self {
        Self {
            sizes,
            spans: HashMap::new(),
            faults: Mutex::new(Faults::default()),
            gate: Condvar::new(),
            row_delay: Duration::ZERO,
            renders: AtomicUsize::new(0),
            text_loads: AtomicUsize::new(0),
        }
    }

    pub fn with_spans(mut self, page: u16, spans: Vec<GlyphSpan>) -> Self {
        self.spans.insert(page, spans);
        self
    }

    /// Sleep this long per raster row, giving cancellation something to hit.
    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    /// Fail the next `times` rasterizations of `page`.
    pub fn fail_page(&self, page: u16, times: u32) {
        self.lock().failing.insert(page, times);
    }

    /// Block every rasterization at its first checkpoint until [`release`](Self::release).
    pub fn hold(&self) {
        self.lock().held = true;
    }

    pub fn release(&self) {
        self.lock().held = false;
        self.gate.notify_all();
    }

    /// Number of rasterizations that produced a bitmap.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn text_load_count(&self) -> usize {
        self.text_loads.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_for_gate(&self, is_cancelled: &dyn Fn() -> bool) -> RenderResult<()> {
        let mut faults = self.lock();
        while faults.held {
            if is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            faults = self
                .gate
                .wait_timeout(faults, Duration::from_millis(5))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(())
    }
}

impl PageSource for SyntheticSource {
    fn page_count(&self) -> u16 {
        self.sizes.len() as u16
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
        self.wait_for_gate(is_cancelled)?;

        {
            let mut faults = self.lock();
            if let Some(remaining) = faults.failing.get_mut(&page) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(RenderError::Decode { page, reason: "scripted failure".into() });
                }
            }
        }

        let (width, height) = self.sizes[page as usize].pixels_at(scale, rotation);
        let row = vec![page as u8; width as usize * 4];
        let mut pixels = Vec::with_capacity(row.len() * height as usize);
        for _ in 0..height {
            if is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            if !self.row_delay.is_zero() {
                std::thread::sleep(self.row_delay);
            }
            pixels.extend_from_slice(&row);
        }

        self.renders.fetch_add(1, Ordering::SeqCst);
        Bitmap::from_rgba(width, height, pixels)
    }

    fn text_spans(&self, page: u16) -> RenderResult<Vec<GlyphSpan>> {
        self.check_page(page)?;
        self.text_loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.spans.get(&page).cloned().unwrap_or_default())
    }
}

/// Loader resolving registered paths to synthetic sources.
#[derive(Debug, Default)]
pub struct SyntheticLoader {
    sources: Mutex<HashMap<PathBuf, Arc<SyntheticSource>>>,
}

impl SyntheticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        path: impl Into<PathBuf>,
        source: SyntheticSource,
    ) -> Arc<SyntheticSource> {
        let source = Arc::new(source);
        self.sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), Arc::clone(&source));
        source
    }
}

impl DocumentLoader for SyntheticLoader {
    fn open(&self, path: &Path) -> RenderResult<Arc<dyn PageSource>> {
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        match sources.get(path) {
            Some(source) => Ok(Arc::clone(source) as Arc<dyn PageSource>),
            None => Err(RenderError::Open {
                path: path.to_path_buf(),
                reason: "no such synthetic document".into(),
            }),
        }
    }
}
