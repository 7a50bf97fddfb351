//! Value types shared by every layer of the reader core.

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::source::{RenderError, RenderResult};

/// Stable identifier of an opened document.
///
/// The file layer usually supplies ids; [`DocumentId::from_path`] derives one
/// from a filesystem path when it does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(Arc<str>);

impl DocumentId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Derive an id from a path: the first 16 hex digits of the SHA-256 of
    /// the canonical path (or the path as given when it cannot be resolved).
    pub fn from_path(path: &Path) -> Self {
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let digest = Sha256::digest(resolved.to_string_lossy().as_bytes());
        let hex: String = digest.iter().take(8).map(|byte| format!("{byte:02x}")).collect();
        Self::new(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Clockwise page rotation in quarter turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] =
        [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];

    /// Parse a degree value. Any multiple of 90 is accepted and wrapped into
    /// `[0, 360)`; other values are rejected.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// One more quarter turn clockwise.
    pub fn rotate_cw(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    /// True when width and height trade places.
    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::Deg90 | Rotation::Deg270)
    }
}

/// Intrinsic page size in PDF points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Size after applying `rotation`.
    pub fn rotated(self, rotation: Rotation) -> Self {
        if rotation.is_sideways() {
            Self { width: self.height, height: self.width }
        } else {
            self
        }
    }

    /// Pixel dimensions of a raster at `scale` pixels per point.
    pub fn pixels_at(self, scale: f32, rotation: Rotation) -> (u32, u32) {
        let rotated = self.rotated(rotation);
        let width = (rotated.width * scale).round().max(1.0) as u32;
        let height = (rotated.height * scale).round().max(1.0) as u32;
        (width, height)
    }
}

/// Decoded RGBA page raster.
///
/// Pixel storage is reference counted so a bitmap can sit in the cache and
/// be handed to any number of viewers without copying.
#[derive(Debug, Clone)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Bitmap {
    /// Wrap RGBA bytes (4 bytes per pixel, row major).
    pub fn from_rgba(
        width: u32,
        height: u32,
        pixels: impl Into<Arc<[u8]>>,
    ) -> RenderResult<Self> {
        let pixels = pixels.into();
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(RenderError::InvalidBitmap { expected, actual: pixels.len() });
        }
        Ok(Self { width, height, pixels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Decoded size in bytes; this is what the cache budget counts.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// True if both bitmaps share the same pixel allocation.
    pub fn same_pixels(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

/// Axis-aligned rectangle in page-normalized coordinates.
///
/// Origin is the top-left corner of the unrotated page; both axes run over
/// `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormRect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl NormRect {
    /// Build from two arbitrary corners, e.g. the start and end of a drag.
    pub fn from_corners(a: (f32, f32), b: (f32, f32)) -> Self {
        Self { x0: a.0.min(b.0), y0: a.1.min(b.1), x1: a.0.max(b.0), y1: a.1.max(b.1) }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) * 0.5
    }

    pub fn intersects(&self, other: &NormRect) -> bool {
        self.x0 <= other.x1 && other.x0 <= self.x1 && self.y0 <= other.y1 && other.y0 <= self.y1
    }
}

/// A run of text on a page with its normalized bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphSpan {
    pub text: String,
    pub bounds: NormRect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_from_degrees_wraps() {
        assert_eq!(Rotation::from_degrees(0), Some(Rotation::Deg0));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::Deg270));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn test_rotation_cycles_clockwise() {
        let mut rotation = Rotation::Deg0;
        for expected in [90, 180, 270, 0] {
            rotation = rotation.rotate_cw();
            assert_eq!(rotation.degrees(), expected);
        }
    }

    #[test]
    fn test_page_size_pixels_swap_when_sideways() {
        let size = PageSize::new(600.0, 800.0);
        assert_eq!(size.pixels_at(1.0, Rotation::Deg0), (600, 800));
        assert_eq!(size.pixels_at(0.5, Rotation::Deg90), (400, 300));
    }

    #[test]
    fn test_bitmap_rejects_wrong_length() {
        let err = Bitmap::from_rgba(2, 2, vec![0u8; 15]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidBitmap { expected: 16, actual: 15 }));
    }

    #[test]
    fn test_bitmap_clone_shares_pixels() {
        let bitmap = Bitmap::from_rgba(1, 1, vec![1, 2, 3, 4]).unwrap();
        let copy = bitmap.clone();
        assert!(copy.same_pixels(&bitmap));
        assert_eq!(copy.byte_len(), 4);
    }

    #[test]
    fn test_document_id_from_path_is_stable() {
        let a = DocumentId::from_path(Path::new("/tmp/does-not-exist/paper.pdf"));
        let b = DocumentId::from_path(Path::new("/tmp/does-not-exist/paper.pdf"));
        let c = DocumentId::from_path(Path::new("/tmp/does-not-exist/other.pdf"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }

    #[test]
    fn test_norm_rect_from_corners_orders_edges() {
        let rect = NormRect::from_corners((0.8, 0.1), (0.2, 0.5));
        assert_eq!(rect, NormRect { x0: 0.2, y0: 0.1, x1: 0.8, y1: 0.5 });
        assert!(rect.intersects(&NormRect { x0: 0.7, y0: 0.4, x1: 0.9, y1: 0.9 }));
        assert!(!rect.intersects(&NormRect { x0: 0.81, y0: 0.0, x1: 0.9, y1: 0.1 }));
    }

    proptest::proptest! {
        #[test]
        fn test_quarter_turn_swaps_pixel_dimensions(
            width in 1.0f32..2000.0,
            height in 1.0f32..2000.0,
            scale in 0.1f32..4.0,
        ) {
            let size = PageSize::new(width, height);
            let (w, h) = size.pixels_at(scale, Rotation::Deg0);
            proptest::prop_assert_eq!(size.pixels_at(scale, Rotation::Deg90), (h, w));
            proptest::prop_assert_eq!(size.pixels_at(scale, Rotation::Deg180), (w, h));
        }
    }
}
