//! Highlight annotations
//!
//! Strokes are stored in page-normalized coordinates: `(0, 0)` is the
//! top-left corner of the unrotated page and `(1, 1)` the bottom-right. A
//! stroke's radius is a fraction of the unrotated page width. Nothing stored
//! depends on zoom or rotation; [`PageTransform`] maps strokes into a pane's
//! pixel space when drawing.
//!
//! Erasing is destructive. Marks hit by an eraser are cut where the eraser
//! passed and the surviving pieces replace them.

use dualread_render::{DocumentId, PageSize, Rotation};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::pairing::DocumentPairing;

/// Stable stroke identifier, kept in saved files
pub type StrokeId = Uuid;

/// Smallest brush width in pane pixels
pub const MIN_BRUSH_WIDTH: f32 = 1.0;
/// Largest brush width in pane pixels
pub const MAX_BRUSH_WIDTH: f32 = 50.0;
/// Brush width used until the user changes it
pub const DEFAULT_BRUSH_WIDTH: f32 = 25.0;

/// Page-normalized coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn lerp(&self, other: &Point, t: f32) -> Point {
        Point::new(self.x + (other.x - self.x) * t, self.y + (other.y - self.y) * t)
    }

    fn clamped(self) -> Point {
        Point::new(self.x.clamp(0.0, 1.0), self.y.clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeKind {
    Mark,
    Erase,
}

/// RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Translucent yellow
    pub const HIGHLIGHT: Color = Color { r: 255, g: 255, b: 0, a: 100 };

    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::HIGHLIGHT
    }
}

/// One brush stroke
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    pub kind: StrokeKind,
    #[serde(default)]
    pub color: Color,
    /// Brush radius as a fraction of page width
    pub radius: f32,
    pub points: Vec<Point>,
}

impl Stroke {
    /// New highlight stroke. Points are clamped onto the page.
    pub fn mark(color: Color, radius: f32, points: Vec<Point>) -> Self {
        Self::with_kind(StrokeKind::Mark, color, radius, points)
    }

    /// New eraser stroke
    pub fn erase(radius: f32, points: Vec<Point>) -> Self {
        Self::with_kind(StrokeKind::Erase, Color::default(), radius, points)
    }

    fn with_kind(kind: StrokeKind, color: Color, radius: f32, points: Vec<Point>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            color,
            radius: radius.max(0.0),
            points: points.into_iter().map(Point::clamped).collect(),
        }
    }

    pub fn is_mark(&self) -> bool {
        self.kind == StrokeKind::Mark
    }

    /// Copy of this stroke with the surviving `points` and a fresh id
    fn piece(&self, points: Vec<Point>) -> Stroke {
        Stroke { id: Uuid::new_v4(), points, ..self.clone() }
    }
}

fn distance_to_segment(p: &Point, a: &Point, b: &Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq <= f32::EPSILON {
        return p.distance_to(a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance_to(&a.lerp(b, t))
}

fn distance_to_path(p: &Point, path: &[Point]) -> f32 {
    match path {
        [] => f32::INFINITY,
        [only] => p.distance_to(only),
        _ => path
            .windows(2)
            .map(|seg| distance_to_segment(p, &seg[0], &seg[1]))
            .fold(f32::INFINITY, f32::min),
    }
}

/// Points along `path` no further than `step` apart, ends included.
fn resample(path: &[Point], step: f32) -> Vec<Point> {
    let Some(first) = path.first() else {
        return Vec::new();
    };
    let mut samples = vec![*first];
    for seg in path.windows(2) {
        let length = seg[0].distance_to(&seg[1]);
        let pieces = if step > 0.0 { (length / step).ceil().max(1.0) as usize } else { 1 };
        for i in 1..=pieces {
            samples.push(seg[0].lerp(&seg[1], i as f32 / pieces as f32));
        }
    }
    samples
}

fn bounds(points: &[Point]) -> Option<(Point, Point)> {
    let first = *points.first()?;
    Some(points.iter().fold((first, first), |(min, max), p| {
        (Point::new(min.x.min(p.x), min.y.min(p.y)), Point::new(max.x.max(p.x), max.y.max(p.y)))
    }))
}

/// Cut `mark` with an eraser capsule along `eraser`
///
/// `aspect` is the page's height over its width. Distances are measured in
/// page-width units, the unit both radii are stored in. A stretch of the
/// mark is removed where its ink disk touches the eraser.
///
/// `None` if the eraser misses; otherwise the surviving pieces (possibly
/// none).
fn cut_mark(mark: &Stroke, eraser: &[Point], radius: f32, aspect: f32) -> Option<Vec<Stroke>> {
    let to_ink = |p: &Point| Point { x: p.x, y: p.y * aspect };
    let from_ink = |p: Point| Point { x: p.x, y: p.y / aspect };
    let eraser: Vec<Point> = eraser.iter().map(to_ink).collect();
    let ink: Vec<Point> = mark.points.iter().map(to_ink).collect();
    let reach = radius + mark.radius;
    let hit = |p: &Point| distance_to_path(p, &eraser) <= reach;

    let (min, max) = bounds(&ink)?;
    let (eraser_min, eraser_max) = bounds(&eraser)?;
    if eraser_min.x - reach > max.x
        || eraser_max.x + reach < min.x
        || eraser_min.y - reach > max.y
        || eraser_max.y + reach < min.y
    {
        return None;
    }

    let samples = resample(&ink, mark.radius / 2.0);
    if !samples.iter().any(hit) {
        return None;
    }

    let mut pieces = Vec::new();
    let mut run = Vec::new();
    for sample in samples {
        if hit(&sample) {
            if !run.is_empty() {
                pieces.push(mark.piece(std::mem::take(&mut run)));
            }
        } else {
            run.push(from_ink(sample));
        }
    }
    if !run.is_empty() {
        pieces.push(mark.piece(run));
    }
    Some(pieces)
}

/// In-memory annotation state for every open document
///
/// Intended for a single writer (the UI thread). Persistence works from
/// snapshots taken with [`AnnotationStore::pages`].
#[derive(Debug, Default)]
pub struct AnnotationStore {
    documents: HashMap<DocumentId, BTreeMap<u16, Vec<Stroke>>>,
    /// Height over width per page; pages without a size erase as squares
    aspects: HashMap<DocumentId, Vec<f32>>,
}

impl AnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strokes on a page, in drawing order
    pub fn strokes(&self, document: &DocumentId, page: u16) -> &[Stroke] {
        self.documents
            .get(document)
            .and_then(|pages| pages.get(&page))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace a document's strokes with a loaded set.
    pub fn load_document(&mut self, document: DocumentId, pages: BTreeMap<u16, Vec<Stroke>>) {
        self.documents.insert(document, pages);
    }

    /// Record page geometry so erasing measures true distances on the page
    pub fn set_page_sizes(&mut self, document: &DocumentId, sizes: &[PageSize]) {
        let aspects = sizes
            .iter()
            .map(|size| {
                let aspect = size.height / size.width;
                if aspect.is_finite() && aspect > 0.0 {
                    aspect
                } else {
                    1.0
                }
            })
            .collect();
        self.aspects.insert(document.clone(), aspects);
    }

    fn aspect(&self, document: &DocumentId, page: u16) -> f32 {
        self.aspects
            .get(document)
            .and_then(|aspects| aspects.get(usize::from(page)))
            .copied()
            .unwrap_or(1.0)
    }

    /// Every non-empty page of a document
    pub fn pages(&self, document: &DocumentId) -> BTreeMap<u16, Vec<Stroke>> {
        self.documents
            .get(document)
            .map(|pages| {
                pages
                    .iter()
                    .filter(|(_, strokes)| !strokes.is_empty())
                    .map(|(page, strokes)| (*page, strokes.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_document(&mut self, document: &DocumentId) -> bool {
        self.aspects.remove(document);
        self.documents.remove(document).is_some()
    }

    /// Add a stroke to a page
    ///
    /// Erase strokes are applied with [`erase_along`](Self::erase_along)
    /// instead of being stored. Returns whether anything changed; a mark
    /// whose id is already on the page is not added twice.
    pub fn append_stroke(&mut self, document: &DocumentId, page: u16, stroke: Stroke) -> bool {
        match stroke.kind {
            StrokeKind::Erase => {
                self.erase_along(document, page, &stroke.points, stroke.radius) > 0
            }
            StrokeKind::Mark => {
                if stroke.points.is_empty() {
                    return false;
                }
                let strokes =
                    self.documents.entry(document.clone()).or_default().entry(page).or_default();
                if strokes.iter().any(|existing| existing.id == stroke.id) {
                    return false;
                }
                strokes.push(stroke);
                true
            }
        }
    }

    /// Erase around one point. Returns the number of marks cut or removed.
    pub fn erase_at(
        &mut self,
        document: &DocumentId,
        page: u16,
        point: Point,
        radius: f32,
    ) -> usize {
        self.erase_along(document, page, &[point], radius)
    }

    /// Erase along a path. Returns the number of marks cut or removed.
    pub fn erase_along(
        &mut self,
        document: &DocumentId,
        page: u16,
        path: &[Point],
        radius: f32,
    ) -> usize {
        let aspect = self.aspect(document, page);
        let strokes = self.documents.get_mut(document).and_then(|pages| pages.get_mut(&page));
        let Some(strokes) = strokes else {
            return 0;
        };

        let mut touched = 0;
        let mut result = Vec::with_capacity(strokes.len());
        for stroke in strokes.drain(..) {
            if !stroke.is_mark() {
                result.push(stroke);
                continue;
            }
            match cut_mark(&stroke, path, radius, aspect) {
                Some(pieces) => {
                    touched += 1;
                    result.extend(pieces);
                }
                None => result.push(stroke),
            }
        }
        *strokes = result;
        touched
    }

    /// Apply `stroke`, drawn on `page` of `from`, to the paired document
    ///
    /// The copy keeps the stroke's id. Returns the target document and page,
    /// or `None` when `from` is not in `pairing` or the mapped page does not
    /// exist.
    pub fn mirror_to(
        &mut self,
        pairing: &DocumentPairing,
        from: &DocumentId,
        page: u16,
        stroke: &Stroke,
    ) -> Option<(DocumentId, u16)> {
        let role = pairing.role_of(from)?;
        let target_page = pairing.map_page(role, page)?;
        let target = pairing.document(role.other()).clone();
        self.append_stroke(&target, target_page, stroke.clone());
        Some((target, target_page))
    }

    /// Remove every stroke of one page
    pub fn clear_page(&mut self, document: &DocumentId, page: u16) -> bool {
        self.documents
            .get_mut(document)
            .and_then(|pages| pages.remove(&page))
            .is_some_and(|strokes| !strokes.is_empty())
    }

    /// Remove every stroke of a document, keeping it loaded
    pub fn clear_document(&mut self, document: &DocumentId) -> bool {
        self.documents
            .get_mut(document)
            .map(|pages| {
                let had_strokes = pages.values().any(|strokes| !strokes.is_empty());
                pages.clear();
                had_strokes
            })
            .unwrap_or(false)
    }

    pub fn stroke_count(&self, document: &DocumentId) -> usize {
        self.documents.get(document).map(|pages| pages.values().map(Vec::len).sum()).unwrap_or(0)
    }
}

/// Maps page-normalized points into a pane's pixel space and back
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    /// Unrotated page width in pixels
    width: f32,
    /// Unrotated page height in pixels
    height: f32,
    rotation: Rotation,
}

impl PageTransform {
    /// `scale` is pixels per PDF point at the pane's zoom.
    pub fn new(size: PageSize, scale: f32, rotation: Rotation) -> Self {
        Self { width: size.width * scale, height: size.height * scale, rotation }
    }

    /// Displayed size, after rotation
    pub fn output_size(&self) -> (f32, f32) {
        if self.rotation.is_sideways() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    pub fn project(&self, point: Point) -> (f32, f32) {
        let Point { x, y } = point;
        let (u, v) = match self.rotation {
            Rotation::Deg0 => (x, y),
            Rotation::Deg90 => (1.0 - y, x),
            Rotation::Deg180 => (1.0 - x, 1.0 - y),
            Rotation::Deg270 => (y, 1.0 - x),
        };
        let (w, h) = self.output_size();
        (u * w, v * h)
    }

    pub fn unproject(&self, px: f32, py: f32) -> Point {
        let (w, h) = self.output_size();
        let u = if w > 0.0 { px / w } else { 0.0 };
        let v = if h > 0.0 { py / h } else { 0.0 };
        let (x, y) = match self.rotation {
            Rotation::Deg0 => (u, v),
            Rotation::Deg90 => (v, 1.0 - u),
            Rotation::Deg180 => (1.0 - u, 1.0 - v),
            Rotation::Deg270 => (1.0 - v, u),
        };
        Point::new(x, y)
    }

    pub fn radius_to_pixels(&self, radius: f32) -> f32 {
        radius * self.width
    }

    pub fn pixels_to_radius(&self, pixels: f32) -> f32 {
        if self.width > 0.0 {
            pixels / self.width
        } else {
            0.0
        }
    }

    /// A stroke's points in pane pixels
    pub fn project_stroke(&self, stroke: &Stroke) -> Vec<(f32, f32)> {
        stroke.points.iter().map(|p| self.project(*p)).collect()
    }
}

/// Current brush of the annotation tool
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushSettings {
    pub color: Color,
    width: f32,
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self { color: Color::HIGHLIGHT, width: DEFAULT_BRUSH_WIDTH }
    }
}

impl BrushSettings {
    /// Brush width (diameter) in pane pixels
    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_width(&mut self, width: f32) -> f32 {
        if width.is_finite() {
            self.width = width.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH);
        }
        self.width
    }

    pub fn grow(&mut self) -> f32 {
        self.set_width(self.width + 1.0)
    }

    pub fn shrink(&mut self) -> f32 {
        self.set_width(self.width - 1.0)
    }

    /// Page-normalized stroke radius for this brush in `transform`'s pane
    pub fn radius_on(&self, transform: &PageTransform) -> f32 {
        transform.pixels_to_radius(self.width / 2.0)
    }

    /// Highlight stroke from pane pixel positions
    pub fn mark_from_pixels(&self, transform: &PageTransform, pixels: &[(f32, f32)]) -> Stroke {
        let points = pixels.iter().map(|(x, y)| transform.unproject(*x, *y)).collect();
        Stroke::mark(self.color, self.radius_on(transform), points)
    }

    /// Eraser stroke from pane pixel positions
    pub fn erase_from_pixels(&self, transform: &PageTransform, pixels: &[(f32, f32)]) -> Stroke {
        let points = pixels.iter().map(|(x, y)| transform.unproject(*x, *y)).collect();
        Stroke::erase(self.radius_on(transform), points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentId {
        DocumentId::new("doc")
    }

    fn line(y: f32, radius: f32) -> Stroke {
        Stroke::mark(Color::HIGHLIGHT, radius, vec![Point::new(0.1, y), Point::new(0.9, y)])
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_append_keeps_order() {
        let mut store = AnnotationStore::new();
        let first = line(0.2, 0.01);
        let second = line(0.4, 0.01);
        assert!(store.append_stroke(&doc(), 0, first.clone()));
        assert!(store.append_stroke(&doc(), 0, second.clone()));

        assert_eq!(store.strokes(&doc(), 0), &[first, second]);
        assert!(store.strokes(&doc(), 1).is_empty());
    }

    #[test]
    fn test_points_clamped_onto_page() {
        let stroke = Stroke::mark(Color::HIGHLIGHT, 0.01, vec![Point::new(-0.5, 1.5)]);
        assert_eq!(stroke.points, vec![Point::new(0.0, 1.0)]);
    }

    #[test]
    fn test_duplicate_id_and_empty_marks_ignored() {
        let mut store = AnnotationStore::new();
        let stroke = line(0.2, 0.01);
        assert!(store.append_stroke(&doc(), 0, stroke.clone()));
        assert!(!store.append_stroke(&doc(), 0, stroke));
        assert!(!store.append_stroke(&doc(), 0, Stroke::mark(Color::HIGHLIGHT, 0.01, vec![])));
        assert_eq!(store.stroke_count(&doc()), 1);
    }

    #[test]
    fn test_eraser_along_path_removes_mark() {
        let mut store = AnnotationStore::new();
        let mark = line(0.5, 0.02);
        store.append_stroke(&doc(), 3, mark.clone());

        let eraser = Stroke::erase(0.02, mark.points.clone());
        assert!(store.append_stroke(&doc(), 3, eraser));
        assert!(store.strokes(&doc(), 3).is_empty());
    }

    #[test]
    fn test_eraser_splits_mark() {
        let mut store = AnnotationStore::new();
        let mark = line(0.5, 0.02);
        store.append_stroke(&doc(), 0, mark.clone());

        assert_eq!(store.erase_at(&doc(), 0, Point::new(0.5, 0.5), 0.05), 1);

        let pieces = store.strokes(&doc(), 0);
        assert_eq!(pieces.len(), 2);
        assert!(pieces.iter().all(|p| p.id != mark.id && p.color == mark.color));
        assert!(pieces[0].points.iter().all(|p| p.x <= 0.451));
        assert!(pieces[1].points.iter().all(|p| p.x >= 0.549));
        assert!(approx(pieces[0].points[0].x, 0.1));
        assert!(approx(pieces[1].points.last().unwrap().x, 0.9));
    }

    #[test]
    fn test_eraser_miss_leaves_mark_untouched() {
        let mut store = AnnotationStore::new();
        let mark = line(0.2, 0.01);
        store.append_stroke(&doc(), 0, mark.clone());

        assert_eq!(store.erase_at(&doc(), 0, Point::new(0.5, 0.8), 0.05), 0);
        assert_eq!(store.strokes(&doc(), 0), &[mark]);
    }

    #[test]
    fn test_eraser_catches_long_segment_between_points() {
        let mut store = AnnotationStore::new();
        // Two far-apart points; the eraser only touches the middle.
        store.append_stroke(&doc(), 0, line(0.5, 0.01));
        assert_eq!(store.erase_at(&doc(), 0, Point::new(0.5, 0.51), 0.02), 1);
        assert_eq!(store.strokes(&doc(), 0).len(), 2);
    }

    #[test]
    fn test_eraser_grazing_ink_edge_cuts_mark() {
        let mut store = AnnotationStore::new();
        store.set_page_sizes(&doc(), &[PageSize::new(612.0, 792.0)]);
        store.append_stroke(&doc(), 0, line(0.5, 0.02));

        // Centrelines are 0.025 page heights apart; the two ink bands overlap.
        assert_eq!(store.erase_at(&doc(), 0, Point::new(0.5, 0.525), 0.02), 1);
        assert_eq!(store.strokes(&doc(), 0).len(), 2);
    }

    #[test]
    fn test_eraser_reach_follows_page_aspect() {
        let mut store = AnnotationStore::new();
        store.set_page_sizes(&doc(), &[PageSize::new(612.0, 792.0), PageSize::new(792.0, 612.0)]);
        let mark = line(0.5, 0.005);
        store.append_stroke(&doc(), 0, mark.clone());
        store.append_stroke(&doc(), 1, mark.clone());

        // 0.022 page heights is 0.0285 page widths on a portrait page, out of
        // reach of 0.02 + 0.005; on a landscape page it is 0.017, in reach.
        assert_eq!(store.erase_at(&doc(), 0, Point::new(0.5, 0.522), 0.02), 0);
        assert_eq!(store.strokes(&doc(), 0), &[mark]);
        assert_eq!(store.erase_at(&doc(), 1, Point::new(0.5, 0.522), 0.02), 1);
    }

    #[test]
    fn test_erase_on_empty_page() {
        let mut store = AnnotationStore::new();
        assert_eq!(store.erase_at(&doc(), 0, Point::new(0.5, 0.5), 0.1), 0);
    }

    #[test]
    fn test_mirror_through_pairing() {
        let a = DocumentId::new("a");
        let b = DocumentId::new("b");
        let pairing = DocumentPairing::new(a.clone(), 10, b.clone(), 8);
        let mut store = AnnotationStore::new();
        let stroke = line(0.3, 0.01);

        store.append_stroke(&a, 9, stroke.clone());
        assert_eq!(store.mirror_to(&pairing, &a, 9, &stroke), Some((b.clone(), 7)));
        assert_eq!(store.strokes(&b, 7)[0].id, stroke.id);

        // Mirroring from the secondary side maps back.
        let other = line(0.6, 0.01);
        assert_eq!(store.mirror_to(&pairing, &b, 7, &other), Some((a.clone(), 9)));
    }

    #[test]
    fn test_mirror_out_of_range_skipped() {
        let a = DocumentId::new("a");
        let b = DocumentId::new("b");
        let pairing = DocumentPairing::new(a.clone(), 4, b.clone(), 0);
        let mut store = AnnotationStore::new();

        assert_eq!(store.mirror_to(&pairing, &a, 1, &line(0.3, 0.01)), None);
        assert_eq!(store.mirror_to(&pairing, &DocumentId::new("x"), 1, &line(0.3, 0.01)), None);
        assert_eq!(store.stroke_count(&b), 0);
    }

    #[test]
    fn test_clear_page_and_document() {
        let mut store = AnnotationStore::new();
        store.append_stroke(&doc(), 0, line(0.2, 0.01));
        store.append_stroke(&doc(), 1, line(0.2, 0.01));

        assert!(store.clear_page(&doc(), 0));
        assert!(!store.clear_page(&doc(), 0));
        assert_eq!(store.stroke_count(&doc()), 1);

        assert!(store.clear_document(&doc()));
        assert!(store.pages(&doc()).is_empty());
    }

    #[test]
    fn test_transform_round_trip_all_rotations() {
        let size = PageSize::new(200.0, 100.0);
        let point = Point::new(0.25, 0.75);
        for rotation in Rotation::ALL {
            let transform = PageTransform::new(size, 2.0, rotation);
            let (px, py) = transform.project(point);
            let back = transform.unproject(px, py);
            assert!(approx(back.x, point.x) && approx(back.y, point.y), "{rotation:?}");
        }
    }

    #[test]
    fn test_transform_rotates_clockwise() {
        let transform = PageTransform::new(PageSize::new(100.0, 200.0), 1.0, Rotation::Deg90);
        assert_eq!(transform.output_size(), (200.0, 100.0));
        // Top-left corner ends up top-right.
        assert_eq!(transform.project(Point::new(0.0, 0.0)), (200.0, 0.0));
        assert_eq!(transform.project(Point::new(1.0, 0.0)), (200.0, 100.0));
    }

    #[test]
    fn test_radius_independent_of_zoom() {
        let size = PageSize::new(600.0, 800.0);
        let brush = BrushSettings::default();
        let near = PageTransform::new(size, 2.0, Rotation::Deg0);
        let far = PageTransform::new(size, 1.0, Rotation::Deg0);

        let stroke = brush.mark_from_pixels(&near, &[(600.0, 800.0)]);
        assert!(approx(stroke.radius, 12.5 / 1200.0));
        assert!(approx(far.radius_to_pixels(stroke.radius), 6.25));
        assert_eq!(stroke.points, vec![Point::new(0.5, 0.5)]);
    }

    #[test]
    fn test_brush_width_clamped() {
        let mut brush = BrushSettings::default();
        assert_eq!(brush.width(), DEFAULT_BRUSH_WIDTH);
        assert_eq!(brush.set_width(80.0), MAX_BRUSH_WIDTH);
        assert_eq!(brush.grow(), MAX_BRUSH_WIDTH);
        assert_eq!(brush.set_width(1.0), MIN_BRUSH_WIDTH);
        assert_eq!(brush.shrink(), MIN_BRUSH_WIDTH);
    }

    #[test]
    fn test_stroke_json_shape() {
        let stroke = Stroke::mark(Color::HIGHLIGHT, 0.01, vec![Point::new(0.5, 0.25)]);
        let json = serde_json::to_value(&stroke).unwrap();
        assert_eq!(json["kind"], "mark");
        assert_eq!(json["color"]["a"], 100);
        assert_eq!(json["points"][0]["y"], 0.25);
    }
}
