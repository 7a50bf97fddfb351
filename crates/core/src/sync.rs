//! Dual-pane scroll, zoom and rotation coordination
//!
//! The pane the user is interacting with drives the other one. When a
//! driving pane scrolls, the counterpart's target position is derived
//! through the pairing's page mapping and the driving flag is raised; scroll
//! events reported by the counterpart while the flag is up are recorded but
//! not propagated back. The UI lowers the flag with
//! [`DualViewSync::settle`] once the counterpart has finished moving.

use dualread_cache::{MAX_ZOOM, MIN_ZOOM};
use dualread_render::{DocumentId, Rotation};

use crate::pairing::{DocumentPairing, PairRole};

/// One of the two panes of a dual view
pub type Pane = PairRole;

/// Scroll position inside a paginated pane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollPosition {
    pub page: u16,
    /// Fraction of the page scrolled past, in `[0, 1)`
    pub offset: f32,
}

impl ScrollPosition {
    pub fn new(page: u16, offset: f32) -> Self {
        let offset = if offset.is_finite() { offset.clamp(0.0, 0.999_999) } else { 0.0 };
        Self { page, offset }
    }

    pub fn top_of(page: u16) -> Self {
        Self { page, offset: 0.0 }
    }
}

/// What one pane shows
#[derive(Debug, Clone, PartialEq)]
pub struct PaneCursor {
    pub document: DocumentId,
    pub page_count: u16,
    pub position: ScrollPosition,
    pub zoom: f32,
}

impl PaneCursor {
    fn new(document: DocumentId, page_count: u16) -> Self {
        Self { document, page_count, position: ScrollPosition::top_of(0), zoom: 1.0 }
    }

    fn clamp(&self, position: ScrollPosition) -> ScrollPosition {
        let last = self.page_count.saturating_sub(1);
        if position.page > last {
            ScrollPosition::new(last, 0.999_999)
        } else {
            position
        }
    }
}

/// Position the counterpart pane should move to
#[derive(Debug, Clone, PartialEq)]
pub struct SyncUpdate {
    pub pane: Pane,
    pub document: DocumentId,
    pub position: ScrollPosition,
}

/// A rotation to apply and persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationChange {
    pub document: DocumentId,
    pub page: u16,
    pub rotation: Rotation,
}

/// Keeps the two panes of a paired dual view coherent
#[derive(Debug, Clone)]
pub struct DualViewSync {
    pairing: DocumentPairing,
    primary: PaneCursor,
    secondary: PaneCursor,
    driving: Option<Pane>,
}

impl DualViewSync {
    pub fn new(pairing: DocumentPairing) -> Self {
        let primary =
            PaneCursor::new(pairing.primary().clone(), pairing.page_count(PairRole::Primary));
        let secondary =
            PaneCursor::new(pairing.secondary().clone(), pairing.page_count(PairRole::Secondary));
        Self { pairing, primary, secondary, driving: None }
    }

    pub fn pairing(&self) -> &DocumentPairing {
        &self.pairing
    }

    /// Pick up anchor or flag changes made to the pairing.
    pub fn update_pairing(&mut self, pairing: DocumentPairing) {
        self.pairing = pairing;
    }

    pub fn cursor(&self, pane: Pane) -> &PaneCursor {
        match pane {
            PairRole::Primary => &self.primary,
            PairRole::Secondary => &self.secondary,
        }
    }

    fn cursor_mut(&mut self, pane: Pane) -> &mut PaneCursor {
        match pane {
            PairRole::Primary => &mut self.primary,
            PairRole::Secondary => &mut self.secondary,
        }
    }

    /// Pane currently driving a sync, if any
    pub fn driving(&self) -> Option<Pane> {
        self.driving
    }

    pub fn on_primary_scroll(&mut self, position: ScrollPosition) -> Option<SyncUpdate> {
        self.on_scroll(PairRole::Primary, position)
    }

    pub fn on_secondary_scroll(&mut self, position: ScrollPosition) -> Option<SyncUpdate> {
        self.on_scroll(PairRole::Secondary, position)
    }

    /// Record a scroll of `pane` and derive where the other pane goes
    ///
    /// Returns `None` for echoes from the pane being driven and when the
    /// mapped page does not exist.
    pub fn on_scroll(&mut self, pane: Pane, position: ScrollPosition) -> Option<SyncUpdate> {
        let cursor = self.cursor_mut(pane);
        let position = cursor.clamp(position);
        cursor.position = position;

        if self.driving == Some(pane.other()) {
            return None;
        }

        let target_page = self.pairing.map_page(pane, position.page)?;
        let target = ScrollPosition::new(target_page, position.offset);
        let counterpart = self.cursor_mut(pane.other());
        counterpart.position = target;
        let document = counterpart.document.clone();

        self.driving = Some(pane);
        Some(SyncUpdate { pane: pane.other(), document, position: target })
    }

    /// The driven pane finished moving; either pane may drive again.
    pub fn settle(&mut self) {
        self.driving = None;
    }

    /// Multiply one pane's zoom. Zoom is never mirrored.
    pub fn on_zoom(&mut self, pane: Pane, factor: f32) -> f32 {
        let cursor = self.cursor_mut(pane);
        let zoom = cursor.zoom * factor;
        if zoom.is_finite() {
            cursor.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        cursor.zoom
    }

    pub fn set_zoom(&mut self, pane: Pane, zoom: f32) -> f32 {
        let cursor = self.cursor_mut(pane);
        if zoom.is_finite() {
            cursor.zoom = zoom.clamp(MIN_ZOOM, MAX_ZOOM);
        }
        cursor.zoom
    }

    /// Rotation changes caused by setting `page` of `pane` to `rotation`
    ///
    /// The counterpart page follows only when the pairing links rotation and
    /// the mapped page exists.
    pub fn on_rotate(&self, pane: Pane, page: u16, rotation: Rotation) -> Vec<RotationChange> {
        let cursor = self.cursor(pane);
        if page >= cursor.page_count {
            return Vec::new();
        }

        let mut changes =
            vec![RotationChange { document: cursor.document.clone(), page, rotation }];
        if self.pairing.link_rotation {
            if let Some(mapped) = self.pairing.map_page(pane, page) {
                changes.push(RotationChange {
                    document: self.cursor(pane.other()).document.clone(),
                    page: mapped,
                    rotation,
                });
            }
        }
        changes
    }
}
