//! Per-page rotation state
//!
//! Rotation belongs to a document page, not to a pane or a pairing. Pages at
//! 0° are not stored.

use dualread_render::Rotation;
use std::collections::BTreeMap;

/// Sparse page → rotation map for one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationState {
    pages: BTreeMap<u16, Rotation>,
}

impl RotationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, page: u16) -> Rotation {
        self.pages.get(&page).copied().unwrap_or_default()
    }

    /// Set a page's rotation. Returns the previous value.
    pub fn set(&mut self, page: u16, rotation: Rotation) -> Rotation {
        let previous = match rotation {
            Rotation::Deg0 => self.pages.remove(&page),
            other => self.pages.insert(page, other),
        };
        previous.unwrap_or_default()
    }

    /// Turn a page 90° clockwise and return its new rotation.
    pub fn rotate_cw(&mut self, page: u16) -> Rotation {
        let next = self.get(page).rotate_cw();
        self.set(page, next);
        next
    }

    /// Rotated pages in page order
    pub fn iter(&self) -> impl Iterator<Item = (u16, Rotation)> + '_ {
        self.pages.iter().map(|(page, rotation)| (*page, *rotation))
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Degrees per rotated page, the persisted form
    pub fn to_degrees(&self) -> BTreeMap<u16, u16> {
        self.iter().map(|(page, rotation)| (page, rotation.degrees())).collect()
    }

    /// Rebuild from persisted degrees, skipping values that are not quadrants.
    pub fn from_degrees(degrees: &BTreeMap<u16, u16>) -> Self {
        let mut state = Self::new();
        for (page, value) in degrees {
            match Rotation::from_degrees(i32::from(*value)) {
                Some(rotation) => {
                    state.set(*page, rotation);
                }
                None => log::warn!("ignoring rotation {value} for page {page}"),
            }
        }
        state
    }

    /// Drop rotations for pages at or beyond `page_count`.
    pub fn truncate(&mut self, page_count: u16) {
        self.pages.retain(|page, _| *page < page_count);
    }
}
