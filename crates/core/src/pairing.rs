//! Original/translation document pairing
//!
//! A pairing links one primary document to one secondary document and
//! decides which secondary page corresponds to a primary page. The policy,
//! in order of precedence:
//!
//! 1. an explicit anchor set by the user shifts pages by a fixed offset
//! 2. identical page counts map by index
//! 3. otherwise pages map proportionally, rounding half up
//!
//! Every policy is monotonic: a later source page never maps to an earlier
//! target page.

use dualread_render::DocumentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};

/// Which side of a pairing a document (or pane) is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairRole {
    Primary,
    Secondary,
}

impl PairRole {
    pub fn other(self) -> Self {
        match self {
            PairRole::Primary => PairRole::Secondary,
            PairRole::Secondary => PairRole::Primary,
        }
    }
}

/// A user-confirmed page correspondence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAnchor {
    pub primary_page: u16,
    pub secondary_page: u16,
}

/// How pages are currently being mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingPolicy {
    Anchored(PageAnchor),
    Identity,
    Proportional,
}

/// Map `page` of a `from_count`-page document onto a `to_count`-page one.
///
/// Uses integer round-half-up, so page 9 of 10 maps to page 7 of 8.
///
/// ```
/// use dualread_core::pairing::proportional_page;
///
/// assert_eq!(proportional_page(9, 10, 8), 7);
/// assert_eq!(proportional_page(0, 10, 8), 0);
/// assert_eq!(proportional_page(0, 1, 8), 0);
/// ```
pub fn proportional_page(page: u16, from_count: u16, to_count: u16) -> u16 {
    if from_count <= 1 || to_count <= 1 {
        return 0;
    }
    let page = u64::from(page.min(from_count - 1));
    let span_from = u64::from(from_count - 1);
    let span_to = u64::from(to_count - 1);
    let mapped = (2 * page * span_to + span_from) / (2 * span_from);
    mapped as u16
}

fn anchored_page(page: u16, from_anchor: u16, to_anchor: u16, to_count: u16) -> u16 {
    let shifted = i32::from(page) + i32::from(to_anchor) - i32::from(from_anchor);
    shifted.clamp(0, i32::from(to_count) - 1) as u16
}

/// Relationship between an original document and its translation
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPairing {
    primary: DocumentId,
    secondary: DocumentId,
    primary_pages: u16,
    secondary_pages: u16,
    anchor: Option<PageAnchor>,
    /// Mirror page rotations onto the counterpart
    pub link_rotation: bool,
    /// Mirror annotation strokes onto the counterpart
    pub mirror_annotations: bool,
}

impl DocumentPairing {
    pub fn new(
        primary: DocumentId,
        primary_pages: u16,
        secondary: DocumentId,
        secondary_pages: u16,
    ) -> Self {
        Self {
            primary,
            secondary,
            primary_pages,
            secondary_pages,
            anchor: None,
            link_rotation: false,
            mirror_annotations: false,
        }
    }

    pub fn primary(&self) -> &DocumentId {
        &self.primary
    }

    pub fn secondary(&self) -> &DocumentId {
        &self.secondary
    }

    pub fn document(&self, role: PairRole) -> &DocumentId {
        match role {
            PairRole::Primary => &self.primary,
            PairRole::Secondary => &self.secondary,
        }
    }

    pub fn page_count(&self, role: PairRole) -> u16 {
        match role {
            PairRole::Primary => self.primary_pages,
            PairRole::Secondary => self.secondary_pages,
        }
    }

    /// Role of `document` in this pairing, if it takes part
    pub fn role_of(&self, document: &DocumentId) -> Option<PairRole> {
        if document == &self.primary {
            Some(PairRole::Primary)
        } else if document == &self.secondary {
            Some(PairRole::Secondary)
        } else {
            None
        }
    }

    pub fn anchor(&self) -> Option<PageAnchor> {
        self.anchor
    }

    /// Record an explicit correspondence. Out-of-range pages are clamped.
    pub fn set_anchor(&mut self, anchor: PageAnchor) {
        let clamp = |page: u16, count: u16| page.min(count.saturating_sub(1));
        self.anchor = Some(PageAnchor {
            primary_page: clamp(anchor.primary_page, self.primary_pages),
            secondary_page: clamp(anchor.secondary_page, self.secondary_pages),
        });
    }

    pub fn clear_anchor(&mut self) {
        self.anchor = None;
    }

    pub fn policy(&self) -> MappingPolicy {
        match self.anchor {
            Some(anchor) => MappingPolicy::Anchored(anchor),
            None if self.primary_pages == self.secondary_pages => MappingPolicy::Identity,
            None => MappingPolicy::Proportional,
        }
    }

    /// Counterpart of `page` on the `from` side
    ///
    /// `None` when `page` does not exist on that side or the other side has
    /// no pages.
    pub fn map_page(&self, from: PairRole, page: u16) -> Option<u16> {
        let from_count = self.page_count(from);
        let to_count = self.page_count(from.other());
        if page >= from_count || to_count == 0 {
            return None;
        }

        let mapped = match self.policy() {
            MappingPolicy::Anchored(anchor) => {
                let (from_anchor, to_anchor) = match from {
                    PairRole::Primary => (anchor.primary_page, anchor.secondary_page),
                    PairRole::Secondary => (anchor.secondary_page, anchor.primary_page),
                };
                anchored_page(page, from_anchor, to_anchor, to_count)
            }
            MappingPolicy::Identity => page,
            MappingPolicy::Proportional => proportional_page(page, from_count, to_count),
        };
        Some(mapped)
    }

    pub fn to_secondary(&self, primary_page: u16) -> Option<u16> {
        self.map_page(PairRole::Primary, primary_page)
    }

    pub fn to_primary(&self, secondary_page: u16) -> Option<u16> {
        self.map_page(PairRole::Secondary, secondary_page)
    }
}

/// All active pairings
///
/// No document takes part in more than one pairing.
#[derive(Debug, Default)]
pub struct PairingRegistry {
    pairings: HashMap<DocumentId, DocumentPairing>,
    partner: HashMap<DocumentId, DocumentId>,
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `primary` with `secondary`
    ///
    /// Re-pairing the same two documents in the same roles keeps the
    /// existing pairing and its settings.
    ///
    /// # Errors
    /// `PairingConflict` if either document is already paired elsewhere or
    /// both ids are the same.
    pub fn pair(
        &mut self,
        primary: (&DocumentId, u16),
        secondary: (&DocumentId, u16),
    ) -> CoreResult<&mut DocumentPairing> {
        let (primary_id, primary_pages) = primary;
        let (secondary_id, secondary_pages) = secondary;

        if primary_id == secondary_id {
            return Err(CoreError::PairingConflict {
                document: primary_id.clone(),
                reason: "a document cannot be paired with itself".into(),
            });
        }

        let existing = self.pairings.get(primary_id).map(|p| p.secondary() == secondary_id);
        if existing != Some(true) {
            for id in [primary_id, secondary_id] {
                if let Some(other) = self.partner.get(id) {
                    return Err(CoreError::PairingConflict {
                        document: id.clone(),
                        reason: format!("already paired with {other}"),
                    });
                }
            }
            self.pairings.insert(
                primary_id.clone(),
                DocumentPairing::new(
                    primary_id.clone(),
                    primary_pages,
                    secondary_id.clone(),
                    secondary_pages,
                ),
            );
            self.partner.insert(primary_id.clone(), secondary_id.clone());
            self.partner.insert(secondary_id.clone(), primary_id.clone());
            log::info!("paired {primary_id} with {secondary_id}");
        }

        self.pairings
            .get_mut(primary_id)
            .ok_or_else(|| CoreError::UnknownDocument(primary_id.clone()))
    }

    /// Remove the pairing `document` takes part in, from either side
    pub fn unpair(&mut self, document: &DocumentId) -> Option<DocumentPairing> {
        let partner = self.partner.remove(document)?;
        self.partner.remove(&partner);
        let pairing = self.pairings.remove(document).or_else(|| self.pairings.remove(&partner));
        if let Some(pairing) = &pairing {
            log::info!("unpaired {} and {}", pairing.primary(), pairing.secondary());
        }
        pairing
    }

    /// Pairing `document` takes part in, and its role there
    pub fn pairing_of(&self, document: &DocumentId) -> Option<(&DocumentPairing, PairRole)> {
        let primary = match self.pairings.get(document) {
            Some(_) => document,
            None => self.partner.get(document)?,
        };
        let pairing = self.pairings.get(primary)?;
        let role = pairing.role_of(document)?;
        Some((pairing, role))
    }

    pub fn pairing_of_mut(&mut self, document: &DocumentId) -> Option<&mut DocumentPairing> {
        let primary = if self.pairings.contains_key(document) {
            document.clone()
        } else {
            self.partner.get(document)?.clone()
        };
        self.pairings.get_mut(&primary)
    }

    pub fn partner_of(&self, document: &DocumentId) -> Option<&DocumentId> {
        self.partner.get(document)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentPairing> {
        self.pairings.values()
    }

    pub fn len(&self) -> usize {
        self.pairings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairings.is_empty()
    }
}
