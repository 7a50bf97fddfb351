//! Viewport-aware priority assignment
//!
//! A pane reports the inclusive range of pages that intersect its viewport.
//! Those pages render at [`RenderPriority::Visible`]; pages within the
//! lookahead margin on either side render at [`RenderPriority::Lookahead`].

use crate::priority::RenderPriority;

/// Inclusive range of pages intersecting a pane's viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub first: u16,
    pub last: u16,
}

impl PageWindow {
    pub fn new(first: u16, last: u16) -> Self {
        Self { first: first.min(last), last: first.max(last) }
    }

    pub fn single(page: u16) -> Self {
        Self { first: page, last: page }
    }

    pub fn contains(&self, page: u16) -> bool {
        (self.first..=self.last).contains(&page)
    }
}

/// A page and the priority it should be requested at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedPage {
    pub page: u16,
    pub priority: RenderPriority,
}

/// Priority plan for one pane
///
/// # Example
///
/// ```
/// use dualread_scheduler::{PageWindow, RenderPriority, ViewportPlan};
///
/// let plan = ViewportPlan::new(PageWindow::new(4, 5), 10, 1);
/// assert_eq!(plan.priority_of(5), Some(RenderPriority::Visible));
/// assert_eq!(plan.priority_of(6), Some(RenderPriority::Lookahead));
/// assert_eq!(plan.priority_of(7), None);
/// ```
#[derive(Debug, Clone)]
pub struct ViewportPlan {
    window: PageWindow,
    pages: Vec<PlannedPage>,
}

impl ViewportPlan {
    /// Build a plan, clipping the window and margin to `[0, page_count)`.
    pub fn new(window: PageWindow, page_count: u16, lookahead: u16) -> Self {
        let mut pages = Vec::new();
        if page_count == 0 {
            return Self { window, pages };
        }

        let last_page = page_count - 1;
        let first = window.first.min(last_page);
        let last = window.last.min(last_page);
        let window = PageWindow { first, last };

        for page in first..=last {
            pages.push(PlannedPage { page, priority: RenderPriority::Visible });
        }

        let after_end = last.saturating_add(lookahead).min(last_page);
        for page in (last + 1)..=after_end {
            pages.push(PlannedPage { page, priority: RenderPriority::Lookahead });
        }
        let before_start = first.saturating_sub(lookahead);
        for page in (before_start..first).rev() {
            pages.push(PlannedPage { page, priority: RenderPriority::Lookahead });
        }

        Self { window, pages }
    }

    /// Clipped visible window
    pub fn window(&self) -> PageWindow {
        self.window
    }

    /// Visible pages first, then lookahead pages nearest-first
    pub fn pages(&self) -> &[PlannedPage] {
        &self.pages
    }

    pub fn visible_pages(&self) -> impl Iterator<Item = u16> + '_ {
        self.pages.iter().filter(|p| p.priority == RenderPriority::Visible).map(|p| p.page)
    }

    pub fn priority_of(&self, page: u16) -> Option<RenderPriority> {
        self.pages.iter().find(|p| p.page == page).map(|p| p.priority)
    }
}

/// Pages of a thumbnail strip centred on `around`, nearest first.
pub fn thumbnail_pages(page_count: u16, around: u16, radius: u16) -> Vec<u16> {
    if page_count == 0 {
        return Vec::new();
    }
    let around = around.min(page_count - 1);
    let mut pages = vec![around];
    for distance in 1..=radius {
        if let Some(before) = around.checked_sub(distance) {
            pages.push(before);
        }
        let after = around.saturating_add(distance);
        if after < page_count && after != around {
            pages.push(after);
        }
    }
    pages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visible_and_lookahead() {
        let plan = ViewportPlan::new(PageWindow::new(3, 4), 10, 1);
        let pages: Vec<_> = plan.pages().iter().map(|p| (p.page, p.priority)).collect();
        assert_eq!(
            pages,
            vec![
                (3, RenderPriority::Visible),
                (4, RenderPriority::Visible),
                (5, RenderPriority::Lookahead),
                (2, RenderPriority::Lookahead),
            ]
        );
    }

    #[test]
    fn test_clipped_at_document_edges() {
        let plan = ViewportPlan::new(PageWindow::single(0), 1, 2);
        assert_eq!(plan.pages().len(), 1);
        assert_eq!(plan.visible_pages().collect::<Vec<_>>(), vec![0]);

        let plan = ViewportPlan::new(PageWindow::new(8, 12), 10, 1);
        assert_eq!(plan.window(), PageWindow::new(8, 9));
        assert_eq!(plan.priority_of(7), Some(RenderPriority::Lookahead));
        assert_eq!(plan.priority_of(10), None);
    }

    #[test]
    fn test_zero_lookahead() {
        let plan = ViewportPlan::new(PageWindow::single(5), 10, 0);
        assert_eq!(plan.pages().len(), 1);
    }

    #[test]
    fn test_empty_document() {
        let plan = ViewportPlan::new(PageWindow::single(0), 0, 1);
        assert!(plan.pages().is_empty());
    }

    #[test]
    fn test_window_normalizes_order() {
        let window = PageWindow::new(7, 2);
        assert_eq!((window.first, window.last), (2, 7));
        assert!(window.contains(5));
        assert!(!window.contains(8));
    }

    #[test]
    fn test_thumbnail_pages_nearest_first() {
        assert_eq!(thumbnail_pages(10, 0, 2), vec![0, 1, 2]);
        assert_eq!(thumbnail_pages(10, 5, 1), vec![5, 4, 6]);
        assert_eq!(thumbnail_pages(3, 9, 1), vec![2, 1]);
        assert!(thumbnail_pages(0, 0, 3).is_empty());
    }
}
