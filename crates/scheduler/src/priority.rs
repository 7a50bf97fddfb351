//! Render priorities and the ordered dispatch queue
//!
//! The queue is a max-heap of `(priority, sequence)` pairs. Sequence numbers
//! grow with every submission, so among equal priorities the most recent
//! request is dispatched first. Re-prioritizing a key pushes a fresh heap
//! item; superseded items are skipped lazily when popped.

use dualread_cache::PageKey;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Why a page is being rendered
///
/// Higher variants are dispatched first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderPriority {
    /// Small prerender for a thumbnail strip
    Thumbnail = 0,

    /// Page within the lookahead margin of a viewport
    Lookahead = 1,

    /// Page currently inside a pane's viewport
    Visible = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueItem {
    pub priority: RenderPriority,
    pub seq: u64,
    pub key: PageKey,
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Newer sequence wins ties: BinaryHeap is a max heap.
        self.priority.cmp(&other.priority).then(self.seq.cmp(&other.seq))
    }
}

/// Heap of dispatch candidates
#[derive(Debug, Default)]
pub(crate) struct DispatchQueue {
    heap: BinaryHeap<QueueItem>,
}

impl DispatchQueue {
    pub fn push(&mut self, priority: RenderPriority, seq: u64, key: PageKey) {
        self.heap.push(QueueItem { priority, seq, key });
    }

    /// Pop items until `is_live` accepts one.
    pub fn pop_live(&mut self, mut is_live: impl FnMut(&QueueItem) -> bool) -> Option<QueueItem> {
        while let Some(item) = self.heap.pop() {
            if is_live(&item) {
                return Some(item);
            }
        }
        None
    }

    /// Number of heap items, including superseded ones.
    #[cfg(test)]
    pub fn raw_len(&self) -> usize {
        self.heap.len()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualread_render::{DocumentId, Rotation};

    fn key(page: u16) -> PageKey {
        PageKey::new(DocumentId::new("doc"), page, 1.0, Rotation::Deg0)
    }

    #[test]
    fn test_priority_ordering() {
        assert!(RenderPriority::Visible > RenderPriority::Lookahead);
        assert!(RenderPriority::Lookahead > RenderPriority::Thumbnail);
    }

    #[test]
    fn test_higher_priority_first() {
        let mut queue = DispatchQueue::default();
        queue.push(RenderPriority::Thumbnail, 1, key(0));
        queue.push(RenderPriority::Visible, 2, key(1));
        queue.push(RenderPriority::Lookahead, 3, key(2));

        let order: Vec<u16> =
            std::iter::from_fn(|| queue.pop_live(|_| true)).map(|item| item.key.page).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_most_recent_first_within_priority() {
        let mut queue = DispatchQueue::default();
        for (seq, page) in [(1, 10), (2, 11), (3, 12)] {
            queue.push(RenderPriority::Visible, seq, key(page));
        }

        assert_eq!(queue.pop_live(|_| true).unwrap().key.page, 12);
        assert_eq!(queue.pop_live(|_| true).unwrap().key.page, 11);
    }

    #[test]
    fn test_pop_live_skips_superseded() {
        let mut queue = DispatchQueue::default();
        queue.push(RenderPriority::Lookahead, 1, key(0));
        queue.push(RenderPriority::Visible, 2, key(0));
        queue.push(RenderPriority::Visible, 3, key(1));

        let item = queue.pop_live(|item| item.seq != 3).unwrap();
        assert_eq!(item.seq, 2);
        assert_eq!(queue.raw_len(), 1);
    }
}
