//! Buffer window bookkeeping and the copy-or-fetch refill planner.
//!
//! The window is an owned byte arena tagged with the absolute `[start, end)`
//! range it currently holds. Moving the window is planned by a pure function
//! so the reuse arithmetic can be tested without any storage behind it.

use std::ops::Range;

/// Byte arena holding the window contents for an absolute offset range.
#[derive(Debug, Default)]
pub(crate) struct BufferWindow {
    start: u64,
    bytes: Vec<u8>,
}

impl BufferWindow {
    /// The absolute range currently held, `None` when nothing is buffered.
    pub(crate) fn range(&self) -> Option<Range<u64>> {
        if self.bytes.is_empty() {
            None
        } else {
            Some(self.start..self.start + self.bytes.len() as u64)
        }
    }

    pub(crate) fn contains(&self, offset: u64) -> bool {
        self.range().is_some_and(|r| r.contains(&offset))
    }

    /// Bytes for the absolute sub-range `range`, which must lie inside the
    /// window.
    pub(crate) fn slice(&self, range: Range<u64>) -> &[u8] {
        debug_assert!(
            self.range()
                .is_some_and(|w| w.start <= range.start && range.end <= w.end)
        );
        &self.bytes[(range.start - self.start) as usize..(range.end - self.start) as usize]
    }

    /// Bytes from the absolute `offset` (which must be inside the window) to
    /// the window end.
    pub(crate) fn suffix(&self, offset: u64) -> &[u8] {
        debug_assert!(self.contains(offset));
        &self.bytes[(offset - self.start) as usize..]
    }

    pub(crate) fn replace(&mut self, start: u64, bytes: Vec<u8>) {
        self.start = start;
        self.bytes = bytes;
    }

    /// Drops the contents and releases the allocation.
    pub(crate) fn clear(&mut self) {
        self.start = 0;
        self.bytes = Vec::new();
    }
}

/// Copy-or-fetch plan for moving the window to a new range.
///
/// The parts partition the new range in offset order: a head to fetch from
/// storage, the overlap to copy out of the previous window, and a tail to
/// fetch. Both windows are contiguous, so the overlap is a single range and
/// the fresh deltas are at most one on each side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RefillPlan {
    pub(crate) fetch_head: Option<Range<u64>>,
    pub(crate) reuse: Option<Range<u64>>,
    pub(crate) fetch_tail: Option<Range<u64>>,
}

/// Computes the minimal copy-or-fetch plan to move a window from `old` to
/// `new`.
pub(crate) fn plan_refill(old: Option<Range<u64>>, new: Range<u64>) -> RefillPlan {
    if new.is_empty() {
        return RefillPlan {
            fetch_head: None,
            reuse: None,
            fetch_tail: None,
        };
    }
    let overlap = old.and_then(|old| {
        let start = old.start.max(new.start);
        let end = old.end.min(new.end);
        (start < end).then_some(start..end)
    });
    let Some(overlap) = overlap else {
        return RefillPlan {
            fetch_head: Some(new),
            reuse: None,
            fetch_tail: None,
        };
    };
    RefillPlan {
        fetch_head: (new.start < overlap.start).then(|| new.start..overlap.start),
        fetch_tail: (overlap.end < new.end).then(|| overlap.end..new.end),
        reuse: Some(overlap),
    }
}
