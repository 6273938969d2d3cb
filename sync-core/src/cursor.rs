//! Cursor tracking for a sync session.
//!
//! Cursors are monotonically increasing integers assigned by the relay. The
//! tracker holds the session's high-water mark and never moves it backwards.
//!
//! Two things move the mark:
//! - a pull batch, which advances it to the highest cursor retrieved
//! - a push acknowledgement, which advances it only when the acknowledged
//!   cursor directly follows the mark (otherwise another device wrote in
//!   between, and those blobs still need to be pulled)
//!
//! Gaps inside a pull batch are reported, not filled. Filling them is the
//! transport's business.

use sync_types::Cursor;

/// A run of cursors missing from a pull batch: everything strictly between
/// `after` and `before`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    /// Last cursor present before the gap.
    pub after: Cursor,
    /// First cursor present after the gap.
    pub before: Cursor,
}

impl Gap {
    /// Number of missing cursors.
    pub fn missing(&self) -> u64 {
        self.before
            .value()
            .saturating_sub(self.after.value())
            .saturating_sub(1)
    }
}

/// Result of observing a pull batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advance {
    /// Mark before the batch.
    pub from: Cursor,
    /// Mark after the batch.
    pub to: Cursor,
    /// Holes found in the batch, relative to the cursor the pull started at.
    pub gaps: Vec<Gap>,
}

impl Advance {
    /// Did the mark move?
    pub fn moved(&self) -> bool {
        self.to > self.from
    }
}

/// Monotonic high-water mark of a session.
#[derive(Debug, Clone, Default)]
pub struct CursorTracker {
    position: Cursor,
}

impl CursorTracker {
    /// Start at cursor 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mark.
    pub fn position(&self) -> Cursor {
        self.position
    }

    /// Record a pull batch that was requested strictly after `after`.
    ///
    /// `cursors` need not be sorted. Cursors at or before `after` are
    /// ignored; the mark moves to the highest remaining one if that is
    /// beyond the current mark.
    pub fn observe<I>(&mut self, after: Cursor, cursors: I) -> Advance
    where
        I: IntoIterator<Item = Cursor>,
    {
        let mut batch: Vec<Cursor> = cursors.into_iter().filter(|c| *c > after).collect();
        batch.sort_unstable();
        batch.dedup();

        let mut gaps = Vec::new();
        let mut previous = after;
        for &cursor in &batch {
            if cursor > previous.next() {
                gaps.push(Gap {
                    after: previous,
                    before: cursor,
                });
            }
            previous = cursor;
        }

        let from = self.position;
        if let Some(&highest) = batch.last() {
            if highest > self.position {
                self.position = highest;
            }
        }

        Advance {
            from,
            to: self.position,
            gaps,
        }
    }

    /// Record a push acknowledgement. Returns whether the mark moved.
    pub fn acknowledge(&mut self, cursor: Cursor) -> bool {
        if cursor == self.position.next() {
            self.position = cursor;
            true
        } else {
            false
        }
    }
}
