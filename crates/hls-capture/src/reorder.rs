//! Reorder buffer that turns out-of-order segment completions into an ordered
//! write sequence.
//!
//! Items are keyed by media sequence number. [`ReorderBuffer::pop_ready`] only ever
//! yields the next expected index, so consumers write in strictly ascending order
//! without duplicates. Indices below the cursor are rejected as stale.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

/// Tracks how long the cursor has been waiting for a missing index while later
/// indices sit in the buffer.
#[derive(Debug, Clone, Copy)]
pub struct GapState {
    pub missing_index: u64,
    pub detected_at: Instant,
}

impl GapState {
    fn new(missing_index: u64) -> Self {
        Self {
            missing_index,
            detected_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.detected_at.elapsed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Buffered,
    /// Index already passed, skipped or buffered.
    Stale,
}

#[derive(Debug)]
pub struct ReorderBuffer<T> {
    next_expected: u64,
    pending: BTreeMap<u64, T>,
    skipped: BTreeSet<u64>,
    gap: Option<GapState>,
    stale_rejected: u64,
}

impl<T> ReorderBuffer<T> {
    pub fn new(next_expected: u64) -> Self {
        Self {
            next_expected,
            pending: BTreeMap::new(),
            skipped: BTreeSet::new(),
            gap: None,
            stale_rejected: 0,
        }
    }

    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn stale_rejected(&self) -> u64 {
        self.stale_rejected
    }

    /// Current gap, if the cursor is blocked while later items are buffered.
    pub fn gap(&self) -> Option<GapState> {
        self.gap
    }

    pub fn push(&mut self, index: u64, item: T) -> PushOutcome {
        if index < self.next_expected
            || self.pending.contains_key(&index)
            || self.skipped.contains(&index)
        {
            self.stale_rejected += 1;
            return PushOutcome::Stale;
        }

        self.pending.insert(index, item);
        self.refresh_gap();
        PushOutcome::Buffered
    }

    /// Give up on `index`; the cursor passes over it without yielding anything.
    /// Returns false when the index was already passed.
    pub fn skip(&mut self, index: u64) -> bool {
        if index < self.next_expected {
            return false;
        }
        self.pending.remove(&index);
        let inserted = self.skipped.insert(index);
        self.refresh_gap();
        inserted
    }

    /// Move the cursor forward to `index`, dropping anything buffered below it.
    /// Returns the half-open range of indices that were passed over.
    pub fn fast_forward(&mut self, index: u64) -> Option<std::ops::Range<u64>> {
        if index <= self.next_expected {
            return None;
        }
        let passed = self.next_expected..index;
        self.pending = self.pending.split_off(&index);
        self.skipped = self.skipped.split_off(&index);
        self.next_expected = index;
        self.refresh_gap();
        Some(passed)
    }

    /// Yield the item at the cursor if it is ready, advancing past skipped indices.
    pub fn pop_ready(&mut self) -> Option<(u64, T)> {
        loop {
            if self.skipped.remove(&self.next_expected) {
                self.next_expected += 1;
                continue;
            }
            let index = self.next_expected;
            let item = self.pending.remove(&index)?;
            self.next_expected += 1;
            self.refresh_gap();
            return Some((index, item));
        }
    }

    fn refresh_gap(&mut self) {
        // Skipped markers at the cursor are consumed lazily by pop_ready, so a gap
        // only exists when the cursor index is genuinely absent.
        let blocked = !self.pending.is_empty()
            && !self.pending.contains_key(&self.next_expected)
            && !self.skipped.contains(&self.next_expected);
        self.gap = match (blocked, self.gap) {
            (false, _) => None,
            (true, Some(gap)) if gap.missing_index == self.next_expected => Some(gap),
            (true, _) => Some(GapState::new(self.next_expected)),
        };
    }
}
