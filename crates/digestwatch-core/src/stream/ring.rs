//! Bounded, sequence-numbered replay buffer of log lines.
//!
//! Every appended line gets the next sequence number. When full, the oldest
//! line is evicted and `base` moves forward; `next - base` never exceeds the
//! capacity. Readers hold a sequence cursor rather than an index, so a slow
//! reader resumes correctly after evictions and only loses what was evicted.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::LogLine;

/// Lines returned by [`LogRing::get_from`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayBatch {
    /// Retained lines from `start` up to (excluding) `next`, oldest first.
    pub lines: Vec<LogLine>,
    /// Sequence number of `lines[0]`; above the requested cursor when the
    /// cursor had already been evicted.
    pub start: u64,
    /// Cursor for the next call.
    pub next: u64,
}

impl ReplayBatch {
    /// Number of lines skipped because the requested cursor was evicted.
    pub fn skipped(&self, requested: u64) -> u64 {
        self.start.saturating_sub(requested)
    }
}

#[derive(Debug)]
struct RingInner {
    lines: VecDeque<LogLine>,
    /// Sequence number of `lines[0]`.
    base: u64,
    /// Sequence number assigned to the next appended line.
    next: u64,
}

/// Fixed-capacity FIFO of log lines with cursor-based reads.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    inner: Mutex<RingInner>,
}

impl LogRing {
    /// Creates a ring holding at most `capacity` lines (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(RingInner {
                lines: VecDeque::with_capacity(capacity),
                base: 0,
                next: 0,
            }),
        }
    }

    /// Appends a line, evicting the oldest one when full. Never fails.
    pub fn append(&self, line: LogLine) {
        let mut inner = self.inner.lock();
        if inner.lines.len() == self.capacity {
            inner.lines.pop_front();
            inner.base += 1;
        }
        inner.lines.push_back(line);
        inner.next += 1;
    }

    /// Returns every retained line with sequence `>= seq`.
    ///
    /// A cursor older than `base` is clamped up to `base` without error; a
    /// cursor past `next` yields nothing.
    pub fn get_from(&self, seq: u64) -> ReplayBatch {
        let inner = self.inner.lock();
        let start = seq.max(inner.base);
        if start >= inner.next {
            return ReplayBatch {
                lines: Vec::new(),
                start: inner.next,
                next: inner.next,
            };
        }

        let offset = (start - inner.base) as usize;
        ReplayBatch {
            lines: inner.lines.range(offset..).cloned().collect(),
            start,
            next: inner.next,
        }
    }

    /// Sequence number the next appended line will get.
    pub fn head(&self) -> u64 {
        self.inner.lock().next
    }

    /// Sequence number of the oldest retained line.
    pub fn base(&self) -> u64 {
        self.inner.lock().base
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
