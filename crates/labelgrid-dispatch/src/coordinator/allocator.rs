//! Hands out work ranges to connected workers.
//!
//! Ranges are cut sequentially from the unassigned tail of the dataset.
//! A range abandoned by a failed session is re-queued and served before
//! any fresh range. A session that finds nothing to hand out while other
//! ranges are still in flight waits: one of those ranges may come back.

use labelgrid_core::types::WorkRange;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

#[derive(Debug)]
struct AllocState {
    next: u64,
    end: u64,
    requeued: VecDeque<WorkRange>,
    in_flight: usize,
    closed: bool,
}

/// Result of a non-blocking allocation attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    Range(WorkRange),
    /// Nothing to hand out now, but ranges are still in flight.
    Wait,
    /// Every range has been completed, or the allocator was closed.
    Done,
}

#[derive(Debug)]
pub struct RangeAllocator {
    state: Mutex<AllocState>,
    changed: Notify,
    default_chunk: u64,
    max_chunk: u64,
}

impl RangeAllocator {
    /// Allocates `[first, end)` in chunks of at most `max_chunk` labels.
    /// Workers that send a zero size hint get `default_chunk`.
    pub fn new(first: u64, end: u64, default_chunk: u64, max_chunk: u64) -> Self {
        Self {
            state: Mutex::new(AllocState {
                next: first.min(end),
                end,
                requeued: VecDeque::new(),
                in_flight: 0,
                closed: false,
            }),
            changed: Notify::new(),
            default_chunk: default_chunk.max(1),
            max_chunk: max_chunk.max(1),
        }
    }

    pub fn chunk_size(&self, hint: u64) -> u64 {
        match hint {
            0 => self.default_chunk.min(self.max_chunk),
            hint => hint.min(self.max_chunk),
        }
    }

    pub fn try_acquire(&self, hint: u64) -> Allocation {
        let mut state = self.state.lock();
        if state.closed {
            return Allocation::Done;
        }
        if let Some(range) = state.requeued.pop_front() {
            state.in_flight += 1;
            return Allocation::Range(range);
        }
        if state.next < state.end {
            let start = state.next;
            let end = start.saturating_add(self.chunk_size(hint)).min(state.end);
            state.next = end;
            state.in_flight += 1;
            return Allocation::Range(WorkRange { start, end });
        }
        if state.in_flight > 0 {
            Allocation::Wait
        } else {
            Allocation::Done
        }
    }

    /// Waits for a range. Returns `None` once there is nothing left to do.
    pub async fn acquire(&self, hint: u64) -> Option<WorkRange> {
        loop {
            let changed = self.changed.notified();
            match self.try_acquire(hint) {
                Allocation::Range(range) => return Some(range),
                Allocation::Done => return None,
                Allocation::Wait => changed.await,
            }
        }
    }

    /// Marks an issued range as finished.
    pub fn complete(&self, _range: WorkRange) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        let finished = state.in_flight == 0 && state.requeued.is_empty() && state.next >= state.end;
        drop(state);
        if finished {
            self.changed.notify_waiters();
        }
    }

    /// Returns an issued range for another worker to pick up.
    pub fn requeue(&self, range: WorkRange) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.requeued.push_back(range);
        drop(state);
        tracing::debug!(%range, "Range re-queued");
        self.changed.notify_waiters();
    }

    /// Stops handing out ranges; waiting sessions see `None`.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.changed.notify_waiters();
    }
}
