//! Restores index order over results that arrive in any order.
//!
//! Workers finish ranges at their own pace. [`OrderedAssembler`] holds every
//! completed range that is ahead of the write cursor and forwards outputs to
//! the [`LabelSink`] strictly in index order, so the sink only ever sees a
//! contiguous prefix of the dataset.

use crate::coordinator::sink::LabelSink;
use bytes::Bytes;
use labelgrid_core::{Error, Result, types::WorkRange};
use std::collections::BTreeMap;

/// Outcome of a completed dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Lowest solution index reported by any worker.
    pub solution: Option<u64>,
    /// Labels written to the sink during this dispatch.
    pub labels_written: u64,
}

pub struct OrderedAssembler<S> {
    sink: S,
    next: u64,
    end: u64,
    pending: BTreeMap<u64, (WorkRange, Bytes)>,
    solution: Option<u64>,
    labels_written: u64,
}

impl<S: LabelSink> OrderedAssembler<S> {
    /// Writes labels `[first, end)` to `sink`.
    pub fn new(sink: S, first: u64, end: u64) -> Self {
        Self {
            sink,
            next: first.min(end),
            end,
            pending: BTreeMap::new(),
            solution: None,
            labels_written: 0,
        }
    }

    pub const fn is_complete(&self) -> bool {
        self.next >= self.end
    }

    /// Index of the first label not yet written.
    pub const fn next_index(&self) -> u64 {
        self.next
    }

    pub fn pending_ranges(&self) -> usize {
        self.pending.len()
    }

    /// Accepts the output of `range` and writes everything that is now
    /// contiguous with the write cursor.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a range that is behind the
    /// cursor or already pending, and propagates sink failures.
    pub async fn accept(
        &mut self,
        range: WorkRange,
        output: Bytes,
        solution: Option<u64>,
    ) -> Result<()> {
        if range.start < self.next || self.pending.contains_key(&range.start) {
            return Err(Error::protocol(format!("range {range} was already received")));
        }
        if let Some(index) = solution {
            self.solution = Some(self.solution.map_or(index, |best| best.min(index)));
        }
        self.pending.insert(range.start, (range, output));

        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.next {
                break;
            }
            let (range, output) = entry.remove();
            self.sink.write_labels(output).await?;
            self.next = range.end;
            self.labels_written += range.len();
        }
        Ok(())
    }

    /// Flushes the sink and hands it back with the dispatch summary.
    pub async fn finish(mut self) -> Result<(S, DispatchSummary)> {
        self.sink.flush().await?;
        Ok((
            self.sink,
            DispatchSummary {
                solution: self.solution,
                labels_written: self.labels_written,
            },
        ))
    }
}
