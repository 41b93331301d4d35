//! Diagnostic insert tracing.
//!
//! While a [`TraceSession`] is alive, every inserting call records the table
//! state before and after it plus a per-record outcome. The log is bounded;
//! records past the limit are counted but not kept.

use std::fmt;
use std::ops::{Deref, DerefMut};

use super::{BlockHashTable, ProbeResult};
use crate::error::HashTableError;
use crate::hash::KeyHasher;

/// Table state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSnapshot {
    pub current_ordinal: usize,
    pub gaps: usize,
    pub capacity: usize,
    pub max_size: usize,
    pub batches: usize,
    pub rehash_count: u64,
}

impl fmt::Display for TableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ordinal={} gaps={} capacity={} max_size={} batches={} rehashes={}",
            self.current_ordinal,
            self.gaps,
            self.capacity,
            self.max_size,
            self.batches,
            self.rehash_count
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    Matched,
    /// Not inserted: the space check refused it.
    Skipped,
}

/// Outcome of one record of a traced call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTrace {
    /// Position of the record within its call.
    pub index: usize,
    pub ordinal: Option<u32>,
    pub outcome: RecordOutcome,
}

impl RecordTrace {
    pub(super) const fn new(index: usize, result: ProbeResult) -> Self {
        let outcome = match result {
            ProbeResult::Inserted(_) => RecordOutcome::Inserted,
            ProbeResult::Found(_) => RecordOutcome::Matched,
            ProbeResult::NotFound | ProbeResult::Retry => RecordOutcome::Skipped,
        };
        Self {
            index,
            ordinal: result.ordinal(),
            outcome,
        }
    }
}

/// One traced call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTrace {
    pub before: TableSnapshot,
    pub after: TableSnapshot,
    pub records: Vec<RecordTrace>,
    /// Error that aborted the call, if any.
    pub error: Option<HashTableError>,
}

/// Bounded log of traced calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceLog {
    max_records: usize,
    calls: Vec<InsertTrace>,
    kept_records: usize,
    dropped_records: usize,
}

impl TraceLog {
    #[must_use]
    pub const fn new(max_records: usize) -> Self {
        Self {
            max_records,
            calls: Vec::new(),
            kept_records: 0,
            dropped_records: 0,
        }
    }

    #[must_use]
    pub fn calls(&self) -> &[InsertTrace] {
        &self.calls
    }

    /// Records that did not fit under the limit.
    #[must_use]
    pub const fn dropped_records(&self) -> usize {
        self.dropped_records
    }

    fn push(&mut self, mut call: InsertTrace) {
        let room = self.max_records - self.kept_records;
        if call.records.len() > room {
            self.dropped_records += call.records.len() - room;
            call.records.truncate(room);
        }
        if self.calls.len() >= self.max_records {
            self.dropped_records += call.records.len();
            return;
        }
        self.kept_records += call.records.len();
        self.calls.push(call);
    }

    /// Render the log for humans.
    #[must_use]
    pub fn report(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TraceLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "insert trace: {} calls, {} records ({} dropped)",
            self.calls.len(),
            self.kept_records,
            self.dropped_records
        )?;
        for (index, call) in self.calls.iter().enumerate() {
            writeln!(f, "call {index}")?;
            writeln!(f, "  before: {}", call.before)?;
            for record in &call.records {
                match record.ordinal {
                    Some(ordinal) => {
                        writeln!(f, "  [{}] {:?} -> {ordinal}", record.index, record.outcome)?;
                    }
                    None => writeln!(f, "  [{}] {:?}", record.index, record.outcome)?,
                }
            }
            if let Some(error) = &call.error {
                writeln!(f, "  error: {error}")?;
            }
            writeln!(f, "  after:  {}", call.after)?;
        }
        Ok(())
    }
}

/// Tracing scope over a table. Tracing stops when the session drops.
pub struct TraceSession<'a, H: KeyHasher> {
    table: &'a mut BlockHashTable<H>,
}

impl<H: KeyHasher> TraceSession<'_, H> {
    /// The log recorded so far.
    #[must_use]
    pub fn log(&self) -> &TraceLog {
        match &self.table.trace {
            Some(log) => log,
            None => unreachable!("trace session without a trace log"),
        }
    }
}

impl<H: KeyHasher> Deref for TraceSession<'_, H> {
    type Target = BlockHashTable<H>;

    fn deref(&self) -> &Self::Target {
        self.table
    }
}

impl<H: KeyHasher> DerefMut for TraceSession<'_, H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.table
    }
}

impl<H: KeyHasher> Drop for TraceSession<'_, H> {
    fn drop(&mut self) {
        if let Some(log) = self.table.trace.take() {
            tracing::debug!(
                "insert trace stopped: {} calls, {} records dropped",
                log.calls().len(),
                log.dropped_records()
            );
        }
    }
}

impl<H: KeyHasher> BlockHashTable<H> {
    /// Start recording inserting calls, keeping at most `max_records` records.
    pub fn start_trace(&mut self, max_records: usize) -> TraceSession<'_, H> {
        tracing::debug!("insert trace started (max records: {max_records})");
        self.trace = Some(TraceLog::new(max_records));
        TraceSession { table: self }
    }

    pub(super) fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            current_ordinal: self.current_ordinal,
            gaps: self.gaps,
            capacity: self.capacity,
            max_size: self.max_size,
            batches: self.chunks.len(),
            rehash_count: self.rehash_count(),
        }
    }

    pub(super) fn finish_trace(
        &mut self,
        before: TableSnapshot,
        records: Vec<RecordTrace>,
        error: Option<HashTableError>,
    ) {
        let after = self.snapshot();
        if let Some(log) = self.trace.as_mut() {
            log.push(InsertTrace {
                before,
                after,
                records,
                error,
            });
        }
    }
}
