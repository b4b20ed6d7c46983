//! Correlation ids and the in-flight command table.
//!
//! Completions come back in whatever order the device finishes them, so
//! every submission carries a process-unique id and the dispatcher keeps a
//! small table of what it sent. Harvested completions are matched back by
//! id; an id with no table entry is an orphan.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-unique tag carried by one submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(u32);

impl CorrelationId {
    pub fn from_raw(raw: u32) -> Self {
        CorrelationId(raw)
    }

    pub fn as_raw(&self) -> u32 {
        self.0
    }

    /// Driver representation. The driver stores the tag as a signed int and
    /// reserves -1 for "match anything", so ids start at 1.
    pub fn as_pack_id(&self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared generator of correlation ids. One instance serves every worker
/// so an id never repeats across devices within a run.
pub struct IdSource {
    next: AtomicU32,
}

impl IdSource {
    pub const fn new() -> Self {
        // Start at 1; see CorrelationId::as_pack_id.
        IdSource {
            next: AtomicU32::new(1),
        }
    }

    pub fn next(&self) -> CorrelationId {
        CorrelationId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Highest id handed out so far, for end-of-run diagnostics.
    pub fn last_issued(&self) -> u32 {
        self.next.load(Ordering::Relaxed).wrapping_sub(1)
    }
}

impl Default for IdSource {
    fn default() -> Self {
        Self::new()
    }
}

/// What the dispatcher remembers about one in-flight command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub id: CorrelationId,
    /// Block address, for failure reports. None for probes.
    pub lba: Option<u64>,
    /// Buffer slot lent to this command. None for probes.
    pub buffer: Option<u16>,
}

/// In-flight table for one worker. Sized by queue depth (at most 16), so
/// lookups are a linear scan.
pub struct CorrelationTable {
    entries: Vec<Pending>,
}

impl CorrelationTable {
    pub fn with_capacity(queue_depth: u32) -> Self {
        CorrelationTable {
            entries: Vec::with_capacity(queue_depth as usize),
        }
    }

    /// Record a submission. The caller keeps the table within queue depth.
    pub fn insert(&mut self, pending: Pending) {
        debug_assert!(self.entries.len() < self.entries.capacity());
        debug_assert!(!self.entries.iter().any(|e| e.id == pending.id));
        self.entries.push(pending);
    }

    /// Resolve a completion by id. Returns `None` for orphans.
    pub fn take(&mut self, id: CorrelationId) -> Option<Pending> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.swap_remove(pos))
    }

    /// Look up without resolving, for failure reports.
    pub fn get(&self, id: CorrelationId) -> Option<&Pending> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Number of commands still in flight.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every unresolved entry, for the end-of-run leak
    /// report.
    pub fn drain_unresolved(&mut self) -> Vec<Pending> {
        std::mem::take(&mut self.entries)
    }
}
