//! sgline runtime metrics.
//!
//! Process-wide counters for submissions, harvests, driver back-pressure,
//! and buffer traffic. Registered with metriken for exposition; the
//! per-run totals in [`crate::stats`] are kept separately so a report
//! covers exactly one run.

use crate::counter::{Counter, CounterGroup};
use metriken::metric;

// Counter groups: sharded storage, one shard per worker.
static CMD: CounterGroup = CounterGroup::new();
static BACKPRESSURE: CounterGroup = CounterGroup::new();
static BUF: CounterGroup = CounterGroup::new();
static WORKER: CounterGroup = CounterGroup::new();

/// Counter slot indices for command lifecycle metrics.
pub mod cmd {
    pub const SUBMITTED: usize = 0;
    pub const COMPLETED: usize = 1;
    pub const ORPHANED: usize = 2;
    pub const RECOVERED: usize = 3;
    pub const FAILED: usize = 4;
}

/// Counter slot indices for driver back-pressure metrics.
pub mod backpressure {
    pub const SUBMIT_RETRIES: usize = 0;
    pub const HARVEST_WAITS: usize = 1;
}

/// Counter slot indices for buffer metrics.
pub mod buf {
    pub const BYTES_ALLOCATED: usize = 0;
}

/// Counter slot indices for worker lifecycle metrics.
pub mod worker {
    pub const FAILURES: usize = 0;
}

// ── Command lifecycle ────────────────────────────────────────────

#[metric(
    name = "sgline/commands/submitted",
    description = "Total commands handed to the driver"
)]
pub static COMMANDS_SUBMITTED: Counter = Counter::new(&CMD, cmd::SUBMITTED);

#[metric(
    name = "sgline/commands/completed",
    description = "Total commands completed and matched"
)]
pub static COMMANDS_COMPLETED: Counter = Counter::new(&CMD, cmd::COMPLETED);

#[metric(
    name = "sgline/commands/orphaned",
    description = "Completions with no matching in-flight entry"
)]
pub static COMMANDS_ORPHANED: Counter = Counter::new(&CMD, cmd::ORPHANED);

#[metric(
    name = "sgline/commands/recovered",
    description = "Commands that completed after a recovered device condition"
)]
pub static COMMANDS_RECOVERED: Counter = Counter::new(&CMD, cmd::RECOVERED);

#[metric(
    name = "sgline/commands/failed",
    description = "Commands that completed with a fatal device error"
)]
pub static COMMANDS_FAILED: Counter = Counter::new(&CMD, cmd::FAILED);

// ── Driver back-pressure ─────────────────────────────────────────

#[metric(
    name = "sgline/backpressure/submit_retries",
    description = "Submissions retried after transient driver exhaustion"
)]
pub static SUBMIT_RETRIES: Counter = Counter::new(&BACKPRESSURE, backpressure::SUBMIT_RETRIES);

#[metric(
    name = "sgline/backpressure/harvest_waits",
    description = "Waits taken because no completion was ready"
)]
pub static HARVEST_WAITS: Counter = Counter::new(&BACKPRESSURE, backpressure::HARVEST_WAITS);

// ── Buffers ──────────────────────────────────────────────────────

#[metric(
    name = "sgline/buffers/bytes_allocated",
    description = "Total transfer buffer bytes allocated"
)]
pub static BUFFER_BYTES_ALLOCATED: Counter = Counter::new(&BUF, buf::BYTES_ALLOCATED);

// ── Workers ──────────────────────────────────────────────────────

#[metric(
    name = "sgline/workers/failures",
    description = "Workers that stopped on a fatal error"
)]
pub static WORKER_FAILURES: Counter = Counter::new(&WORKER, worker::FAILURES);
