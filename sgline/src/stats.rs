//! Per-run aggregate accounting.
//!
//! One [`RunStats`] is shared by every worker in a run. Events land in a
//! sharded [`CounterGroup`] (workers write their own shard) and are mirrored
//! into the process-wide [`crate::metrics`] statics, which outlive the run.
//! Totals are read once the workers have joined.

use std::time::Duration;

use crate::counter::CounterGroup;
use crate::metrics;

/// Counter slot indices within the run group.
mod slots {
    pub const STARTED: usize = 0;
    pub const FINISHED: usize = 1;
    pub const SUBMIT_RETRIES: usize = 2;
    pub const HARVEST_WAITS: usize = 3;
    pub const ORPHANED: usize = 4;
    pub const RECOVERED: usize = 5;
    pub const FAILED: usize = 6;
}

/// Event counters for one run.
pub struct RunStats {
    group: CounterGroup,
}

impl RunStats {
    pub const fn new() -> Self {
        RunStats {
            group: CounterGroup::new(),
        }
    }

    /// A command was handed to the driver.
    pub fn record_submit(&self) {
        self.group.increment(slots::STARTED);
        metrics::COMMANDS_SUBMITTED.increment();
    }

    /// A completion was matched and resolved.
    pub fn record_finish(&self) {
        self.group.increment(slots::FINISHED);
        metrics::COMMANDS_COMPLETED.increment();
    }

    /// A submission bounced off transient driver exhaustion and was retried.
    pub fn record_submit_retry(&self) {
        self.group.increment(slots::SUBMIT_RETRIES);
        metrics::SUBMIT_RETRIES.increment();
    }

    /// The dispatcher waited because no completion was ready.
    pub fn record_harvest_wait(&self) {
        self.group.increment(slots::HARVEST_WAITS);
        metrics::HARVEST_WAITS.increment();
    }

    /// A completion arrived with no matching in-flight entry.
    pub fn record_orphan(&self) {
        self.group.increment(slots::ORPHANED);
        metrics::COMMANDS_ORPHANED.increment();
    }

    /// A command completed after a recovered device condition.
    pub fn record_recovered(&self) {
        self.group.increment(slots::RECOVERED);
        metrics::COMMANDS_RECOVERED.increment();
    }

    /// A command completed with a fatal device error.
    pub fn record_failure(&self) {
        self.group.increment(slots::FAILED);
        metrics::COMMANDS_FAILED.increment();
    }

    /// A worker allocated its buffer pool.
    pub fn record_buffer_allocation(&self, bytes: usize) {
        metrics::BUFFER_BYTES_ALLOCATED.add(bytes as u64);
    }

    /// A worker stopped on a fatal error.
    pub fn record_worker_failure(&self) {
        metrics::WORKER_FAILURES.increment();
    }

    /// Read the current totals.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            started: self.group.value(slots::STARTED),
            finished: self.group.value(slots::FINISHED),
            submit_retries: self.group.value(slots::SUBMIT_RETRIES),
            harvest_waits: self.group.value(slots::HARVEST_WAITS),
            orphaned: self.group.value(slots::ORPHANED),
            recovered: self.group.value(slots::RECOVERED),
            failed: self.group.value(slots::FAILED),
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time totals for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Commands handed to the driver.
    pub started: u64,
    /// Completions matched and resolved.
    pub finished: u64,
    /// Submissions retried after transient exhaustion.
    pub submit_retries: u64,
    /// Waits taken with nothing ready to harvest.
    pub harvest_waits: u64,
    /// Completions with no matching in-flight entry.
    pub orphaned: u64,
    /// Recovered device conditions.
    pub recovered: u64,
    /// Fatal device errors.
    pub failed: u64,
}

impl StatsSnapshot {
    /// Resolved commands per second over the given wall time.
    pub fn iops(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.finished as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn snapshot_reflects_events() {
        let stats = RunStats::new();
        stats.record_submit();
        stats.record_submit();
        stats.record_finish();
        stats.record_submit_retry();
        stats.record_harvest_wait();
        stats.record_orphan();
        stats.record_recovered();
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.started, 2);
        assert_eq!(snap.finished, 1);
        assert_eq!(snap.submit_retries, 1);
        assert_eq!(snap.harvest_waits, 1);
        assert_eq!(snap.orphaned, 1);
        assert_eq!(snap.recovered, 1);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn totals_aggregate_across_workers() {
        let stats = Arc::new(RunStats::new());
        let handles: Vec<_> = (0..4)
            .map(|id| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    crate::counter::set_thread_shard(id);
                    for _ in 0..250 {
                        stats.record_submit();
                        stats.record_finish();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.started, 1000);
        assert_eq!(snap.finished, 1000);
    }

    #[test]
    fn iops_guards_zero_elapsed() {
        let stats = RunStats::new();
        for _ in 0..500 {
            stats.record_finish();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.iops(Duration::ZERO), 0.0);
        let per_sec = snap.iops(Duration::from_millis(250));
        assert!((per_sec - 2000.0).abs() < f64::EPSILON * 2000.0);
    }
}
