//! Run coordination.
//!
//! `run` spawns one named thread per worker, binds each to a target
//! round-robin, and blocks until every dispatch loop has finished. Workers
//! are independent: one failing its device does not stop the others. Their
//! reports come back over a channel and are folded into a single
//! [`RunReport`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::BufferPool;
use crate::config::{Addressing, Config};
use crate::console::Console;
use crate::correlation::IdSource;
use crate::dispatcher::{DispatchReport, Dispatcher};
use crate::error::{RunError, WorkerError, WorkerFailure};
use crate::lba::LbaGenerator;
use crate::sg::SgSession;
use crate::stats::{RunStats, StatsSnapshot};

/// Aggregate outcome of one run across all workers.
#[derive(Debug)]
pub struct RunReport {
    /// Counter totals at the end of the run.
    pub snapshot: StatsSnapshot,
    /// Wall time from first spawn to last join.
    pub elapsed: Duration,
    /// Highest correlation id issued; 0 if nothing was submitted.
    pub last_id: u32,
    /// In-flight entries abandoned by failed workers.
    pub unresolved: usize,
    /// Highest in-flight count any worker observed.
    pub max_in_flight: u32,
    /// Worker failures, ordered by worker id.
    pub failures: Vec<(usize, WorkerFailure)>,
}

impl RunReport {
    /// Resolved commands per second.
    pub fn iops(&self) -> f64 {
        self.snapshot.iops(self.elapsed)
    }

    /// Whether every worker finished its injection quota.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run a full dispatch session and block until it finishes.
///
/// Spawns `config.workers` threads. Worker `i` exercises
/// `config.targets[i % targets.len()]`, so a single target is shared by all
/// workers and multiple targets are spread across them.
pub fn run(config: &Config, console: &Arc<Console>) -> Result<RunReport, RunError> {
    config.validate()?;

    let ids = Arc::new(IdSource::new());
    let stats = Arc::new(RunStats::new());
    let (report_tx, report_rx) = crossbeam_channel::unbounded();

    let start = Instant::now();
    let mut handles = Vec::with_capacity(config.workers);
    for worker_id in 0..config.workers {
        let config = config.clone();
        let console = Arc::clone(console);
        let ids = Arc::clone(&ids);
        let stats = Arc::clone(&stats);
        let tx = report_tx.clone();
        let name = format!("sgline-worker-{worker_id}");
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                crate::counter::set_thread_shard(worker_id);
                let report = run_worker(worker_id, &config, ids, stats, console);
                // The receiver is held until every worker exits.
                let _ = tx.send((worker_id, report));
            })
            .map_err(|source| RunError::Spawn { name, source })?;
        handles.push(handle);
    }
    drop(report_tx);

    let mut failures = Vec::new();
    let mut unresolved = 0;
    let mut max_in_flight = 0;
    for (worker_id, report) in report_rx {
        unresolved += report.unresolved;
        max_in_flight = max_in_flight.max(report.max_in_flight);
        if let Err(failure) = report.result {
            stats.record_worker_failure();
            failures.push((worker_id, failure));
        }
    }
    collect_panicked(handles, console, &stats, &mut failures);
    let elapsed = start.elapsed();
    failures.sort_by_key(|&(worker_id, _)| worker_id);

    Ok(RunReport {
        snapshot: stats.snapshot(),
        elapsed,
        last_id: ids.last_issued(),
        unresolved,
        max_in_flight,
        failures,
    })
}

/// Join every worker thread. A panicked worker dropped its sender without
/// reporting, so it gets a synthetic failure record and counts against the
/// run like any other worker failure.
fn collect_panicked(
    handles: Vec<thread::JoinHandle<()>>,
    console: &Console,
    stats: &RunStats,
    failures: &mut Vec<(usize, WorkerFailure)>,
) {
    for (worker_id, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            let failure = WorkerFailure {
                iteration: 0,
                lba: None,
                error: WorkerError::Panicked,
            };
            console.error(format_args!("worker {worker_id}: {failure}"));
            stats.record_worker_failure();
            failures.push((worker_id, failure));
        }
    }
}

/// Open the device, set up per-worker state, and drive the dispatch loop.
fn run_worker(
    worker_id: usize,
    config: &Config,
    ids: Arc<IdSource>,
    stats: Arc<RunStats>,
    console: Arc<Console>,
) -> DispatchReport {
    let target = &config.targets[worker_id % config.targets.len()];
    console.note(
        1,
        format_args!("worker {worker_id}: enter, device {}", target.path),
    );

    let session = match SgSession::open(&target.path, config) {
        Ok(session) => session,
        Err(err) => return abort(&console, worker_id, WorkerError::Open(err)),
    };
    let pool = match BufferPool::new(config.block_size) {
        Ok(pool) => pool,
        Err(err) => return abort(&console, worker_id, WorkerError::Allocation(err)),
    };
    let lba_gen = LbaGenerator::new(target.addressing);

    if config.op.is_transfer() {
        match target.addressing {
            Addressing::Fixed(lba) => {
                console.note(2, format_args!("worker {worker_id}: fixed lba 0x{lba:x}"));
            }
            Addressing::Span { low, high } => {
                let seed = lba_gen.seed().unwrap_or_default();
                console.note(
                    2,
                    format_args!(
                        "worker {worker_id}: lba span [0x{low:x}, 0x{high:x}], seed 0x{seed:x}"
                    ),
                );
            }
        }
    }
    console.note(
        2,
        format_args!("worker {worker_id}: sg flags 0x{:x}", session.flags()),
    );

    Dispatcher::new(
        worker_id, session, pool, lba_gen, ids, stats, console, config,
    )
    .run()
}

/// Report a worker that failed before its dispatch loop could start.
fn abort(console: &Console, worker_id: usize, error: WorkerError) -> DispatchReport {
    let failure = WorkerFailure {
        iteration: 0,
        lba: None,
        error,
    };
    console.error(format_args!("worker {worker_id}: {failure}"));
    DispatchReport {
        result: Err(failure),
        unresolved: 0,
        max_in_flight: 0,
    }
}
