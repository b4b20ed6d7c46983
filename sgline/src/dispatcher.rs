//! The per-worker dispatch loop.
//!
//! Each pass submits at most one command (while the queue has room and the
//! injection quota is not exhausted), then asks the drain policy how many
//! ready completions to harvest. Completions are matched back to their
//! submissions through the correlation table and their buffers recycled.
//! The loop ends when every submitted command has been resolved, or on the
//! first fatal error.

use std::sync::Arc;
use std::thread;

use protocol_scsi::Cdb;

use crate::buffer::BufferPool;
use crate::config::{Config, OpKind};
use crate::console::Console;
use crate::correlation::{CorrelationTable, IdSource, Pending};
use crate::drain::{decide, DrainBias, DrainDecision, WaitPolicy};
use crate::error::{SessionError, WorkerError, WorkerFailure};
use crate::lba::LbaGenerator;
use crate::session::{CompletionStatus, DataTransfer, DeviceSession};
use crate::stats::RunStats;

/// Consecutive transient-exhaustion retries tolerated for one submission.
/// One more failure after this is fatal for the worker.
const MAX_CONSECUTIVE_RETRIES: u32 = 16;

/// What a finished dispatch loop leaves behind.
pub struct DispatchReport {
    /// Success, or the failure that stopped the worker.
    pub result: Result<(), WorkerFailure>,
    /// In-flight entries never resolved (nonzero only after a failure).
    pub unresolved: usize,
    /// Highest observed in-flight count.
    pub max_in_flight: u32,
}

/// Dispatch loop state for one worker.
pub struct Dispatcher<S: DeviceSession> {
    worker_id: usize,
    session: S,
    pool: BufferPool,
    table: CorrelationTable,
    lba_gen: LbaGenerator,
    ids: Arc<IdSource>,
    stats: Arc<RunStats>,
    console: Arc<Console>,
    op: OpKind,
    command_name: &'static str,
    per_worker: u64,
    queue_depth: u32,
    bias: DrainBias,
    wait: WaitPolicy,
    max_in_flight: u32,
}

impl<S: DeviceSession> Dispatcher<S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        session: S,
        pool: BufferPool,
        lba_gen: LbaGenerator,
        ids: Arc<IdSource>,
        stats: Arc<RunStats>,
        console: Arc<Console>,
        config: &Config,
    ) -> Self {
        let command_name = match config.op {
            OpKind::Probe => Cdb::test_unit_ready().name(),
            OpKind::Read => Cdb::read16(0, 1).name(),
            OpKind::Write => Cdb::write16(0, 1).name(),
        };
        Dispatcher {
            worker_id,
            session,
            pool,
            table: CorrelationTable::with_capacity(config.queue_depth),
            lba_gen,
            ids,
            stats,
            console,
            op: config.op,
            command_name,
            per_worker: config.per_worker,
            queue_depth: config.queue_depth,
            bias: config.bias,
            wait: config.wait,
            max_in_flight: 0,
        }
    }

    /// Drive the loop to completion and report what happened.
    pub fn run(mut self) -> DispatchReport {
        let result = self.dispatch();
        if let Err(failure) = &result {
            self.console
                .error(format_args!("worker {}: {failure}", self.worker_id));
        }
        let unresolved = self.table.drain_unresolved();
        if !unresolved.is_empty() {
            self.console.note(
                0,
                format_args!(
                    "worker {}: {} in-flight entries unresolved at exit",
                    self.worker_id,
                    unresolved.len()
                ),
            );
        }
        // The driver reclaims anything still queued when the handle closes.
        self.session.close();
        if self.pool.allocated() > 0 {
            self.console.note(
                3,
                format_args!(
                    "worker {}: {} transfer buffers allocated",
                    self.worker_id,
                    self.pool.allocated()
                ),
            );
        }
        self.stats
            .record_buffer_allocation(self.pool.allocated_bytes());
        DispatchReport {
            result,
            unresolved: unresolved.len(),
            max_in_flight: self.max_in_flight,
        }
    }

    fn dispatch(&mut self) -> Result<(), WorkerFailure> {
        let mut submitted: u64 = 0;
        while submitted < self.per_worker || !self.table.is_empty() {
            // Failures anywhere in this pass report the index of the last
            // command handed to the driver.
            let iteration = submitted;
            if (self.table.len() as u32) < self.queue_depth && submitted < self.per_worker {
                self.submit_one(iteration)?;
                submitted += 1;
                self.max_in_flight = self.max_in_flight.max(self.table.len() as u32);
            }
            let stalled =
                self.table.len() as u32 >= self.queue_depth || submitted >= self.per_worker;
            let available = self
                .session
                .completions_available()
                .map_err(|e| self.fail(iteration, None, WorkerError::Poll(e)))?;
            match decide(stalled, available, self.bias) {
                DrainDecision::Drain(count) => {
                    for _ in 0..count {
                        self.harvest_one(iteration)?;
                    }
                }
                DrainDecision::Block => {
                    self.stats.record_harvest_wait();
                    self.wait.apply();
                }
                DrainDecision::Continue => {}
            }
        }
        Ok(())
    }

    /// Submit one command, retrying through transient driver exhaustion.
    fn submit_one(&mut self, iteration: u64) -> Result<(), WorkerFailure> {
        let id = self.ids.next();
        let (cdb, lba, buffer, transfer) = match self.op {
            OpKind::Probe => (Cdb::test_unit_ready(), None, None, None),
            OpKind::Read | OpKind::Write => {
                let lba = self.lba_gen.next();
                let (slot, ptr, len) = self.pool.acquire().map_err(|e| {
                    self.fail(iteration, Some(lba), WorkerError::Allocation(e))
                })?;
                let (cdb, transfer) = match self.op {
                    OpKind::Read => (Cdb::read16(lba, 1), DataTransfer::from_device(ptr, len)),
                    _ => (Cdb::write16(lba, 1), DataTransfer::to_device(ptr, len)),
                };
                (cdb, Some(lba), Some(slot), Some(transfer))
            }
        };

        let mut consecutive = 0u32;
        loop {
            // Safety: the transfer buffer is pool-owned at a stable address
            // and its slot is not recycled until the completion is read.
            match unsafe { self.session.submit(&cdb, id, transfer) } {
                Ok(()) => break,
                Err(SessionError::ResourceExhausted) => {
                    consecutive += 1;
                    if consecutive > MAX_CONSECUTIVE_RETRIES {
                        if let Some(slot) = buffer {
                            self.pool.release(slot);
                        }
                        return Err(self.fail(
                            iteration,
                            lba,
                            WorkerError::ExhaustionCeiling {
                                command: self.command_name,
                                retries: MAX_CONSECUTIVE_RETRIES,
                            },
                        ));
                    }
                    self.stats.record_submit_retry();
                    thread::yield_now();
                }
                Err(source) => {
                    if let Some(slot) = buffer {
                        self.pool.release(slot);
                    }
                    return Err(self.fail(
                        iteration,
                        lba,
                        WorkerError::Submit {
                            command: self.command_name,
                            source,
                        },
                    ));
                }
            }
        }

        self.table.insert(Pending { id, lba, buffer });
        self.stats.record_submit();
        if let Some(lba) = lba {
            self.console.note(
                4,
                format_args!("worker {}: start io lba=0x{lba:x} id={id}", self.worker_id),
            );
        }
        Ok(())
    }

    /// Read one completion, waiting through not-ready bounces, and resolve
    /// it against the table.
    fn harvest_one(&mut self, iteration: u64) -> Result<(), WorkerFailure> {
        let (id, status) = loop {
            match self.session.read_completion() {
                Ok(completion) => break completion,
                Err(SessionError::NotReady) => {
                    self.stats.record_harvest_wait();
                    self.wait.apply();
                }
                Err(source) => {
                    return Err(self.fail(iteration, None, WorkerError::Read(source)))
                }
            }
        };

        match status {
            CompletionStatus::Failed { detail } => {
                self.stats.record_failure();
                // Left in the table on purpose; the exit report counts it.
                let lba = self.table.get(id).and_then(|pending| pending.lba);
                return Err(self.fail(
                    iteration,
                    lba,
                    WorkerError::CommandFailed {
                        command: self.command_name,
                        id: id.as_raw(),
                        detail,
                    },
                ));
            }
            CompletionStatus::Recovered => {
                self.stats.record_recovered();
                self.console.note(
                    0,
                    format_args!(
                        "worker {}: recovered error on {}, continuing",
                        self.worker_id, self.command_name
                    ),
                );
            }
            CompletionStatus::Good => {}
        }

        match self.table.take(id) {
            Some(pending) => {
                if let Some(slot) = pending.buffer {
                    self.pool.release(slot);
                }
                self.stats.record_finish();
                if let Some(lba) = pending.lba {
                    self.console.note(
                        4,
                        format_args!(
                            "worker {}: finish io lba=0x{lba:x} id={id}",
                            self.worker_id
                        ),
                    );
                }
            }
            None => {
                self.stats.record_orphan();
                self.console.note(
                    0,
                    format_args!(
                        "worker {}: completion id {id} has no in-flight entry",
                        self.worker_id
                    ),
                );
            }
        }
        Ok(())
    }

    fn fail(&self, iteration: u64, lba: Option<u64>, error: WorkerError) -> WorkerFailure {
        WorkerFailure {
            iteration,
            lba,
            error,
        }
    }
}
