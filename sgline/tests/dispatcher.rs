//! Integration tests: dispatch loop driven against a scripted session.
//!
//! Each test builds a `SimulatedSession` whose submit/poll/read behavior is
//! scripted, runs a dispatcher over it, and checks the report and counter
//! totals. No sg device is involved.

use std::collections::VecDeque;
use std::ptr;
use std::sync::Arc;

use proptest::prelude::*;

use sgline::error::{SessionError, WorkerError};
use sgline::{
    BufferPool, Cdb, CompletionStatus, Config, Console, CorrelationId, DataDirection,
    DataTransfer, DeviceSession, DispatchReport, Dispatcher, DrainBias, IdSource, LbaGenerator,
    OpKind, RunStats, StatsSnapshot, TargetSpec, WaitPolicy,
};

// ── Scripted session ────────────────────────────────────────────────

/// In-memory device. Completions become ready the moment their submission
/// is accepted; the knobs below script exhaustion bounces, empty polls,
/// read bounces, stray completions, and per-command outcomes.
#[derive(Default)]
struct SimulatedSession {
    ready: VecDeque<(CorrelationId, CompletionStatus)>,
    /// ResourceExhausted bounces remaining before submits succeed.
    exhaustions: u32,
    /// Polls to answer "nothing ready" before the backlog becomes visible.
    closed_polls: u32,
    /// NotReady bounces remaining before reads succeed.
    read_bounces: u32,
    /// Raw ids to complete ahead of any real submission.
    orphans: VecDeque<u32>,
    /// 1-based submission index that completes with a fatal error.
    fail_at: Option<u64>,
    /// 1-based submission index that completes with a recovered condition.
    recover_at: Option<u64>,
    /// When set, every submission must (true) or must not (false) carry a
    /// data transfer.
    expect_transfer: Option<bool>,
    submits: u64,
}

impl DeviceSession for SimulatedSession {
    unsafe fn submit(
        &mut self,
        _cdb: &Cdb,
        id: CorrelationId,
        transfer: Option<DataTransfer>,
    ) -> Result<(), SessionError> {
        if self.exhaustions > 0 {
            self.exhaustions -= 1;
            return Err(SessionError::ResourceExhausted);
        }
        if let Some(expected) = self.expect_transfer {
            assert_eq!(transfer.is_some(), expected);
        }
        if let Some(transfer) = transfer {
            if transfer.direction == DataDirection::FromDevice {
                // Land data in the borrowed buffer like the driver would.
                unsafe { ptr::write_bytes(transfer.ptr, 0x5a, transfer.len as usize) };
            }
        }
        self.submits += 1;
        let status = if Some(self.submits) == self.fail_at {
            CompletionStatus::Failed {
                detail: "medium error".to_string(),
            }
        } else if Some(self.submits) == self.recover_at {
            CompletionStatus::Recovered
        } else {
            CompletionStatus::Good
        };
        self.ready.push_back((id, status));
        Ok(())
    }

    fn completions_available(&mut self) -> Result<u32, SessionError> {
        if self.closed_polls > 0 {
            self.closed_polls -= 1;
            return Ok(0);
        }
        Ok((self.orphans.len() + self.ready.len()) as u32)
    }

    fn read_completion(&mut self) -> Result<(CorrelationId, CompletionStatus), SessionError> {
        if self.read_bounces > 0 {
            self.read_bounces -= 1;
            return Err(SessionError::NotReady);
        }
        if let Some(raw) = self.orphans.pop_front() {
            return Ok((CorrelationId::from_raw(raw), CompletionStatus::Good));
        }
        self.ready.pop_front().ok_or(SessionError::NotReady)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn test_config(per_worker: u64, queue_depth: u32, op: OpKind) -> Config {
    Config {
        targets: vec![TargetSpec::fixed("/dev/sg0", 0x100)],
        per_worker,
        queue_depth,
        workers: 1,
        op,
        wait: WaitPolicy::Yield,
        ..Config::default()
    }
}

fn run_dispatch(session: SimulatedSession, config: &Config) -> (DispatchReport, StatsSnapshot) {
    let stats = Arc::new(RunStats::new());
    let report = Dispatcher::new(
        0,
        session,
        BufferPool::new(config.block_size).unwrap(),
        LbaGenerator::new(config.targets[0].addressing),
        Arc::new(IdSource::new()),
        Arc::clone(&stats),
        Arc::new(Console::new(0)),
        config,
    )
    .run();
    (report, stats.snapshot())
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn full_quota_resolves_cleanly() {
    let config = test_config(1000, 16, OpKind::Read);
    let session = SimulatedSession {
        expect_transfer: Some(true),
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(report.unresolved, 0);
    assert!(report.max_in_flight <= 16);
    assert_eq!(snapshot.started, 1000);
    assert_eq!(snapshot.finished, 1000);
    assert_eq!(snapshot.orphaned, 0);
    assert_eq!(snapshot.failed, 0);
    assert_eq!(snapshot.recovered, 0);
}

#[test]
fn every_bias_drains_a_backlog() {
    for bias in [
        DrainBias::FavorSubmissions,
        DrainBias::Balanced,
        DrainBias::FavorCompletions,
    ] {
        let mut config = test_config(64, 16, OpKind::Read);
        config.bias = bias;
        let session = SimulatedSession {
            closed_polls: 8,
            ..Default::default()
        };
        let (report, snapshot) = run_dispatch(session, &config);

        assert!(report.result.is_ok(), "bias {bias:?}");
        assert_eq!(report.unresolved, 0, "bias {bias:?}");
        assert_eq!(snapshot.started, 64, "bias {bias:?}");
        assert_eq!(snapshot.finished, 64, "bias {bias:?}");
    }
}

#[test]
fn in_flight_never_exceeds_queue_depth() {
    let config = test_config(32, 4, OpKind::Read);
    let session = SimulatedSession {
        closed_polls: 64,
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(report.max_in_flight, 4);
    // Three empty polls land while the queue is filling; the other 61
    // arrive with it full and each one takes a wait.
    assert_eq!(snapshot.harvest_waits, 61);
    assert_eq!(snapshot.started, 32);
    assert_eq!(snapshot.finished, 32);
}

#[test]
fn transient_exhaustion_retries_then_proceeds() {
    let config = test_config(10, 16, OpKind::Read);
    let session = SimulatedSession {
        exhaustions: 3,
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(snapshot.submit_retries, 3);
    assert_eq!(snapshot.started, 10);
    assert_eq!(snapshot.finished, 10);
}

#[test]
fn exhaustion_past_ceiling_fails_worker() {
    let config = test_config(10, 16, OpKind::Read);
    let session = SimulatedSession {
        exhaustions: 17,
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    let failure = report.result.unwrap_err();
    assert!(matches!(
        failure.error,
        WorkerError::ExhaustionCeiling { retries: 16, .. }
    ));
    assert_eq!(failure.iteration, 0);
    assert_eq!(failure.lba, Some(0x100));
    assert_eq!(snapshot.submit_retries, 16);
    assert_eq!(snapshot.started, 0);
    assert_eq!(report.unresolved, 0);
}

#[test]
fn blocks_when_full_until_a_slot_frees() {
    let config = test_config(64, 8, OpKind::Read);
    let session = SimulatedSession {
        closed_polls: 15,
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(report.max_in_flight, 8);
    // Seven empty polls land while the queue is filling; the other eight
    // arrive with it full and each one takes a wait.
    assert_eq!(snapshot.harvest_waits, 8);
    assert_eq!(snapshot.started, 64);
    assert_eq!(snapshot.finished, 64);
}

#[test]
fn orphan_completion_is_counted_and_skipped() {
    let config = test_config(5, 16, OpKind::Read);
    let session = SimulatedSession {
        orphans: VecDeque::from([7777]),
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(snapshot.orphaned, 1);
    assert_eq!(snapshot.started, 5);
    assert_eq!(snapshot.finished, 5);
    assert_eq!(report.unresolved, 0);
}

#[test]
fn failed_completion_stops_worker_and_leaks_entry() {
    let config = test_config(10, 16, OpKind::Read);
    let session = SimulatedSession {
        fail_at: Some(3),
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    let failure = report.result.unwrap_err();
    assert!(matches!(
        failure.error,
        WorkerError::CommandFailed { id: 3, .. }
    ));
    assert_eq!(failure.iteration, 2);
    assert_eq!(failure.lba, Some(0x100));
    assert_eq!(snapshot.started, 3);
    assert_eq!(snapshot.finished, 2);
    assert_eq!(snapshot.failed, 1);
    assert_eq!(report.unresolved, 1);
}

#[test]
fn recovered_completion_resolves_normally() {
    let config = test_config(4, 16, OpKind::Read);
    let session = SimulatedSession {
        recover_at: Some(2),
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(snapshot.recovered, 1);
    assert_eq!(snapshot.finished, 4);
    assert_eq!(snapshot.failed, 0);
}

#[test]
fn read_bounces_count_as_harvest_waits() {
    let config = test_config(1, 16, OpKind::Read);
    let session = SimulatedSession {
        read_bounces: 2,
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(snapshot.harvest_waits, 2);
    assert_eq!(snapshot.finished, 1);
}

#[test]
fn probe_commands_carry_no_transfer() {
    let config = test_config(50, 16, OpKind::Probe);
    let session = SimulatedSession {
        expect_transfer: Some(false),
        ..Default::default()
    };
    let (report, snapshot) = run_dispatch(session, &config);

    assert!(report.result.is_ok());
    assert_eq!(snapshot.finished, 50);
}

// ── Properties ──────────────────────────────────────────────────────

proptest! {
    #[test]
    fn quota_is_conserved_for_any_schedule(
        per_worker in 0u64..200,
        queue_depth in 1u32..=16,
        closed_polls in 0u32..32,
        read_bounces in 0u32..4,
        bias_pick in 0usize..3,
    ) {
        let bias = [
            DrainBias::FavorSubmissions,
            DrainBias::Balanced,
            DrainBias::FavorCompletions,
        ][bias_pick];
        let mut config = test_config(per_worker, queue_depth, OpKind::Read);
        config.bias = bias;
        let session = SimulatedSession {
            closed_polls,
            read_bounces,
            ..Default::default()
        };
        let (report, snapshot) = run_dispatch(session, &config);

        prop_assert!(report.result.is_ok());
        prop_assert_eq!(report.unresolved, 0);
        prop_assert!(report.max_in_flight <= queue_depth);
        prop_assert_eq!(snapshot.started, per_worker);
        prop_assert_eq!(snapshot.finished, per_worker);
        prop_assert_eq!(snapshot.orphaned, 0);
    }
}
