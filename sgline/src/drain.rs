//! Completion-drain policy.
//!
//! Each dispatcher iteration asks the policy how many ready completions to
//! harvest, given how many the session reports and whether the submission
//! side can still make progress. The policy is a pure decision function;
//! the dispatcher owns the actual waiting.

use std::thread;
use std::time::Duration;

/// How aggressively to harvest completions while there is still room to
/// submit. Has no effect once the queue is full or injection is finished:
/// at that point everything available is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainBias {
    /// Drain everything available each iteration (smaller queue).
    FavorCompletions,
    /// Drain half of what is available (floor division).
    Balanced,
    /// Drain one per iteration, keep the submission pipe full (larger queue).
    #[default]
    FavorSubmissions,
}

/// How the dispatcher waits when it must block for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Sleep for this many milliseconds before re-checking.
    SleepMs(u32),
    /// Cooperative thread yield.
    Yield,
    /// Give up the process scheduling quantum.
    ProcessQuantum,
}

impl WaitPolicy {
    /// Map the signed CLI value: positive = sleep ms, zero = thread yield,
    /// negative = process quantum.
    pub fn from_millis(wait_ms: i32) -> Self {
        match wait_ms {
            ms if ms > 0 => WaitPolicy::SleepMs(ms as u32),
            0 => WaitPolicy::Yield,
            _ => WaitPolicy::ProcessQuantum,
        }
    }

    /// Block once according to the policy.
    pub fn apply(&self) {
        match self {
            WaitPolicy::SleepMs(ms) => thread::sleep(Duration::from_millis(u64::from(*ms))),
            WaitPolicy::Yield => thread::yield_now(),
            WaitPolicy::ProcessQuantum => {
                // Safety: sleep(0) has no preconditions; it only yields the
                // remaining scheduling quantum.
                unsafe {
                    libc::sleep(0);
                }
            }
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        WaitPolicy::SleepMs(10)
    }
}

/// Outcome of one drain decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDecision {
    /// Read exactly this many completions.
    Drain(u32),
    /// Nothing available and no forward progress possible: wait once per the
    /// wait policy, then re-evaluate.
    Block,
    /// Nothing available but there is still room to submit: skip draining.
    Continue,
}

/// Decide how many completions to harvest this iteration.
///
/// `stalled` is true when the queue is full or injection is finished, i.e.
/// when submission cannot make forward progress. First matching rule wins:
/// a single available completion is always drained (saves re-querying), a
/// stalled queue drains everything, otherwise the bias picks the batch.
pub fn decide(stalled: bool, available: u32, bias: DrainBias) -> DrainDecision {
    match available {
        1 => DrainDecision::Drain(1),
        n if n > 1 => {
            if stalled {
                DrainDecision::Drain(n)
            } else {
                match bias {
                    DrainBias::FavorCompletions => DrainDecision::Drain(n),
                    DrainBias::Balanced => DrainDecision::Drain(n / 2),
                    DrainBias::FavorSubmissions => DrainDecision::Drain(1),
                }
            }
        }
        _ => {
            if stalled {
                DrainDecision::Block
            } else {
                DrainDecision::Continue
            }
        }
    }
}
