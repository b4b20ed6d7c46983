use std::fmt;
use std::io;

use thiserror::Error;

/// Configuration rejected before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

/// Failure to open a device session. Aborts only the worker that hit it.
#[derive(Debug, Error)]
pub enum OpenError {
    /// The open syscall itself failed.
    #[error("open {path}: {source}")]
    Device { path: String, source: io::Error },
    /// The path exists but is not a character device. Block devices are
    /// refused outright: queuing raw commands at one can destroy it.
    #[error("{path} is not a character device")]
    NotCharDevice { path: String },
}

/// Errors returned by device session operations.
///
/// `ResourceExhausted` and `NotReady` are the two transient signals the
/// dispatcher retries internally; everything else aborts the worker.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Submission resources exhausted (sg driver ENOMEM). Yield and retry.
    #[error("submission resources exhausted")]
    ResourceExhausted,
    /// No completion ready yet. Apply the wait policy and retry.
    #[error("no completion ready")]
    NotReady,
    /// Session syscall failed for a non-transient reason.
    #[error("device session: {0}")]
    Io(#[from] io::Error),
}

/// Aligned buffer allocation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("aligned allocation of {bytes} bytes failed")]
pub struct AllocError {
    /// Requested block size.
    pub bytes: usize,
}

/// Failure while probing a device before the run starts.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Open(#[from] OpenError),
    /// The probe ioctl itself failed.
    #[error("{command}: {source}")]
    Io {
        command: &'static str,
        source: io::Error,
    },
    /// The device rejected or failed the probe command.
    #[error("{command} failed: {detail}")]
    CommandFailed {
        command: &'static str,
        detail: String,
    },
}

/// Failure that prevents a run from starting at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The OS refused to start a worker thread.
    #[error("spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Why a worker stopped before finishing its injection quota.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Open(#[from] OpenError),
    /// Transfer buffer allocation failed.
    #[error(transparent)]
    Allocation(#[from] AllocError),
    /// Submission failed for a non-transient reason.
    #[error("submit {command}: {source}")]
    Submit {
        command: &'static str,
        source: SessionError,
    },
    /// Resource exhaustion persisted past the consecutive-retry ceiling.
    #[error("submit {command}: resource exhaustion persisted after {retries} consecutive retries")]
    ExhaustionCeiling { command: &'static str, retries: u32 },
    /// Querying the number of ready completions failed.
    #[error("completion count query: {0}")]
    Poll(#[source] SessionError),
    /// Reading a completion failed for a non-transient reason.
    #[error("completion read: {0}")]
    Read(#[source] SessionError),
    /// The device reported a non-recoverable result for a command.
    #[error("{command} failed on device, correlation id {id}: {detail}")]
    CommandFailed {
        command: &'static str,
        id: u32,
        detail: String,
    },
    /// The worker thread panicked instead of returning a report.
    #[error("worker thread panicked")]
    Panicked,
}

/// Terminal failure record for one worker: the submission-count iteration at
/// which it stopped, the underlying error, and the failing command's target
/// address when the correlation table could resolve it.
#[derive(Debug)]
pub struct WorkerFailure {
    pub iteration: u64,
    pub lba: Option<u64>,
    pub error: WorkerError,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed at iteration {}", self.iteration)?;
        if let Some(lba) = self.lba {
            write!(f, " (lba=0x{lba:x})")?;
        }
        write!(f, ": {}", self.error)
    }
}

impl std::error::Error for WorkerFailure {}
