//! Run configuration.

use crate::drain::{DrainBias, WaitPolicy};
use crate::error::ConfigError;

/// Per-descriptor queue ceiling enforced by the sg driver.
pub const MAX_QUEUE_DEPTH: u32 = 16;

/// One device a worker can be bound to, with the address range its
/// data-transfer commands draw from. Workers are assigned targets
/// round-robin by index.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    /// Device node path, e.g. `/dev/sg1`.
    pub path: String,
    /// Block addressing for READ(16)/WRITE(16). Ignored by probes.
    pub addressing: Addressing,
}

impl TargetSpec {
    /// Target every command at one fixed block address.
    pub fn fixed(path: impl Into<String>, lba: u64) -> Self {
        Self {
            path: path.into(),
            addressing: Addressing::Fixed(lba),
        }
    }

    /// Draw each command's block address uniformly from `low..=high`.
    pub fn spanning(path: impl Into<String>, low: u64, high: u64) -> Self {
        Self {
            path: path.into(),
            addressing: Addressing::Span { low, high },
        }
    }
}

/// Block address selection for data-transfer commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Every command targets the same block.
    Fixed(u64),
    /// Each command draws uniformly from the inclusive range.
    Span { low: u64, high: u64 },
}

/// Which command each injected operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpKind {
    /// TEST UNIT READY, no data transfer.
    #[default]
    Probe,
    /// Single-block READ(16).
    Read,
    /// Single-block WRITE(16).
    Write,
}

impl OpKind {
    /// Whether this operation moves data and therefore needs a buffer.
    pub fn is_transfer(&self) -> bool {
        !matches!(self, OpKind::Probe)
    }
}

/// Where the driver places submitted commands in its internal queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueDiscipline {
    /// Leave ordering to the driver default.
    #[default]
    DriverDefault,
    /// Ask for head-of-queue insertion.
    AtHead,
    /// Ask for tail insertion.
    AtTail,
}

/// Configuration for a dispatch run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Devices to exercise. Workers bind round-robin by worker index.
    pub targets: Vec<TargetSpec>,
    /// Commands each worker injects before winding down.
    pub per_worker: u64,
    /// Maximum commands in flight per worker. Capped at [`MAX_QUEUE_DEPTH`].
    pub queue_depth: u32,
    /// Number of worker threads.
    pub workers: usize,
    /// Operation each injected command performs.
    pub op: OpKind,
    /// Harvest aggressiveness while the queue still has room.
    pub bias: DrainBias,
    /// How to wait when no completion is ready and the queue is full.
    pub wait: WaitPolicy,
    /// Transfer unit in bytes for data-moving commands.
    pub block_size: u32,
    /// Queue placement hint passed to the driver.
    pub discipline: QueueDiscipline,
    /// Request direct (zero-copy) transfer from the driver.
    pub direct: bool,
    /// Suppress the actual data movement while keeping command framing.
    pub no_transfer: bool,
    /// Open devices in blocking mode instead of O_NONBLOCK.
    pub blocking_open: bool,
    /// Per-command driver timeout in milliseconds.
    pub command_timeout_ms: u32,
    /// Diagnostic verbosity; each level adds detail. 0 is quiet, 1 adds
    /// worker lifecycle, 2 adds setup detail, 4 adds per-command traces.
    pub verbose: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            per_worker: 1000,
            queue_depth: MAX_QUEUE_DEPTH,
            workers: 4,
            op: OpKind::Probe,
            bias: DrainBias::FavorSubmissions,
            wait: WaitPolicy::SleepMs(10),
            block_size: 512,
            discipline: QueueDiscipline::DriverDefault,
            direct: false,
            no_transfer: false,
            blocking_open: false,
            command_timeout_ms: 20_000,
            verbose: 0,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError("at least one target device is required".into()));
        }
        for target in &self.targets {
            if target.path.is_empty() {
                return Err(ConfigError("target device path must not be empty".into()));
            }
            if let Addressing::Span { low, high } = target.addressing {
                if low > high {
                    return Err(ConfigError(format!(
                        "address span for {} is inverted ({low} > {high})",
                        target.path
                    )));
                }
            }
        }
        if self.queue_depth == 0 || self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(ConfigError(format!(
                "queue_depth must be in 1..={MAX_QUEUE_DEPTH}"
            )));
        }
        if self.workers == 0 {
            return Err(ConfigError("workers must be > 0".into()));
        }
        if self.block_size < 256 {
            return Err(ConfigError("block_size must be >= 256".into()));
        }
        if self.command_timeout_ms == 0 {
            return Err(ConfigError("command_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use sgline::{ConfigBuilder, OpKind, TargetSpec};
///
/// let config = ConfigBuilder::new()
///     .target(TargetSpec::fixed("/dev/sg1", 1000))
///     .per_worker(1000)
///     .queue_depth(16)
///     .workers(4)
///     .op(OpKind::Read)
///     .build()
///     .expect("invalid config");
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Target settings ──────────────────────────────────────────────

    /// Add a target device.
    pub fn target(mut self, target: TargetSpec) -> Self {
        self.config.targets.push(target);
        self
    }

    /// Replace the target list.
    pub fn targets(mut self, targets: Vec<TargetSpec>) -> Self {
        self.config.targets = targets;
        self
    }

    // ── Injection settings ───────────────────────────────────────────

    /// Set the number of commands each worker injects.
    pub fn per_worker(mut self, n: u64) -> Self {
        self.config.per_worker = n;
        self
    }

    /// Set the per-worker in-flight ceiling.
    pub fn queue_depth(mut self, n: u32) -> Self {
        self.config.queue_depth = n;
        self
    }

    /// Set the number of worker threads.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n;
        self
    }

    /// Set the operation each command performs.
    pub fn op(mut self, op: OpKind) -> Self {
        self.config.op = op;
        self
    }

    // ── Drain settings ───────────────────────────────────────────────

    /// Set the harvest bias applied while the queue has room.
    pub fn bias(mut self, bias: DrainBias) -> Self {
        self.config.bias = bias;
        self
    }

    /// Set the wait policy used when the dispatcher must block.
    pub fn wait(mut self, wait: WaitPolicy) -> Self {
        self.config.wait = wait;
        self
    }

    // ── Transfer settings ────────────────────────────────────────────

    /// Set the transfer unit in bytes.
    pub fn block_size(mut self, bytes: u32) -> Self {
        self.config.block_size = bytes;
        self
    }

    /// Set the driver queue placement hint.
    pub fn discipline(mut self, discipline: QueueDiscipline) -> Self {
        self.config.discipline = discipline;
        self
    }

    /// Request direct (zero-copy) transfers.
    pub fn direct(mut self, enable: bool) -> Self {
        self.config.direct = enable;
        self
    }

    /// Suppress data movement while keeping command framing.
    pub fn no_transfer(mut self, enable: bool) -> Self {
        self.config.no_transfer = enable;
        self
    }

    // ── Session settings ─────────────────────────────────────────────

    /// Open devices in blocking mode.
    pub fn blocking_open(mut self, enable: bool) -> Self {
        self.config.blocking_open = enable;
        self
    }

    /// Set the per-command driver timeout in milliseconds.
    pub fn command_timeout_ms(mut self, ms: u32) -> Self {
        self.config.command_timeout_ms = ms;
        self
    }

    // ── Diagnostics ──────────────────────────────────────────────────

    /// Set diagnostic verbosity.
    pub fn verbose(mut self, level: u8) -> Self {
        self.config.verbose = level;
        self
    }

    /// Validate and return the config.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
