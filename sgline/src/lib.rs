//! sgline — asynchronous SCSI-generic command dispatch for Linux.
//!
//! sgline drives `/dev/sg*` character devices through the sg driver's
//! write/read submission interface. Each worker thread keeps up to a
//! configured number of commands in flight against its device, matches
//! completions back to submissions by correlation id, and decides every
//! loop pass how aggressively to harvest ready completions versus inject
//! new commands. Transfer buffers are page-aligned and recycled through a
//! per-worker pool.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sgline::{ConfigBuilder, Console, OpKind, TargetSpec};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigBuilder::new()
//!         .target(TargetSpec::fixed("/dev/sg1", 0x1234))
//!         .op(OpKind::Read)
//!         .per_worker(10_000)
//!         .workers(4)
//!         .build()?;
//!     let console = Arc::new(Console::new(config.verbose));
//!     let report = sgline::run(&config, &console)?;
//!     println!(
//!         "{} commands in {:?} ({:.2} IOPS)",
//!         report.snapshot.finished,
//!         report.elapsed,
//!         report.iops()
//!     );
//!     Ok(())
//! }
//! ```
//!
//! # Platform
//!
//! Linux only. Targets must be SCSI generic character devices; block
//! device nodes are refused at open. The per-device in-flight ceiling is
//! the sg driver's own queue limit of 16 commands.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod buffer;
pub(crate) mod console;
pub(crate) mod correlation;
pub(crate) mod counter;
pub(crate) mod dispatcher;
pub(crate) mod lba;
pub(crate) mod metrics;
pub(crate) mod probe;
pub(crate) mod session;
pub(crate) mod sg;
pub(crate) mod stats;
pub(crate) mod worker;

// ── Public modules ──────────────────────────────────────────────────────
pub mod config;
pub mod drain;
pub mod error;

// ── Re-exports: Configuration ───────────────────────────────────────────

/// Block address selection for data-transfer commands.
pub use config::Addressing;
/// Run configuration.
pub use config::Config;
/// Builder for [`Config`] with discoverable methods and `build()` validation.
pub use config::ConfigBuilder;
/// Per-descriptor queue ceiling enforced by the sg driver.
pub use config::MAX_QUEUE_DEPTH;
/// Which command each injected operation carries.
pub use config::OpKind;
/// Driver-side queue placement hint.
pub use config::QueueDiscipline;
/// One device binding with its address range.
pub use config::TargetSpec;

// ── Re-exports: Drain policy ────────────────────────────────────────────

/// Harvest aggressiveness while the queue still has room.
pub use drain::DrainBias;
/// Outcome of one drain-policy consultation.
pub use drain::DrainDecision;
/// How a worker yields when it must wait for completions.
pub use drain::WaitPolicy;
/// The drain decision table.
pub use drain::decide;

// ── Re-exports: Sessions ────────────────────────────────────────────────

/// Command descriptor block, re-exported from `protocol-scsi`.
pub use protocol_scsi::Cdb;
/// Data movement direction for one command.
pub use session::DataDirection;
/// Buffer handed to the driver for one command's data phase.
pub use session::DataTransfer;
/// Device-reported outcome of one completed command.
pub use session::CompletionStatus;
/// Asynchronous submit/poll/read interface a dispatch loop drives.
pub use session::DeviceSession;
/// Open an sg node, enforcing the character-device requirement.
pub use sg::open_device;
/// An open sg device with the run's command flags applied.
pub use sg::SgSession;
/// Device geometry reported by READ CAPACITY(10).
pub use probe::Capacity;
/// INQUIRY the device and return its product identification string.
pub use probe::inquiry_product_id;
/// Fetch last LBA and block size, retrying one unit-attention bounce.
pub use probe::read_capacity;

// ── Re-exports: Dispatch ────────────────────────────────────────────────

/// Recycling pool of page-aligned transfer buffers.
pub use buffer::BufferPool;
/// Correlation id carried by one in-flight command.
pub use correlation::CorrelationId;
/// Process-wide correlation id allocator.
pub use correlation::IdSource;
/// Route this thread's statistics to its own counter shard.
pub use counter::set_thread_shard;
/// The per-worker dispatch loop.
pub use dispatcher::Dispatcher;
/// What a finished dispatch loop leaves behind.
pub use dispatcher::DispatchReport;
/// Block address generator for injected commands.
pub use lba::LbaGenerator;
/// Aggregate outcome of one run across all workers.
pub use worker::RunReport;
/// Run a full dispatch session and block until it finishes.
pub use worker::run;

// ── Re-exports: Diagnostics ─────────────────────────────────────────────

/// Serialized stderr diagnostics with a verbosity threshold.
pub use console::Console;
/// Failure that prevents a run from starting at all.
pub use error::RunError;
/// Terminal failure record for one worker.
pub use error::WorkerFailure;
/// Sharded event counters for one run.
pub use stats::RunStats;
/// Point-in-time totals for one run.
pub use stats::StatsSnapshot;
