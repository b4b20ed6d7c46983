//! sgline-stress — multi-threaded SCSI command stress driver.
//!
//! Worker threads send READ(16), WRITE(16), or TEST UNIT READY commands at
//! the listed sg character devices, each keeping up to 16 commands in
//! flight. Devices are assigned to threads round robin. One block moves per
//! READ or WRITE, and WRITEs write zeros, so by default only devices whose
//! INQUIRY product id is `scsi_debug` are accepted; `-f` overrides.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use sgline::{
    inquiry_product_id, open_device, read_capacity, run, Addressing, Config, Console, DrainBias,
    OpKind, QueueDiscipline, TargetSpec, WaitPolicy, MAX_QUEUE_DEPTH,
};

/// Upper bound of a `-l lba,hi_lba` range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HighLba {
    /// Inclusive upper bound given on the command line.
    Fixed(u64),
    /// `-1` was given: use each device's last block from READ CAPACITY(10).
    LastBlock,
}

/// Parsed `-l` argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LbaRange {
    lba: u64,
    hi: Option<HighLba>,
}

/// Accepts decimal, `0x`-prefixed hex, or hex with a trailing `h`.
fn parse_num(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = s.strip_suffix(['h', 'H']) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_lba_range(s: &str) -> Result<LbaRange, String> {
    let (low, high) = match s.split_once(',') {
        Some((low, high)) => (low, Some(high)),
        None => (s, None),
    };
    let lba = parse_num(low).ok_or_else(|| format!("could not decode lba in '{s}'"))?;
    let hi = match high {
        None => None,
        Some("-1") => Some(HighLba::LastBlock),
        Some(text) => Some(HighLba::Fixed(
            parse_num(text).ok_or_else(|| format!("could not decode hi_lba in '{s}'"))?,
        )),
    };
    Ok(LbaRange { lba, hi })
}

/// Multi-threaded SCSI command stress driver for sg devices.
#[derive(Parser, Debug)]
#[command(name = "sgline-stress", version, about, long_about = None)]
struct Cli {
    /// Use direct (zero copy) data transfer.
    #[arg(short = 'd', long)]
    direct: bool,

    /// Accept any sg device, not just scsi_debug ones. WRITEs destroy data.
    #[arg(short = 'f', long)]
    force: bool,

    /// Block to access, or inclusive range `lba,hi_lba`. A hi_lba of -1
    /// means each device's last block. Values may be decimal or hex.
    #[arg(short = 'l', long = "lba", value_parser = parse_lba_range, default_value = "1000")]
    lba: LbaRange,

    /// Maximum commands in flight per thread.
    #[arg(
        short = 'M',
        long = "maxq",
        default_value_t = MAX_QUEUE_DEPTH,
        value_parser = clap::value_parser!(u32).range(1..=MAX_QUEUE_DEPTH as i64)
    )]
    maxq: u32,

    /// Commands each thread injects.
    #[arg(short = 'n', long = "num-per-thread", default_value_t = 1000)]
    num_per_thread: u64,

    /// Suppress the data transfer on READs and WRITEs.
    #[arg(short = 'N', long = "no-xfer")]
    no_xfer: bool,

    /// Driver queue placement: 0 queues at head, 1 at tail.
    #[arg(short = 'q', long = "queue-at", value_parser = clap::value_parser!(u8).range(0..=1))]
    queue_at: Option<u8>,

    /// Completion harvesting: 0 favors completions, 1 balanced, 2 favors
    /// submissions.
    #[arg(
        short = 'Q',
        long = "drain",
        default_value_t = 2,
        value_parser = clap::value_parser!(u8).range(0..=2)
    )]
    drain: u8,

    /// Send READ(16)s (default is TEST UNIT READYs).
    #[arg(short = 'R', long = "reads", overrides_with_all = ["turs", "writes"])]
    reads: bool,

    /// Logical block size in bytes.
    #[arg(short = 's', long = "lb-sz", default_value_t = 512)]
    lb_sz: u32,

    /// Number of worker threads.
    #[arg(short = 't', long = "threads", default_value_t = 4)]
    threads: usize,

    /// Send TEST UNIT READYs (the default).
    #[arg(short = 'T', long = "turs", overrides_with_all = ["reads", "writes"])]
    turs: bool,

    /// Increase verbosity; may be repeated.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Wait in milliseconds when blocked on completions: positive sleeps,
    /// 0 yields, negative gives up the rest of the scheduling quantum.
    #[arg(
        short = 'w',
        long = "wait-ms",
        default_value_t = 10,
        allow_negative_numbers = true
    )]
    wait_ms: i32,

    /// Send WRITE(16)s (default is TEST UNIT READYs).
    #[arg(short = 'W', long = "writes", overrides_with_all = ["reads", "turs"])]
    writes: bool,

    /// sg device nodes to exercise, e.g. /dev/sg1.
    #[arg(value_name = "SG_DEVICE", required = true)]
    devices: Vec<String>,
}

impl Cli {
    fn op(&self) -> OpKind {
        if self.writes {
            OpKind::Write
        } else if self.reads {
            OpKind::Read
        } else {
            OpKind::Probe
        }
    }

    fn bias(&self) -> DrainBias {
        match self.drain {
            0 => DrainBias::FavorCompletions,
            1 => DrainBias::Balanced,
            _ => DrainBias::FavorSubmissions,
        }
    }

    fn discipline(&self) -> QueueDiscipline {
        match self.queue_at {
            Some(0) => QueueDiscipline::AtHead,
            Some(1) => QueueDiscipline::AtTail,
            _ => QueueDiscipline::DriverDefault,
        }
    }
}

fn main() -> ExitCode {
    // Usage errors exit 1; exit code 2 means a device failed the
    // scsi_debug safety check.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    run_tool(cli)
}

fn run_tool(cli: Cli) -> ExitCode {
    let block_size = if cli.lb_sz < 256 {
        eprintln!("Strange lb_sz, using 256");
        256
    } else {
        cli.lb_sz
    };
    if let Some(HighLba::Fixed(hi)) = cli.lba.hi {
        if hi != 0 && cli.lba.lba > hi {
            eprintln!("lba,hi_lba range is illegal");
            return ExitCode::FAILURE;
        }
    }

    let console = Arc::new(Console::new(cli.verbose));
    let mut config = Config {
        per_worker: cli.num_per_thread,
        queue_depth: cli.maxq,
        workers: cli.threads,
        op: cli.op(),
        bias: cli.bias(),
        wait: WaitPolicy::from_millis(cli.wait_ms),
        block_size,
        discipline: cli.discipline(),
        direct: cli.direct,
        no_transfer: cli.no_xfer,
        verbose: cli.verbose,
        ..Config::default()
    };

    for path in &cli.devices {
        if let Err(err) = open_device(path, config.blocking_open) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
        if !cli.force {
            let product = match inquiry_product_id(path, &config, &console) {
                Ok(product) => product,
                Err(err) => {
                    eprintln!("INQUIRY failed on {path}: {err}");
                    return ExitCode::FAILURE;
                }
            };
            if product != "scsi_debug" {
                eprintln!(
                    "{path} reports product id '{product}'; only scsi_debug devices are \
                     accepted since WRITEs destroy data. Use -f to override."
                );
                return ExitCode::from(2);
            }
        }
        let addressing = match cli.lba.hi {
            None | Some(HighLba::Fixed(0)) => Addressing::Fixed(cli.lba.lba),
            Some(HighLba::Fixed(hi)) => Addressing::Span {
                low: cli.lba.lba,
                high: hi,
            },
            Some(HighLba::LastBlock) => {
                let capacity = match read_capacity(path, &config, &console) {
                    Ok(capacity) => capacity,
                    Err(err) => {
                        eprintln!("READ CAPACITY(10) failed on {path}: {err}");
                        return ExitCode::FAILURE;
                    }
                };
                if capacity.block_size != config.block_size {
                    console.warn(format_args!(
                        "logical block size {} of {path} differs from the command line \
                         option (or default)",
                        capacity.block_size
                    ));
                }
                let high = u64::from(capacity.last_lba);
                if cli.lba.lba > high {
                    eprintln!(
                        "lba 0x{:x} is past the last block 0x{high:x} of {path}",
                        cli.lba.lba
                    );
                    return ExitCode::FAILURE;
                }
                Addressing::Span {
                    low: cli.lba.lba,
                    high,
                }
            }
        };
        config.targets.push(TargetSpec {
            path: path.clone(),
            addressing,
        });
    }

    let report = match run(&config, &console) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if report.snapshot.finished > 0 && report.elapsed.as_micros() > 0 {
        println!(
            "Time to complete {} commands was {}.{:06} seconds",
            report.snapshot.finished,
            report.elapsed.as_secs(),
            report.elapsed.subsec_micros()
        );
        println!("Implies {:.2} IOPS", report.iops());
    }
    if cli.verbose > 0 {
        println!("Commands started: {}", report.snapshot.started);
        println!("Commands finished: {}", report.snapshot.finished);
        println!("Last correlation id: {}", report.last_id);
        println!("Submit retries: {}", report.snapshot.submit_retries);
        println!("Harvest waits: {}", report.snapshot.harvest_waits);
        println!("Orphaned completions: {}", report.snapshot.orphaned);
        println!("Recovered errors: {}", report.snapshot.recovered);
        println!("Peak commands in flight: {}", report.max_in_flight);
        if report.unresolved > 0 {
            println!("Unresolved at exit: {}", report.unresolved);
        }
    }

    if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
