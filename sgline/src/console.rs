//! Serialized diagnostic output.
//!
//! Workers report progress and failures concurrently; a shared [`Console`]
//! serializes whole messages onto stderr so interleaved output stays
//! readable. Verbosity gates what is emitted, not how it is locked.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Shared stderr writer with a verbosity gate.
pub struct Console {
    verbose: u8,
    lock: Mutex<()>,
}

impl Console {
    pub fn new(verbose: u8) -> Self {
        Console {
            verbose,
            lock: Mutex::new(()),
        }
    }

    /// Configured verbosity level.
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }

    /// Whether messages gated at `min_level` would be emitted.
    pub fn enabled(&self, min_level: u8) -> bool {
        self.verbose >= min_level
    }

    /// Emit one message if verbosity reaches `min_level`.
    pub fn note(&self, min_level: u8, args: fmt::Arguments<'_>) {
        if self.enabled(min_level) {
            self.write_line(args);
        }
    }

    /// Emit a warning regardless of verbosity.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.write_line(format_args!("warning: {args}"));
    }

    /// Emit an error regardless of verbosity.
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.write_line(format_args!("error: {args}"));
    }

    fn write_line(&self, args: fmt::Arguments<'_>) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut err = io::stderr().lock();
        let _ = err.write_fmt(args);
        let _ = err.write_all(b"\n");
    }
}
