//! Block address selection for data-transfer commands.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};

use crate::config::Addressing;

/// Per-worker source of block addresses.
///
/// Spans draw uniformly from an inclusive range using a small generator
/// seeded once per worker from the OS; the seed is kept so verbose runs can
/// report it. Construction assumes a validated range (`low <= high`).
pub enum LbaGenerator {
    Fixed(u64),
    Span {
        rng: SmallRng,
        dist: Uniform<u64>,
        seed: u64,
    },
}

impl LbaGenerator {
    pub fn new(addressing: Addressing) -> Self {
        match addressing {
            Addressing::Fixed(lba) => LbaGenerator::Fixed(lba),
            Addressing::Span { low, high } => Self::span_with_seed(low, high, OsRng.next_u64()),
        }
    }

    /// Span generator with a caller-chosen seed, for reproducing a run.
    pub fn span_with_seed(low: u64, high: u64, seed: u64) -> Self {
        LbaGenerator::Span {
            rng: SmallRng::seed_from_u64(seed),
            dist: Uniform::new_inclusive(low, high),
            seed,
        }
    }

    /// Address for the next command.
    pub fn next(&mut self) -> u64 {
        match self {
            LbaGenerator::Fixed(lba) => *lba,
            LbaGenerator::Span { rng, dist, .. } => dist.sample(rng),
        }
    }

    /// Seed behind a span generator, for diagnostics. `None` when fixed.
    pub fn seed(&self) -> Option<u64> {
        match self {
            LbaGenerator::Fixed(_) => None,
            LbaGenerator::Span { seed, .. } => Some(*seed),
        }
    }
}
