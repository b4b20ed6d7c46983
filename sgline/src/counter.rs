//! Sharded counters for dispatch-path accounting.
//!
//! Workers bump counters on every submission and harvest, so the storage is
//! sharded: each worker writes its own cache-line-aligned shard, selected by
//! worker id, and reads sum across shards. A [`CounterGroup`] packs up to 16
//! counters; [`Counter`] wraps one slot of a static group and implements
//! [`metriken::Metric`] for exposition.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const CACHE_LINE: usize = 128;
const SLOTS: usize = CACHE_LINE / 8; // 16 counters per cache line
// Shards beyond the worker count sit idle; 32 covers any sane worker count.
const NUM_SHARDS: usize = 32;

thread_local! {
    /// Thread-local shard ID, set by `set_thread_shard()`.
    /// If not set, falls back to a hash of the TLS address.
    static SHARD_ID: Cell<Option<usize>> = const { Cell::new(None) };
}

/// Set the shard ID for the current thread.
///
/// Each worker calls this with its worker id before dispatching, so two
/// workers never contend on the same cache line.
pub fn set_thread_shard(id: usize) {
    SHARD_ID.set(Some(id % NUM_SHARDS));
}

#[repr(C, align(128))]
struct Shard {
    slots: [AtomicU64; SLOTS],
}

/// Sharded storage for up to 16 counters.
///
/// Groups are cheap enough to build per run: the coordinator owns one and
/// reads totals after workers join, while static groups back the exposition
/// counters in [`crate::metrics`].
pub struct CounterGroup {
    shards: [Shard; NUM_SHARDS],
}

// Safety: All fields are atomics, safe to share across threads
unsafe impl Send for CounterGroup {}
unsafe impl Sync for CounterGroup {}

impl CounterGroup {
    /// Create a new counter group with all slots initialized to zero.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const SHARD: Shard = Shard {
            slots: [ZERO; SLOTS],
        };
        Self {
            shards: [SHARD; NUM_SHARDS],
        }
    }

    /// Increment a slot by 1 in the calling thread's shard.
    #[inline]
    pub fn increment(&self, slot: usize) {
        self.add(slot, 1);
    }

    /// Add a value to a slot in the calling thread's shard.
    #[inline]
    pub fn add(&self, slot: usize, value: u64) {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        let shard = shard_index();
        self.shards[shard].slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    /// Current value of a slot, summed across all shards.
    pub fn value(&self, slot: usize) -> u64 {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards
            .iter()
            .map(|s| s.slots[slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// A sharded counter that can be registered with metriken.
///
/// References a slot in a static [`CounterGroup`]. Implements
/// [`metriken::Metric`] so it can be used with the `#[metric]` attribute.
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

// Safety: CounterGroup is Sync, and slot is immutable
unsafe impl Send for Counter {}
unsafe impl Sync for Counter {}

impl Counter {
    /// Create a counter backed by a slot in the given group.
    ///
    /// # Panics
    ///
    /// Debug builds will panic if `slot >= 16`.
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        Self { group, slot }
    }

    /// Increment the counter by 1.
    #[inline]
    pub fn increment(&self) {
        self.group.increment(self.slot);
    }

    /// Add a value to the counter.
    #[inline]
    pub fn add(&self, value: u64) {
        self.group.add(self.slot, value);
    }

    /// Get the current value (aggregated across all shards).
    pub fn value(&self) -> u64 {
        self.group.value(self.slot)
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}

/// Get the shard index for the current thread.
///
/// Uses the explicitly set shard ID if available (via `set_thread_shard()`),
/// otherwise falls back to a hash of a TLS address. The coordinator thread
/// takes the fallback path; only workers are assigned shards.
#[inline]
fn shard_index() -> usize {
    SHARD_ID.get().unwrap_or_else(|| {
        // Fallback: use TLS address as a cheap thread identifier
        thread_local! {
            static ID: u8 = const { 0 };
        }
        ID.with(|x| x as *const u8 as usize) % NUM_SHARDS
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_group() {
        let group = CounterGroup::new();
        assert_eq!(group.value(0), 0);
        group.increment(0);
        group.add(0, 9);
        assert_eq!(group.value(0), 10);
        assert_eq!(group.value(1), 0);
    }

    #[test]
    fn static_counter_slots_are_independent() {
        static GROUP: CounterGroup = CounterGroup::new();
        let started = Counter::new(&GROUP, 0);
        let finished = Counter::new(&GROUP, 1);

        started.increment();
        finished.add(5);

        assert_eq!(started.value(), 1);
        assert_eq!(finished.value(), 5);
    }

    #[test]
    fn totals_survive_sharded_writers() {
        use std::sync::Arc;
        use std::thread;

        let group = Arc::new(CounterGroup::new());
        let iterations = 1000u64;
        let workers = 4;

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let group = Arc::clone(&group);
                thread::spawn(move || {
                    set_thread_shard(id);
                    for _ in 0..iterations {
                        group.increment(2);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(group.value(2), iterations * workers as u64);
    }

    #[test]
    fn shard_collisions_still_sum() {
        use std::sync::Arc;
        use std::thread;

        let group = Arc::new(CounterGroup::new());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let group = Arc::clone(&group);
                thread::spawn(move || {
                    // Both threads claim the same shard.
                    set_thread_shard(NUM_SHARDS + 3);
                    for _ in 0..500 {
                        group.increment(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(group.value(1), 1000);
    }

    #[test]
    fn exposition_sums_worker_shards() {
        use metriken::Metric;
        use std::thread;

        static GROUP: CounterGroup = CounterGroup::new();
        static FINISHED: Counter = Counter::new(&GROUP, 5);

        let workers: Vec<_> = (0..3)
            .map(|id| {
                thread::spawn(move || {
                    set_thread_shard(id);
                    for _ in 0..40 {
                        FINISHED.increment();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        // Exposition reads go through the trait and see the cross-shard sum.
        let value = Metric::value(&FINISHED);
        assert!(matches!(value, Some(metriken::Value::Counter(120))));
    }
}
