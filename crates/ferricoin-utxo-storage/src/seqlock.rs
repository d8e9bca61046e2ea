//! Sequence lock coordinating lock-free readers with a single writer.
//!
//! A shared counter starts even. A writer increments it before mutating
//! (odd) and again after (even). A reader samples the counter, performs its
//! reads while it is even, then re-samples: any change means a writer ran in
//! between and the read is discarded and retried.

use std::sync::atomic::{fence, AtomicU64, Ordering};

/// The even/odd turn counter.
#[derive(Debug, Default)]
pub struct SeqLock {
    sequence: AtomicU64,
}

impl SeqLock {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU64::new(0),
        }
    }

    /// Runs `read` until it completes within a single even turn and returns
    /// its result.
    ///
    /// `read` may observe torn state while a writer is active; such results
    /// are thrown away, so it must not have side effects it cannot repeat.
    pub fn read<T>(&self, mut read: impl FnMut() -> T) -> T {
        loop {
            let begin = self.sequence.load(Ordering::Acquire);
            if begin & 1 != 0 {
                std::thread::yield_now();
                continue;
            }

            let value = read();

            // Order the data reads before the confirming counter load.
            fence(Ordering::Acquire);
            if self.sequence.load(Ordering::Relaxed) == begin {
                return value;
            }
        }
    }

    /// Opens a write turn. Stores made while the guard lives become visible
    /// to readers only once it is dropped.
    ///
    /// The caller must serialize writers externally; turns do not nest.
    pub fn write_turn(&self) -> WriteTurn<'_> {
        let previous = self.sequence.fetch_add(1, Ordering::AcqRel);
        debug_assert_eq!(previous & 1, 0, "write turn opened inside a write turn");

        WriteTurn {
            sequence: &self.sequence,
        }
    }

    /// Current raw counter value. Odd means a write turn is open.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

/// RAII guard for one writer turn.
#[must_use = "dropping the turn immediately publishes nothing"]
pub struct WriteTurn<'a> {
    sequence: &'a AtomicU64,
}

impl Drop for WriteTurn<'_> {
    fn drop(&mut self) {
        self.sequence.fetch_add(1, Ordering::Release);
    }
}
