//! Lock-free 3-slot handoff between the realtime producer thread and the storage consumer
//! thread (spec §4.2).
//!
//! Three slots hold `N` payload cells each. The producer writes into its own private slot and
//! publishes it with [`Producer::swap`]; the consumer pulls the most recently published slot with
//! [`Consumer::swap`]. Neither side ever blocks, and the consumer never observes a slot the
//! producer is still writing to: the handoff is a single atomic exchange of a packed slot index.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const SLOT_MASK: u8 = 0b011;
const DIRTY_BIT: u8 = 0b100;

/// One payload cell. `None` means the producer has not populated this cell since the buffer was
/// created, mirroring the "valid flag" in the source design.
pub type Cell<T> = Option<T>;

struct Slots<T, const N: usize> {
    data: [UnsafeCell<[Cell<T>; N]>; 3],
}

// SAFETY: access to each of the three inner arrays is serialised by the producer/consumer
// handshake in `state`: at most one of {producer, consumer, "back" slot} ever points at a given
// index at a time, and the atomic swap in `Producer::swap`/`Consumer::swap` is what hands an
// index from one side to the other with the necessary happens-before edge (AcqRel).
unsafe impl<T: Send, const N: usize> Sync for Slots<T, N> {}

struct Shared<T, const N: usize> {
    slots: Slots<T, N>,
    /// Bits 0-1: index of the slot not currently owned by the producer or the consumer. Bit 2:
    /// set when that slot holds a producer write the consumer hasn't picked up yet.
    state: AtomicU8,
}

/// Construct a connected producer/consumer pair sharing `N`-cell slots.
pub fn channel<T, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let shared = Arc::new(Shared {
        slots: Slots {
            data: std::array::from_fn(|_| UnsafeCell::new(std::array::from_fn(|_| None))),
        },
        state: AtomicU8::new(2), // slot 2 starts as the shared "back" slot, not dirty.
    });

    (
        Producer {
            shared: shared.clone(),
            owned: 0,
        },
        Consumer { shared, owned: 1 },
    )
}

/// The producer side of a [`channel`]. Exclusively owned by the realtime thread.
pub struct Producer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
    owned: u8,
}

impl<T, const N: usize> Producer<T, N> {
    /// Mutably borrow the producer's private slot to fill in this cycle's payload.
    pub fn write(&mut self) -> &mut [Cell<T>; N] {
        // SAFETY: `self.owned` is never the slot referenced by `state`'s published index while
        // this borrow is live, because `swap` only updates `self.owned` after the exchange, and
        // the consumer never touches a slot index it wasn't just handed.
        unsafe { &mut *self.shared.slots.data[usize::from(self.owned)].get() }
    }

    /// Publish the producer's private slot as the newest generation, and take back whatever slot
    /// the consumer last released (never blocks).
    pub fn swap(&mut self) {
        let published = self.owned | DIRTY_BIT;
        let previous = self.shared.state.swap(published, Ordering::AcqRel);

        self.owned = previous & SLOT_MASK;
    }
}

/// The consumer side of a [`channel`]. Exclusively owned by the storage thread.
pub struct Consumer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
    owned: u8,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Borrow the consumer's current slot — the most recent generation as of the last
    /// [`Self::swap`].
    pub fn read(&self) -> &[Cell<T>; N] {
        // SAFETY: symmetric to `Producer::write`; the producer never writes into a slot index the
        // consumer currently owns.
        unsafe { &*self.shared.slots.data[usize::from(self.owned)].get() }
    }

    /// Pull the newest published slot, if the producer has published one since the last swap.
    /// Returns whether a new generation was picked up (`false` means the consumer's slot is
    /// unchanged — nothing new was published since the last swap, so the caller keeps reading the
    /// same data it already had).
    ///
    /// Only exchanges the shared slot index when the dirty bit is set: a plain unconditional swap
    /// here would hand away the consumer's slot even on a no-op call, leaving it simultaneously
    /// "owned" by the consumer and "back" for the producer to claim.
    pub fn swap(&mut self) -> bool {
        loop {
            let current = self.shared.state.load(Ordering::Acquire);

            if current & DIRTY_BIT == 0 {
                return false;
            }

            match self.shared.state.compare_exchange_weak(
                current,
                self.owned,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.owned = current & SLOT_MASK;
                    return true;
                }
                Err(_) => continue,
            }
        }
    }
}
