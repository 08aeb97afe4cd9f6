//! User-space quiescence (RCU) for the indexed list.
//!
//! Each registered thread owns one cache-line-padded counter. `read_lock`
//! atomically increments it; `read_unlock` atomically increments it again.
//! The counter therefore alternates parity on every enter/exit of a read
//! section.
//!
//! # Polarity
//!
//! Every slot starts at `1` (odd). `synchronize` treats an *odd* snapshot as
//! "thread was outside a read section" and skips waiting on it; an *even*
//! snapshot means the thread was mid-section at the time of the snapshot, so
//! the writer spins until that slot's counter either becomes odd (the
//! section ended) or advances past the snapshot (the thread completed that
//! section and entered a new one). This is the exact convention used by the
//! reference `synchronize` routine's `t & 1` skip check; the alternative
//! "even = outside" polarity was rejected without re-deriving the skip
//! condition, per the grounding notes in `SPEC_FULL.md` section 9.
//!
//! No registered thread uses any implicit thread-local state: callers pass
//! their registered id explicitly to every RCU operation, mirroring the
//! array-indexed-by-thread-id design used throughout the teacher crate's own
//! RCU module.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::RegisterError;

/// Cache-line size used to pad reader slots against false sharing.
const CACHE_LINE: usize = 64;

/// Sentinel counter value for an unregistered slot.
const SLOT_EMPTY: u64 = 0;

/// A single thread's quiescence counter, padded to its own cache line.
#[repr(C, align(64))]
struct ReaderSlot {
    /// `0` while unregistered; otherwise an odd/even counter per the module
    /// doc's polarity convention (registration seeds it to `1`).
    time: AtomicU64,
    _pad: [u8; CACHE_LINE - 8],
}

impl ReaderSlot {
    const fn new() -> Self {
        Self {
            time: AtomicU64::new(SLOT_EMPTY),
            _pad: [0u8; CACHE_LINE - 8],
        }
    }
}

/// A fixed-capacity table of RCU reader slots, one per participating thread.
///
/// Sized once at construction for `capacity` threads (the indexed list sizes
/// this for `num_threads + 1`, reserving one slot for the background
/// worker).
pub struct RcuDomain {
    slots: Box<[ReaderSlot]>,
}

impl RcuDomain {
    /// Create a domain with room for `capacity` registered threads.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| ReaderSlot::new()).collect();
        Self { slots }
    }

    /// Number of reader slots this domain was sized for.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Register thread `id`, seeding its counter to the "outside" (odd)
    /// state. Idempotent: registering an already-registered id is a no-op.
    pub fn register(&self, id: usize) -> Result<(), RegisterError> {
        let slot = self.slots.get(id).ok_or(RegisterError::OutOfRange {
            id,
            capacity: self.capacity(),
        })?;
        slot.time.store(1, Ordering::Release);
        Ok(())
    }

    /// Unregister thread `id`. After this call `synchronize` never waits on
    /// it again until it is re-registered.
    pub fn unregister(&self, id: usize) {
        if let Some(slot) = self.slots.get(id) {
            slot.time.store(SLOT_EMPTY, Ordering::Release);
        }
    }

    /// Enter a read-side critical section for thread `id`.
    #[inline]
    pub fn read_lock(&self, id: usize) {
        self.slots[id].time.fetch_add(1, Ordering::AcqRel);
    }

    /// Exit a read-side critical section for thread `id`.
    #[inline]
    pub fn read_unlock(&self, id: usize) {
        self.slots[id].time.fetch_add(1, Ordering::AcqRel);
    }

    /// Block until every read section that was in progress at the time of
    /// this call has ended.
    ///
    /// Threads that begin a read section *after* the snapshot is taken may
    /// still be reading when this returns — that is safe provided the
    /// caller unlinked any pointers it intends to free before calling
    /// `synchronize`.
    pub fn synchronize(&self) {
        let snapshot: Vec<u64> = self
            .slots
            .iter()
            .map(|s| s.time.load(Ordering::Acquire))
            .collect();

        for (slot, &snap) in self.slots.iter().zip(snapshot.iter()) {
            if snap == SLOT_EMPTY || snap & 1 == 1 {
                // Unregistered, or was outside a read section: nothing to wait for.
                continue;
            }
            loop {
                let t = slot.time.load(Ordering::Acquire);
                if t & 1 == 1 || t > snap {
                    break;
                }
                std::hint::spin_loop();
            }
        }
    }
}
