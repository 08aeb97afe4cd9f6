//! Deferred reclamation for the indexed list.
//!
//! A per-thread queue accumulates retired nodes. Once a thread's queue
//! reaches [`GC_THRESHOLD`], it splices the whole queue onto the global
//! freelist with a single CAS. The background worker periodically claims the
//! global freelist (`cut`) and, after an RCU grace period has elapsed, frees
//! every node on it (`free_list`).
//!
//! Grounded on the reference source's `garbage.c`: same splice-on-threshold
//! policy, same single-CAS claim, same thread-local accumulation — expressed
//! here as an explicit per-thread slot table instead of a hidden
//! thread-local, for the same reason `rcu.rs` avoids thread-locals.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::error::RegisterError;
use crate::node::Node;

/// Number of deferred nodes a thread accumulates before attempting to splice
/// its local queue into the global freelist. Performance-only; correctness
/// does not depend on this value.
pub const GC_THRESHOLD: usize = 10;

/// One thread's local accumulation queue.
struct GcSlot {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    count: AtomicUsize,
}

impl GcSlot {
    const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            count: AtomicUsize::new(0),
        }
    }
}

/// Garbage-collection state for an indexed set: one local slot per
/// registered thread plus the global freelist head.
pub struct GcDomain {
    slots: Box<[GcSlot]>,
    global_head: AtomicPtr<Node>,
}

impl GcDomain {
    /// Create a domain with room for `capacity` registered threads.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| GcSlot::new()).collect();
        Self {
            slots,
            global_head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// No-op registration hook kept for symmetry with [`crate::rcu::RcuDomain`]:
    /// a thread's GC slot exists purely by index, so there is nothing to
    /// initialize beyond bounds-checking the id.
    pub fn register(&self, id: usize) -> Result<(), RegisterError> {
        if id >= self.capacity() {
            return Err(RegisterError::OutOfRange {
                id,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Defer reclamation of `node` on thread `id`'s local queue, splicing to
    /// the global freelist once the local queue reaches [`GC_THRESHOLD`].
    ///
    /// # Safety
    /// `node` must already be unreachable from the list (unlinked by a
    /// successful CAS) before this is called.
    pub unsafe fn defer(&self, id: usize, node: *mut Node) {
        let slot = &self.slots[id];
        (*node).gcnext.store(slot.head.load(Ordering::Relaxed), Ordering::Relaxed);
        slot.head.store(node, Ordering::Relaxed);
        if slot.tail.load(Ordering::Relaxed).is_null() {
            slot.tail.store(node, Ordering::Relaxed);
        }
        let count = slot.count.fetch_add(1, Ordering::Relaxed) + 1;

        if count >= GC_THRESHOLD {
            let mut global = self.global_head.load(Ordering::Acquire);
            loop {
                (*slot.tail.load(Ordering::Relaxed))
                    .gcnext
                    .store(global, Ordering::Relaxed);
                match self.global_head.compare_exchange_weak(
                    global,
                    slot.head.load(Ordering::Relaxed),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => {
                        slot.head.store(ptr::null_mut(), Ordering::Relaxed);
                        slot.tail.store(ptr::null_mut(), Ordering::Relaxed);
                        slot.count.store(0, Ordering::Relaxed);
                        break;
                    }
                    Err(actual) => global = actual,
                }
            }
        }
    }

    /// Atomically claim the entire global freelist, leaving it empty.
    pub fn cut(&self) -> *mut Node {
        self.global_head.swap(ptr::null_mut(), Ordering::AcqRel)
    }

    /// Free every node reachable via `gcnext` starting at `head`.
    ///
    /// # Safety
    /// Every node in the chain must have survived an RCU grace period since
    /// it was unlinked from the list (established by the caller: the
    /// background worker always calls `synchronize` between `cut` and
    /// `free_list`).
    pub unsafe fn free_list(&self, mut head: *mut Node) {
        while !head.is_null() {
            let next = (*head).gcnext.load(Ordering::Relaxed);
            Node::reclaim(head);
            head = next;
        }
    }

    /// Free all outstanding garbage: both the global freelist and every
    /// thread's local queue. Called only from `Drop`, after the background
    /// worker has been joined and no user thread can still be running.
    ///
    /// # Safety
    /// No concurrent access to this domain may be in progress.
    pub unsafe fn drain_all(&self) {
        self.free_list(self.cut());
        for slot in self.slots.iter() {
            let head = slot.head.swap(ptr::null_mut(), Ordering::AcqRel);
            self.free_list(head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KEY_MIN;
    use std::ptr;

    #[test]
    fn defer_below_threshold_stays_local() {
        let gc = GcDomain::new(2);
        unsafe {
            let n = Node::alloc_live(KEY_MIN + 1, ptr::null_mut(), ptr::null_mut());
            gc.defer(0, n);
            assert!(gc.cut().is_null(), "below threshold, global list empty");
            // The node is still reachable from the local slot; reclaim it
            // directly to avoid leaking in the test.
            gc.drain_all();
        }
    }

    #[test]
    fn defer_at_threshold_splices_to_global() {
        let gc = GcDomain::new(1);
        unsafe {
            for i in 0..GC_THRESHOLD {
                let n = Node::alloc_live(KEY_MIN + 1 + i as i64, ptr::null_mut(), ptr::null_mut());
                gc.defer(0, n);
            }
            let claimed = gc.cut();
            assert!(!claimed.is_null());
            gc.free_list(claimed);
        }
    }

    #[test]
    fn cut_empties_global_list() {
        let gc = GcDomain::new(1);
        unsafe {
            for i in 0..GC_THRESHOLD {
                let n = Node::alloc_live(KEY_MIN + 1 + i as i64, ptr::null_mut(), ptr::null_mut());
                gc.defer(0, n);
            }
            let first = gc.cut();
            assert!(!first.is_null());
            assert!(gc.cut().is_null());
            gc.free_list(first);
        }
    }
}
