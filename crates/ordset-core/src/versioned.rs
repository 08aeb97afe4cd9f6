//! Versioned-lock optimistic list.
//!
//! Each node carries a `vlock: AtomicU64` packing `(version << 1) |
//! locked_bit`. Traversal is unlocked; mutation validates a candidate pair
//! against the predecessor's version before locking it, splices, then
//! unlocks by bumping the version (which also clears the lock bit). Grounded
//! on the reference source's `versioned.c` / `versioned.h`, with one fix:
//! `unlock_and_increment` uses a single atomic `fetch_add` in place of the
//! reference source's non-atomic read-then-store.
//!
//! Like the lazy list, this back-end performs no real reclamation of removed
//! nodes; `deleted` is the retirement signal and the node is leaked
//! intentionally (the distilled spec does not ask this back-end to match the
//! indexed list's reclamation guarantees — see `SPEC_FULL.md` section 9).

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crate::key::{debug_assert_user_key, Key, KEY_MAX, KEY_MIN};
use crate::set::ConcurrentSet;

struct Node {
    val: Key,
    next: AtomicPtr<Node>,
    deleted: AtomicBool,
    vlock: AtomicU64,
}

impl Node {
    fn alloc(val: Key, next: *mut Node) -> *mut Node {
        Box::into_raw(Box::new(Node {
            val,
            next: AtomicPtr::new(next),
            deleted: AtomicBool::new(false),
            vlock: AtomicU64::new(0),
        }))
    }

    fn version(&self) -> u64 {
        self.vlock.load(Ordering::Acquire) >> 1
    }

    /// CAS the lock bit on at `ver`. Fails if the node's version or lock bit
    /// has changed since `ver` was observed.
    fn try_lock_at(&self, ver: u64) -> bool {
        self.vlock
            .compare_exchange(ver << 1, (ver << 1) | 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Unlock and move to the next version in one atomic step.
    fn unlock_and_increment(&self) {
        self.vlock.fetch_add(1, Ordering::AcqRel);
    }
}

/// A versioned-lock optimistic ordered-integer set.
pub struct VersionedSet {
    head: *mut Node,
    len: AtomicUsize,
}

unsafe impl Send for VersionedSet {}
unsafe impl Sync for VersionedSet {}

impl VersionedSet {
    /// Build an empty set. `num_threads` is accepted for constructor
    /// symmetry; this back-end needs no per-thread state.
    pub fn new(_num_threads: usize) -> Self {
        let tail = Node::alloc(KEY_MAX, ptr::null_mut());
        let head = Node::alloc(KEY_MIN, tail);
        Self {
            head,
            len: AtomicUsize::new(0),
        }
    }

    unsafe fn find(&self, val: Key) -> (*mut Node, *mut Node) {
        let mut pred = self.head;
        let mut curr = (*pred).next.load(Ordering::Acquire);
        while (*curr).val < val {
            pred = curr;
            curr = (*curr).next.load(Ordering::Acquire);
        }
        (pred, curr)
    }

    /// Cheap pre-lock sanity check: still worth attempting a lock at all.
    unsafe fn still_linked(pred: *mut Node, curr: *mut Node) -> bool {
        !(*pred).deleted.load(Ordering::Acquire) && (*pred).next.load(Ordering::Acquire) == curr
    }
}

impl Drop for VersionedSet {
    fn drop(&mut self) {
        // See module doc: removed nodes are intentionally never reclaimed,
        // so only the still-linked chain needs freeing here.
        unsafe {
            let mut curr = self.head;
            while !curr.is_null() {
                let next = (*curr).next.load(Ordering::Relaxed);
                drop(Box::from_raw(curr));
                curr = next;
            }
        }
    }
}

impl ConcurrentSet for VersionedSet {
    /// No-op: this back-end has no per-thread table to bind into.
    fn register_thread(&self, _id: usize) {}

    /// No-op: see [`VersionedSet::register_thread`].
    fn unregister_thread(&self, _id: usize) {}

    fn contains(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        unsafe {
            let (_pred, curr) = self.find(key);
            (*curr).val == key && !(*curr).deleted.load(Ordering::Acquire)
        }
    }

    fn insert(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        loop {
            unsafe {
                let (pred, curr) = self.find(key);
                if (*curr).val == key && !(*curr).deleted.load(Ordering::Acquire) {
                    return false;
                }
                if !Self::still_linked(pred, curr) {
                    continue;
                }
                let ver = (*pred).version();
                if !(*pred).try_lock_at(ver) {
                    continue;
                }
                if (*pred).next.load(Ordering::Acquire) != curr
                    || (*pred).deleted.load(Ordering::Acquire)
                {
                    (*pred).unlock_and_increment();
                    continue;
                }
                let fresh = Node::alloc(key, curr);
                (*pred).next.store(fresh, Ordering::Release);
                self.len.fetch_add(1, Ordering::Relaxed);
                (*pred).unlock_and_increment();
                return true;
            }
        }
    }

    fn remove(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        loop {
            unsafe {
                let (pred, curr) = self.find(key);
                if (*curr).val != key || (*curr).deleted.load(Ordering::Acquire) {
                    return false;
                }
                if !Self::still_linked(pred, curr) {
                    continue;
                }
                let pred_ver = (*pred).version();
                if !(*pred).try_lock_at(pred_ver) {
                    continue;
                }
                if (*pred).next.load(Ordering::Acquire) != curr
                    || (*pred).deleted.load(Ordering::Acquire)
                {
                    (*pred).unlock_and_increment();
                    continue;
                }
                let curr_ver = (*curr).version();
                if !(*curr).try_lock_at(curr_ver) {
                    (*pred).unlock_and_increment();
                    continue;
                }
                (*curr).deleted.store(true, Ordering::Release);
                let next = (*curr).next.load(Ordering::Acquire);
                (*pred).next.store(next, Ordering::Release);
                self.len.fetch_sub(1, Ordering::Relaxed);
                (*curr).unlock_and_increment();
                (*pred).unlock_and_increment();
                return true;
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}
