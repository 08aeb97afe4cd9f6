//! Lazy synchronization list: lock-free traversal, lock-and-validate mutation.
//!
//! `contains` walks `next` without ever locking and is wait-free. `insert`
//! and `remove` walk the same way to find a candidate `(pred, curr)` pair,
//! then lock both nodes and **validate** `!pred.marked && !curr.marked &&
//! pred.next == curr` before committing; on validation failure they release
//! both locks and restart from `head`. Grounded on the reference source's
//! `lazy.c`.
//!
//! Removed nodes are never freed: `marked` is the sole retirement signal and
//! the node is leaked intentionally. This matches the reference
//! implementation's own documented limitation rather than papering over it
//! with a reclamation scheme the original never had — see `SPEC_FULL.md`
//! section 9.

use parking_lot::{Mutex, MutexGuard};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use crate::key::{debug_assert_user_key, Key, KEY_MAX, KEY_MIN};
use crate::set::ConcurrentSet;

struct Node {
    val: Key,
    next: AtomicPtr<Node>,
    marked: AtomicBool,
    lock: Mutex<()>,
}

impl Node {
    fn alloc(val: Key, next: *mut Node) -> *mut Node {
        Box::into_raw(Box::new(Node {
            val,
            next: AtomicPtr::new(next),
            marked: AtomicBool::new(false),
            lock: Mutex::new(()),
        }))
    }
}

/// A lazy-synchronized ordered-integer set.
pub struct LazySet {
    head: *mut Node,
    len: AtomicUsize,
}

unsafe impl Send for LazySet {}
unsafe impl Sync for LazySet {}

impl LazySet {
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

    /// Walk unlocked to the first pair `(pred, curr)` with `curr.val >= val`.
    unsafe fn find(&self, val: Key) -> (*mut Node, *mut Node) {
        let mut pred = self.head;
        let mut curr = (*pred).next.load(Ordering::Acquire);
        while (*curr).val < val {
            pred = curr;
            curr = (*curr).next.load(Ordering::Acquire);
        }
        (pred, curr)
    }

    unsafe fn validate(pred: *mut Node, curr: *mut Node) -> bool {
        !(*pred).marked.load(Ordering::Acquire)
            && !(*curr).marked.load(Ordering::Acquire)
            && (*pred).next.load(Ordering::Acquire) == curr
    }
}

impl Drop for LazySet {
    fn drop(&mut self) {
        // Leaked (marked-but-unfreed) nodes are intentionally never reclaimed
        // by this back-end, matching the reference implementation; only the
        // still-linked chain is walked and freed here.
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

impl ConcurrentSet for LazySet {
    /// No-op: this back-end has no per-thread table to bind into.
    fn register_thread(&self, _id: usize) {}

    /// No-op: see [`LazySet::register_thread`].
    fn unregister_thread(&self, _id: usize) {}

    fn contains(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        unsafe {
            let (_pred, curr) = self.find(key);
            (*curr).val == key && !(*curr).marked.load(Ordering::Acquire)
        }
    }

    fn insert(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        loop {
            unsafe {
                let (pred, curr) = self.find(key);
                let pred_guard: MutexGuard<'_, ()> = (*pred).lock.lock();
                let curr_guard: MutexGuard<'_, ()> = (*curr).lock.lock();

                if !Self::validate(pred, curr) {
                    drop(curr_guard);
                    drop(pred_guard);
                    continue;
                }

                let present = (*curr).val == key;
                if !present {
                    let fresh = Node::alloc(key, curr);
                    (*pred).next.store(fresh, Ordering::Release);
                    self.len.fetch_add(1, Ordering::Relaxed);
                }
                return !present;
            }
        }
    }

    fn remove(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        loop {
            unsafe {
                let (pred, curr) = self.find(key);
                let pred_guard: MutexGuard<'_, ()> = (*pred).lock.lock();
                let curr_guard: MutexGuard<'_, ()> = (*curr).lock.lock();

                if !Self::validate(pred, curr) {
                    drop(curr_guard);
                    drop(pred_guard);
                    continue;
                }

                let present = (*curr).val == key;
                if present {
                    // Logical delete first, then physical unlink. The node
                    // itself is left allocated (see module doc).
                    (*curr).marked.store(true, Ordering::Release);
                    let next = (*curr).next.load(Ordering::Acquire);
                    (*pred).next.store(next, Ordering::Release);
                    self.len.fetch_sub(1, Ordering::Relaxed);
                }
                return present;
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}
