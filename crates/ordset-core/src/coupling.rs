//! Hand-over-hand lock-coupled list.
//!
//! Every operation, including `contains`, walks the list pairwise-locked:
//! a thread never releases a node's lock until it has already acquired the
//! next node's lock. Grounded on the reference source's `coupling.c`, which
//! takes this same always-locked approach (the one back-end in the pack that
//! does not give `contains` a lock-free fast path).
//!
//! Head and tail sentinels hold [`crate::key::KEY_MIN`] and
//! [`crate::key::KEY_MAX`] so traversal never has to special-case either end.

use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::key::{debug_assert_user_key, Key, KEY_MAX, KEY_MIN};
use crate::set::ConcurrentSet;

struct Node {
    val: Key,
    /// Guarded exclusively by `lock`: readers and writers alike must hold
    /// `lock` before touching this cell.
    next: UnsafeCell<*mut Node>,
    lock: Mutex<()>,
}

// SAFETY: every access to `next` happens while `lock` is held, by every
// caller in this module (enforced by convention, not the type system).
unsafe impl Sync for Node {}

impl Node {
    fn alloc(val: Key, next: *mut Node) -> *mut Node {
        Box::into_raw(Box::new(Node {
            val,
            next: UnsafeCell::new(next),
            lock: Mutex::new(()),
        }))
    }
}

/// A lock-coupled ordered-integer set.
pub struct CouplingSet {
    head: *mut Node,
    len: AtomicUsize,
}

// SAFETY: `head` is fixed for the lifetime of the set and every node beyond
// it is only ever touched under its own lock.
unsafe impl Send for CouplingSet {}
unsafe impl Sync for CouplingSet {}

impl CouplingSet {
    /// Build an empty set. `num_threads` is accepted for symmetry with the
    /// other back-ends' constructors; this back-end needs no per-thread
    /// state.
    pub fn new(_num_threads: usize) -> Self {
        let tail = Node::alloc(KEY_MAX, ptr::null_mut());
        let head = Node::alloc(KEY_MIN, tail);
        Self {
            head,
            len: AtomicUsize::new(0),
        }
    }
}

impl Drop for CouplingSet {
    fn drop(&mut self) {
        unsafe {
            let mut curr = self.head;
            while !curr.is_null() {
                let next = *(*curr).next.get();
                drop(Box::from_raw(curr));
                curr = next;
            }
        }
    }
}

impl ConcurrentSet for CouplingSet {
    /// No-op: this back-end has no per-thread table to bind into.
    fn register_thread(&self, _id: usize) {}

    /// No-op: see [`CouplingSet::register_thread`].
    fn unregister_thread(&self, _id: usize) {}

    fn contains(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        unsafe {
            let mut pred = self.head;
            let mut pred_guard = (*pred).lock.lock();
            let mut curr = *(*pred).next.get();
            let mut curr_guard = (*curr).lock.lock();

            while (*curr).val < key {
                drop(pred_guard);
                pred = curr;
                pred_guard = curr_guard;
                curr = *(*pred).next.get();
                curr_guard = (*curr).lock.lock();
            }
            let found = (*curr).val == key;
            drop(pred_guard);
            drop(curr_guard);
            found
        }
    }

    fn insert(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        unsafe {
            let mut pred = self.head;
            let mut pred_guard = (*pred).lock.lock();
            let mut curr = *(*pred).next.get();
            let mut curr_guard = (*curr).lock.lock();

            while (*curr).val < key {
                drop(pred_guard);
                pred = curr;
                pred_guard = curr_guard;
                curr = *(*pred).next.get();
                curr_guard = (*curr).lock.lock();
            }
            let present = (*curr).val == key;
            if !present {
                let fresh = Node::alloc(key, curr);
                *(*pred).next.get() = fresh;
                self.len.fetch_add(1, Ordering::Relaxed);
            }
            drop(pred_guard);
            drop(curr_guard);
            !present
        }
    }

    fn remove(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        unsafe {
            let mut pred = self.head;
            let mut pred_guard = (*pred).lock.lock();
            let mut curr = *(*pred).next.get();
            let mut curr_guard = (*curr).lock.lock();

            while (*curr).val < key {
                drop(pred_guard);
                pred = curr;
                pred_guard = curr_guard;
                curr = *(*pred).next.get();
                curr_guard = (*curr).lock.lock();
            }
            let present = (*curr).val == key;
            if present {
                let next = *(*curr).next.get();
                *(*pred).next.get() = next;
                self.len.fetch_sub(1, Ordering::Relaxed);
            }
            drop(pred_guard);
            drop(curr_guard);
            if present {
                // No other thread can be holding or about to acquire
                // `curr`'s lock: it was only reachable through `pred`,
                // whose lock we held for the whole splice.
                drop(Box::from_raw(curr));
            }
            present
        }
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}
