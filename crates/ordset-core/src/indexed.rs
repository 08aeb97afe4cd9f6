//! The indexed lock-free list: the central back-end.
//!
//! A singly-linked, `head`-anchored chain of [`crate::node::Node`]s in
//! strictly increasing key order, with a separately-maintained array index
//! (`idx`) giving O(log n) traversal starts instead of always walking from
//! `head`. Logical deletion (`Live -> LogicallyDeleted`) is the hot-path
//! mutation; physical removal (`LogicallyDeleted -> PhysicallyPending ->`
//! unlinked) is off-loaded to the background worker in `background.rs` and
//! to whichever reader happens to walk past a physically-pending node
//! (`help_remove`). Grounded on the reference source's `skiplist.c` /
//! `skiplist.h`.
//!
//! Reclamation uses [`crate::rcu::RcuDomain`] and [`crate::gc::GcDomain`],
//! sized for `num_threads + 1` participants: ids `0..num_threads` are for
//! registered caller threads, and the last id is reserved for the
//! background worker, which never goes through the public
//! `register_thread` / `unregister_thread` entry points.

use std::cell::Cell;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::background::{BackgroundConfig, BackgroundWorker};
use crate::error::RegisterError;
use crate::gc::GcDomain;
use crate::key::{debug_assert_user_key, Key, KEY_MAX, KEY_MIN};
use crate::node::{Node, NodeState};
use crate::rcu::RcuDomain;
use crate::set::ConcurrentSet;

thread_local! {
    static THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

/// A sorted `(key, node)` lookup table giving traversal a head start.
///
/// `entries[0]` is always `(KEY_MIN, head)`, so `use_idx` never needs to
/// special-case an empty index.
pub(crate) struct IndexSnapshot {
    entries: Box<[(Key, *mut Node)]>,
}

impl IndexSnapshot {
    pub(crate) fn head_only(head: *mut Node) -> Self {
        Self {
            entries: vec![(KEY_MIN, head)].into_boxed_slice(),
        }
    }

    pub(crate) fn from_entries(entries: Vec<(Key, *mut Node)>) -> Self {
        debug_assert!(!entries.is_empty());
        Self {
            entries: entries.into_boxed_slice(),
        }
    }

    /// Binary search for the greatest entry whose key is `<= key`.
    fn use_idx(&self, key: Key) -> *mut Node {
        match self.entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => self.entries[i].1,
            Err(0) => self.entries[0].1,
            Err(i) => self.entries[i - 1].1,
        }
    }

    pub(crate) fn entries(&self) -> &[(Key, *mut Node)] {
        &self.entries
    }
}

/// The indexed lock-free ordered-integer set.
pub(crate) struct IndexedCore {
    pub(crate) head: *mut Node,
    pub(crate) idx: AtomicPtr<IndexSnapshot>,
    pub(crate) rcu: RcuDomain,
    pub(crate) gc: GcDomain,
    /// Reserved RCU/GC id for the background worker.
    pub(crate) background_id: usize,
}

unsafe impl Send for IndexedCore {}
unsafe impl Sync for IndexedCore {}

impl IndexedCore {
    /// Build an empty set whose RCU/GC tables are sized for `num_threads`
    /// caller threads plus one reserved slot for the background worker.
    pub(crate) fn new_bare(num_threads: usize) -> Self {
        let head = Node::alloc_head();
        let snapshot = Box::new(IndexSnapshot::head_only(head));
        Self {
            head,
            idx: AtomicPtr::new(Box::into_raw(snapshot)),
            rcu: RcuDomain::new(num_threads + 1),
            gc: GcDomain::new(num_threads + 1),
            background_id: num_threads,
        }
    }

    pub(crate) fn try_register_caller(&self, id: usize) -> Result<(), RegisterError> {
        self.rcu.register(id)?;
        self.gc.register(id)?;
        THREAD_ID.with(|c| c.set(Some(id)));
        Ok(())
    }

    pub(crate) fn unregister_caller(&self, id: usize) {
        self.rcu.unregister(id);
        THREAD_ID.with(|c| c.set(None));
    }

    pub(crate) fn my_id(&self) -> Option<usize> {
        THREAD_ID.with(|c| c.get())
    }

    fn use_idx(&self, key: Key) -> *mut Node {
        let snap = self.idx.load(Ordering::Acquire);
        unsafe { (*snap).use_idx(key) }
    }

    /// Replace the active index with `new`, returning the pointer that was
    /// previously active. The caller must wait out a grace period
    /// ([`RcuDomain::synchronize`]) before freeing the returned pointer.
    pub(crate) fn swap_index(&self, new: Box<IndexSnapshot>) -> *mut IndexSnapshot {
        self.idx.swap(Box::into_raw(new), Ordering::AcqRel)
    }

    /// Backtrack past zombies, help a physically-pending successor, and
    /// stop at the predecessor of `key`'s position.
    ///
    /// Returns `(node, next)` with `node.k <= key` and (`next` is absent or
    /// `next.k > key`).
    fn locate(&self, key: Key, fast: bool, helper_id: Option<usize>) -> (*mut Node, *mut Node) {
        let mut node = if fast { self.use_idx(key) } else { self.head };
        loop {
            while unsafe { (*node).state() } == NodeState::PhysicallyPending {
                let prev = unsafe { (*node).prev.load(Ordering::Relaxed) };
                node = if prev.is_null() { self.head } else { prev };
            }
            let next = unsafe { (*node).next.load(Ordering::Acquire) };
            if !next.is_null() && unsafe { (*next).state() } == NodeState::PhysicallyPending {
                self.help_remove(node, next, helper_id);
                continue;
            }
            if next.is_null() || unsafe { (*next).k > key } {
                return (node, next);
            }
            node = next;
        }
    }

    /// Splice a physically-pending `node` (and its marker, if any) out of
    /// the list from predecessor `pred`. Idempotent: safe to call
    /// concurrently or after another thread has already finished the job.
    fn help_remove(&self, pred: *mut Node, node: *mut Node, helper_id: Option<usize>) {
        tracing::trace!(node = node as usize, "help_remove invoked");
        unsafe {
            let marker = loop {
                let n = (*node).next.load(Ordering::Acquire);
                if !n.is_null() && (*n).marked {
                    break n;
                }
                let candidate = Node::alloc_marker(n);
                match (*node)
                    .next
                    .compare_exchange(n, candidate, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => break candidate,
                    Err(_) => Node::reclaim_unpublished(candidate),
                }
            };

            if (*pred).next.load(Ordering::Acquire) == node && !(*pred).marked {
                let after_marker = (*marker).next.load(Ordering::Acquire);
                if (*pred)
                    .next
                    .compare_exchange(node, after_marker, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    if !after_marker.is_null() {
                        (*after_marker).prev.store(pred, Ordering::Relaxed);
                    }
                    if let Some(id) = helper_id {
                        self.gc.defer(id, node);
                        self.gc.defer(id, marker);
                    }
                }
            }
        }
    }

    /// Promote a logically-deleted node to physically-pending. Only ever
    /// called by the background worker: user threads never perform this
    /// transition, keeping physical removal off the hot path.
    pub(crate) fn try_mark_phys_remove(&self, node: *mut Node) -> bool {
        unsafe { (*node).cas_state(NodeState::LogicallyDeleted, NodeState::PhysicallyPending) }
    }

    pub(crate) fn raw_contains(&self, key: Key, fast: bool, reader_id: Option<usize>) -> bool {
        if let Some(id) = reader_id {
            self.rcu.read_lock(id);
        }
        let (node, _next) = self.locate(key, fast, reader_id);
        let found = unsafe { (*node).k == key && (*node).state() == NodeState::Live };
        if let Some(id) = reader_id {
            self.rcu.read_unlock(id);
        }
        found
    }

    pub(crate) fn raw_insert(&self, key: Key, writer_id: Option<usize>) -> bool {
        if let Some(id) = writer_id {
            self.rcu.read_lock(id);
        }
        let result = loop {
            let (node, next) = self.locate(key, true, writer_id);
            if unsafe { (*node).k == key } {
                if unsafe { (*node).state() } == NodeState::Live {
                    break false;
                }
                if unsafe { (*node).cas_state(NodeState::LogicallyDeleted, NodeState::Live) } {
                    break true;
                }
                continue;
            }
            let fresh = Node::alloc_live(key, node, next);
            if unsafe {
                (*node)
                    .next
                    .compare_exchange(next, fresh, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            } {
                if !next.is_null() {
                    unsafe { (*next).prev.store(fresh, Ordering::Relaxed) };
                }
                break true;
            }
            unsafe { Node::reclaim_unpublished(fresh) };
        };
        if let Some(id) = writer_id {
            self.rcu.read_unlock(id);
        }
        result
    }

    pub(crate) fn raw_remove(&self, key: Key, writer_id: Option<usize>) -> bool {
        if let Some(id) = writer_id {
            self.rcu.read_lock(id);
        }
        let result = loop {
            let (node, _next) = self.locate(key, true, writer_id);
            if unsafe { (*node).k != key || (*node).state() != NodeState::Live } {
                break false;
            }
            if unsafe { (*node).cas_state(NodeState::Live, NodeState::LogicallyDeleted) } {
                break true;
            }
        };
        if let Some(id) = writer_id {
            self.rcu.read_unlock(id);
        }
        result
    }

    /// A dummy, slow-path `contains(KEY_MAX)` used purely to walk the whole
    /// list and trigger `help_remove` against any physically-pending node
    /// reachable from `head`. Always uses the reserved background id.
    pub(crate) fn scan_all(&self) {
        self.raw_contains(KEY_MAX, false, Some(self.background_id));
    }

    /// Non-linearizable diagnostic: count live keys by walking the real
    /// list, skipping the head sentinel and any non-live node.
    pub(crate) fn walk_len(&self) -> usize {
        let mut count = 0;
        let mut node = unsafe { (*self.head).next.load(Ordering::Acquire) };
        while !node.is_null() {
            unsafe {
                if (*node).state() == NodeState::Live {
                    count += 1;
                }
                node = (*node).next.load(Ordering::Acquire);
            }
        }
        count
    }
}

impl Drop for IndexedCore {
    fn drop(&mut self) {
        unsafe {
            self.gc.drain_all();
            drop(Box::from_raw(self.idx.load(Ordering::Acquire)));
            let mut curr = self.head;
            while !curr.is_null() {
                let next = (*curr).next.load(Ordering::Relaxed);
                Node::reclaim(curr);
                curr = next;
            }
        }
    }
}

/// The public indexed-list back-end: [`IndexedCore`] plus the background
/// worker that restructures its index and physically removes logically
/// deleted nodes.
///
/// The core engine lives behind an `Arc` so the background worker can hold
/// its own independent reference, which sidesteps a self-referential
/// `IndexedSet -> worker thread -> IndexedSet` pointer without resorting to
/// raw-pointer lifetime games: `Drop` stops and joins the worker before the
/// outer `Arc` handle is released, so the core is torn down deterministically
/// either way.
pub struct IndexedSet {
    core: Arc<IndexedCore>,
    background: BackgroundWorker,
}

impl IndexedSet {
    /// Build a set with the default [`BackgroundConfig`], sized for
    /// `num_threads` registered caller threads.
    pub fn new(num_threads: usize) -> Self {
        Self::with_config(num_threads, BackgroundConfig::default())
    }

    /// Build a set with an explicit background-worker configuration.
    pub fn with_config(num_threads: usize, config: BackgroundConfig) -> Self {
        let core = Arc::new(IndexedCore::new_bare(num_threads));
        let background = BackgroundWorker::spawn(Arc::clone(&core), config);
        Self { core, background }
    }

    /// Fallible thread registration: returns an error instead of panicking
    /// when the thread table is exhausted or `id` is out of range.
    pub fn try_register_thread(&self, id: usize) -> Result<(), RegisterError> {
        self.core.try_register_caller(id)
    }
}

impl ConcurrentSet for IndexedSet {
    fn register_thread(&self, id: usize) {
        self.try_register_thread(id)
            .expect("IndexedSet::register_thread");
    }

    fn unregister_thread(&self, id: usize) {
        self.core.unregister_caller(id);
    }

    fn contains(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        self.core.raw_contains(key, true, self.core.my_id())
    }

    fn insert(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        self.core.raw_insert(key, self.core.my_id())
    }

    fn remove(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        self.core.raw_remove(key, self.core.my_id())
    }

    fn len(&self) -> usize {
        self.core.walk_len()
    }
}

impl Drop for IndexedSet {
    fn drop(&mut self) {
        self.background.stop_and_join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_contains_remove_round_trip() {
        let set = IndexedCore::new_bare(1);
        set.try_register_caller(0).unwrap();
        assert!(!set.raw_contains(5, true, Some(0)));
        assert!(set.raw_insert(5, Some(0)));
        assert!(!set.raw_insert(5, Some(0)));
        assert!(set.raw_contains(5, true, Some(0)));
        assert_eq!(set.walk_len(), 1);
        assert!(set.raw_remove(5, Some(0)));
        assert!(!set.raw_remove(5, Some(0)));
        assert!(!set.raw_contains(5, true, Some(0)));
        assert_eq!(set.walk_len(), 0);
    }

    #[test]
    fn reinsert_after_logical_delete_reuses_node() {
        let set = IndexedCore::new_bare(1);
        set.try_register_caller(0).unwrap();
        assert!(set.raw_insert(7, Some(0)));
        assert!(set.raw_remove(7, Some(0)));
        assert!(set.raw_insert(7, Some(0)));
        assert!(set.raw_contains(7, true, Some(0)));
        assert_eq!(set.walk_len(), 1);
    }

    #[test]
    fn scan_all_helps_remove_physically_pending_nodes() {
        let set = IndexedCore::new_bare(1);
        set.try_register_caller(0).unwrap();
        assert!(set.raw_insert(3, Some(0)));
        assert!(set.raw_remove(3, Some(0)));
        let (node, _) = set.locate(3, false, Some(0));
        assert!(set.try_mark_phys_remove(node));
        set.scan_all();
        assert_eq!(set.walk_len(), 0);
    }

    #[test]
    fn facade_drives_background_worker_to_shrink_gaps() {
        use std::time::Duration;

        let config = BackgroundConfig {
            sleep_interval: Duration::from_millis(2),
            idx_gap: 4,
            max_gap: 8,
        };
        let set = IndexedSet::with_config(1, config);
        set.register_thread(0);
        for k in 1..200 {
            assert!(set.insert(k));
        }
        for k in (1..200).step_by(2) {
            assert!(set.remove(k));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(set.len(), 99);
        for k in (2..200).step_by(2) {
            assert!(set.contains(k));
        }
    }

    #[test]
    fn facade_drop_joins_background_worker_cleanly() {
        let set = IndexedSet::new(2);
        set.register_thread(0);
        assert!(set.insert(1));
        drop(set);
    }
}
