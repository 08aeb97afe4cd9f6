//! Harris-style lock-free list: logical deletion via a marked pointer bit.
//!
//! A node's `next` pointer doubles as its own deletion flag: setting the low
//! bit of the value stored in `node.next` marks `node` itself as logically
//! deleted. `search` walks past marked nodes, remembers the last unmarked
//! predecessor, and opportunistically CASes the marked run out once it
//! reaches an unmarked successor. Grounded on the reference source's
//! `harris.c`, with its uninitialized-`left_node` hazard closed: `left`
//! always starts at `head`.
//!
//! # Reclamation
//!
//! Excising a marked run physically unlinks it, but other threads may still
//! hold raw pointers into it from an in-flight traversal, so it cannot be
//! freed synchronously at the point of excision: that point is reached from
//! inside `contains`/`insert`/`remove`'s own read section, and waiting out a
//! grace period there means waiting for a section this same thread is still
//! inside, which `RcuDomain::synchronize` would spin on forever. Instead,
//! excised nodes are deferred onto a per-thread retirement queue (`defer`,
//! the same splice-at-threshold policy as `crate::gc::GcDomain`, duplicated
//! here because that type is tied to the indexed list's node layout) and
//! only actually freed by `reclaim_global`, which every public operation
//! calls once up front, before entering its own read section. That ordering
//! is what makes the later `synchronize` call safe: the calling thread has
//! not yet incremented its own counter, so it counts as outside a read
//! section and only waits on other threads' in-flight sections.
//!
//! Every traversal that dereferences a node — `contains`, `insert`, and
//! `remove` alike — brackets the whole operation in a read section, not just
//! `contains`. Without that, a mutator holding a pointer returned by `search`
//! would have nothing stopping a concurrent `reclaim_global` from freeing it
//! out from under them. Registration is the mechanism that grants this
//! protection, which makes `register_thread` effectively mandatory:
//! skipping it does not panic, but it leaves that caller's own traversal
//! unprotected against a concurrent thread's reclamation.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crate::gc::GC_THRESHOLD;
use crate::key::{debug_assert_user_key, Key, KEY_MAX, KEY_MIN};
use crate::node_ptr::{is_marked, marked, unmarked};
use crate::rcu::RcuDomain;
use crate::set::ConcurrentSet;

thread_local! {
    static THREAD_ID: Cell<Option<usize>> = Cell::new(None);
}

#[repr(align(2))]
struct Node {
    val: Key,
    next: AtomicPtr<Node>,
    /// Link used only while this node sits on a retirement queue; unrelated
    /// to `next`'s marked-pointer scheme.
    gcnext: AtomicPtr<Node>,
}

impl Node {
    fn alloc(val: Key, next: *mut Node) -> *mut Node {
        Box::into_raw(Box::new(Node {
            val,
            next: AtomicPtr::new(next),
            gcnext: AtomicPtr::new(ptr::null_mut()),
        }))
    }

    unsafe fn reclaim(ptr: *mut Node) {
        drop(Box::from_raw(ptr));
    }
}

/// One thread's local retirement accumulation, spliced onto the global
/// retirement list once it reaches [`GC_THRESHOLD`]. Same shape as
/// `crate::gc::GcDomain`'s internal slot, duplicated here because that type
/// is specific to the indexed list's node layout.
struct RetireSlot {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    count: AtomicUsize,
}

impl RetireSlot {
    const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            tail: AtomicPtr::new(ptr::null_mut()),
            count: AtomicUsize::new(0),
        }
    }
}

/// A lock-free ordered-integer set using Harris's marked-pointer scheme.
pub struct HarrisSet {
    head: *mut Node,
    len: AtomicUsize,
    rcu: RcuDomain,
    retire: Box<[RetireSlot]>,
    global_head: AtomicPtr<Node>,
}

unsafe impl Send for HarrisSet {}
unsafe impl Sync for HarrisSet {}

impl HarrisSet {
    /// Build an empty set sized for `num_threads` registered participants.
    pub fn new(num_threads: usize) -> Self {
        let tail = Node::alloc(KEY_MAX, ptr::null_mut());
        let head = Node::alloc(KEY_MIN, tail);
        Self {
            head,
            len: AtomicUsize::new(0),
            rcu: RcuDomain::new(num_threads),
            retire: (0..num_threads).map(|_| RetireSlot::new()).collect(),
            global_head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn my_id(&self) -> Option<usize> {
        THREAD_ID.with(|c| c.get())
    }

    /// Fallible thread registration: returns an error instead of panicking
    /// when `id` is out of range for the RCU table this set was sized with.
    pub fn try_register_thread(&self, id: usize) -> Result<(), crate::error::RegisterError> {
        self.rcu.register(id)?;
        THREAD_ID.with(|c| c.set(Some(id)));
        Ok(())
    }

    /// Find `(left, right)` with `left.val < key <= right.val`, both
    /// unmarked, deferring any marked run found along the way for later
    /// reclamation. `id` identifies the calling thread's retirement queue;
    /// `None` means the excised run is leaked rather than deferred nowhere
    /// safe to free it from.
    fn search(&self, key: Key, id: Option<usize>) -> (*mut Node, *mut Node) {
        loop {
            let mut left = self.head;
            let mut left_next = unsafe { (*left).next.load(Ordering::Acquire) };
            let mut t = left_next;

            let right = loop {
                let t_unmarked = unmarked(t);
                let t_next = unsafe { (*t_unmarked).next.load(Ordering::Acquire) };
                if is_marked(t_next) {
                    t = t_next;
                    continue;
                }
                if unsafe { (*t_unmarked).val } >= key {
                    break t_unmarked;
                }
                left = t_unmarked;
                left_next = t_next;
                t = t_next;
            };

            if left_next == right {
                return (left, right);
            }

            if unsafe {
                (*left)
                    .next
                    .compare_exchange(left_next, right, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            } {
                if let Some(id) = id {
                    self.defer_chain(id, left_next, right);
                }
                return (left, right);
            }
            // Lost the excising CAS to a concurrent helper; restart.
        }
    }

    /// Add one node to thread `id`'s retirement queue, splicing the whole
    /// queue onto the global retirement list once it reaches
    /// [`GC_THRESHOLD`]. Never frees anything itself — freeing only happens
    /// in [`HarrisSet::reclaim_global`], outside any read section.
    fn defer(&self, id: usize, node: *mut Node) {
        let slot = &self.retire[id];
        unsafe {
            (*node)
                .gcnext
                .store(slot.head.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        slot.head.store(node, Ordering::Relaxed);
        if slot.tail.load(Ordering::Relaxed).is_null() {
            slot.tail.store(node, Ordering::Relaxed);
        }
        let count = slot.count.fetch_add(1, Ordering::Relaxed) + 1;
        if count < GC_THRESHOLD {
            return;
        }

        let mut global = self.global_head.load(Ordering::Acquire);
        loop {
            unsafe {
                (*slot.tail.load(Ordering::Relaxed))
                    .gcnext
                    .store(global, Ordering::Relaxed);
            }
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

    /// Defer every node from `start` up to (excluding) `end` onto thread
    /// `id`'s retirement queue. Called only on nodes already physically
    /// unlinked by a successful CAS in `search`.
    fn defer_chain(&self, id: usize, start: *mut Node, end: *mut Node) {
        let mut curr = unmarked(start);
        while curr != end {
            let next = unsafe { unmarked((*curr).next.load(Ordering::Acquire)) };
            self.defer(id, curr);
            curr = next;
        }
    }

    /// Claim the global retirement list and, if non-empty, wait out a grace
    /// period and free every node on it.
    ///
    /// Must only be called from outside a read section: every public
    /// operation calls this before taking its own `read_lock`, so the
    /// `synchronize` below never waits on the calling thread's own section.
    fn reclaim_global(&self) {
        if self.global_head.load(Ordering::Relaxed).is_null() {
            return;
        }
        let claimed = self.global_head.swap(ptr::null_mut(), Ordering::AcqRel);
        if claimed.is_null() {
            return;
        }
        self.rcu.synchronize();
        let mut curr = claimed;
        while !curr.is_null() {
            let next = unsafe { (*curr).gcnext.load(Ordering::Relaxed) };
            unsafe { Node::reclaim(curr) };
            curr = next;
        }
    }
}

impl Drop for HarrisSet {
    fn drop(&mut self) {
        unsafe {
            // No thread can be concurrently reading at this point: free
            // whatever is still sitting in a retirement queue first.
            let mut curr = self.global_head.swap(ptr::null_mut(), Ordering::Relaxed);
            while !curr.is_null() {
                let next = (*curr).gcnext.load(Ordering::Relaxed);
                Node::reclaim(curr);
                curr = next;
            }
            for slot in self.retire.iter() {
                let mut curr = slot.head.swap(ptr::null_mut(), Ordering::Relaxed);
                while !curr.is_null() {
                    let next = (*curr).gcnext.load(Ordering::Relaxed);
                    Node::reclaim(curr);
                    curr = next;
                }
            }
            let mut curr = self.head;
            while !curr.is_null() {
                let next = unmarked((*curr).next.load(Ordering::Relaxed));
                Node::reclaim(curr);
                curr = next;
            }
        }
    }
}

impl ConcurrentSet for HarrisSet {
    fn register_thread(&self, id: usize) {
        self.try_register_thread(id)
            .expect("HarrisSet::register_thread");
    }

    fn unregister_thread(&self, id: usize) {
        self.rcu.unregister(id);
        THREAD_ID.with(|c| c.set(None));
    }

    fn contains(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        let id = self.my_id();
        self.reclaim_global();
        if let Some(id) = id {
            self.rcu.read_lock(id);
        }
        let (_left, right) = self.search(key, id);
        let found = unsafe { (*right).val == key };
        if let Some(id) = id {
            self.rcu.read_unlock(id);
        }
        found
    }

    fn insert(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        let id = self.my_id();
        self.reclaim_global();
        if let Some(id) = id {
            self.rcu.read_lock(id);
        }
        let result = loop {
            let (left, right) = self.search(key, id);
            if unsafe { (*right).val == key } {
                break false;
            }
            let fresh = Node::alloc(key, right);
            let ok = unsafe {
                (*left)
                    .next
                    .compare_exchange(right, fresh, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            };
            if ok {
                self.len.fetch_add(1, Ordering::Relaxed);
                break true;
            }
            // `fresh` was never published: no concurrent thread could have
            // observed it, so freeing it immediately is always safe.
            unsafe { Node::reclaim(fresh) };
        };
        if let Some(id) = id {
            self.rcu.read_unlock(id);
        }
        result
    }

    fn remove(&self, key: Key) -> bool {
        debug_assert_user_key(key);
        let id = self.my_id();
        self.reclaim_global();
        if let Some(id) = id {
            self.rcu.read_lock(id);
        }
        let result = loop {
            let (_left, right) = self.search(key, id);
            if unsafe { (*right).val != key } {
                break false;
            }
            let right_next = unsafe { (*right).next.load(Ordering::Acquire) };
            if is_marked(right_next) {
                // Someone else is already deleting `right`; retry the whole
                // operation so the caller observes a consistent outcome.
                continue;
            }
            let marked_next = marked(right_next);
            let ok = unsafe {
                (*right)
                    .next
                    .compare_exchange(right_next, marked_next, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            };
            if !ok {
                continue;
            }
            self.len.fetch_sub(1, Ordering::Relaxed);
            // Attempt the cleanup excision immediately; if we lose the race,
            // a subsequent search (by any thread) will excise it instead.
            let _ = self.search(key, id);
            break true;
        };
        if let Some(id) = id {
            self.rcu.read_unlock(id);
        }
        result
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }
}
