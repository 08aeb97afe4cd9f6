//! Node pool for the indexed list: allocation and the tri-state `v` encoding.
//!
//! The reference source multiplexes a node's value pointer across three
//! meanings (a real value, `NULL`, or a self-reference). Because this is a
//! pure set with no per-key payload, that multiplexing collapses to a plain
//! tag with no payload to alias against, so it is represented here as an
//! explicit `NodeState` behind an `AtomicU8` rather than reproduced
//! pointer-for-pointer — see `SPEC_FULL.md` section 9.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::key::Key;

/// The three states a node's value can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum NodeState {
    /// The key is present in the observable set.
    Live = 0,
    /// Logically removed: invisible to `contains`, but still linked and
    /// eligible for in-place re-insertion.
    LogicallyDeleted = 1,
    /// Physically pending: a marker node has been (or is being) spliced in
    /// immediately after this node; it is only reachable via a stale
    /// predecessor and must be backtracked past.
    PhysicallyPending = 2,
}

impl NodeState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => NodeState::Live,
            1 => NodeState::LogicallyDeleted,
            _ => NodeState::PhysicallyPending,
        }
    }
}

/// A node in the indexed lock-free list.
pub(crate) struct Node {
    pub(crate) k: Key,
    state: AtomicU8,
    /// True only for marker nodes, appended by `help_remove` immediately
    /// after a physically-pending node. Set once at construction, before the
    /// node is ever published via CAS, so a plain `bool` is sound even
    /// though the node is later shared across threads.
    pub(crate) marked: bool,
    pub(crate) next: AtomicPtr<Node>,
    /// Approximate back-link: a search hint only, never load-bearing for
    /// correctness. Updated with `Relaxed` stores.
    pub(crate) prev: AtomicPtr<Node>,
    /// Intrusive link used exclusively by the garbage collector's per-thread
    /// and global freelists; never read by list traversal.
    pub(crate) gcnext: AtomicPtr<Node>,
}

impl Node {
    /// Allocate a new live node and leak it to a raw pointer. Ownership
    /// transfers to whichever structure successfully CASes it into the
    /// list; callers that lose the race must reclaim it with
    /// [`Node::reclaim`].
    pub(crate) fn alloc_live(k: Key, prev: *mut Node, next: *mut Node) -> *mut Node {
        Self::alloc(k, NodeState::Live, false, prev, next)
    }

    /// Allocate a new marker node (physically-pending, `marked = true`).
    pub(crate) fn alloc_marker(next: *mut Node) -> *mut Node {
        Self::alloc(0, NodeState::PhysicallyPending, true, ptr::null_mut(), next)
    }

    /// Allocate the list head sentinel, at key [`crate::key::KEY_MIN`].
    pub(crate) fn alloc_head() -> *mut Node {
        Self::alloc(
            crate::key::KEY_MIN,
            NodeState::Live,
            false,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    }

    fn alloc(k: Key, state: NodeState, marked: bool, prev: *mut Node, next: *mut Node) -> *mut Node {
        let node = Box::new(Node {
            k,
            state: AtomicU8::new(state as u8),
            marked,
            next: AtomicPtr::new(next),
            prev: AtomicPtr::new(prev),
            gcnext: AtomicPtr::new(ptr::null_mut()),
        });
        Box::into_raw(node)
    }

    /// Read the current state with acquire ordering.
    pub(crate) fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// CAS the state from `current` to `new`, returning whether it
    /// succeeded.
    pub(crate) fn cas_state(&self, current: NodeState, new: NodeState) -> bool {
        self.state
            .compare_exchange(
                current as u8,
                new as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Free a node that lost an allocation race and was never published.
    ///
    /// # Safety
    /// `ptr` must be a pointer returned by one of `Node::alloc_*` that was
    /// never installed into any list (no other thread can have observed it).
    pub(crate) unsafe fn reclaim_unpublished(ptr: *mut Node) {
        debug_assert!(!ptr.is_null());
        drop(Box::from_raw(ptr));
    }

    /// Free a node that has been unlinked from the list and has survived an
    /// RCU grace period (called only from the garbage collector).
    ///
    /// # Safety
    /// `ptr` must be unreachable from the list and no thread may hold a
    /// reference into it (guaranteed by a prior `RcuDomain::synchronize`
    /// call covering the unlinking operation).
    pub(crate) unsafe fn reclaim(ptr: *mut Node) {
        debug_assert!(!ptr.is_null());
        drop(Box::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_live_starts_live() {
        unsafe {
            let n = Node::alloc_live(5, ptr::null_mut(), ptr::null_mut());
            assert_eq!((*n).state(), NodeState::Live);
            assert!(!(*n).marked);
            Node::reclaim_unpublished(n);
        }
    }

    #[test]
    fn alloc_marker_is_physically_pending_and_marked() {
        unsafe {
            let n = Node::alloc_marker(ptr::null_mut());
            assert_eq!((*n).state(), NodeState::PhysicallyPending);
            assert!((*n).marked);
            Node::reclaim_unpublished(n);
        }
    }

    #[test]
    fn cas_state_transitions_live_to_logically_deleted() {
        unsafe {
            let n = Node::alloc_live(1, ptr::null_mut(), ptr::null_mut());
            assert!((*n).cas_state(NodeState::Live, NodeState::LogicallyDeleted));
            assert_eq!((*n).state(), NodeState::LogicallyDeleted);
            assert!(!(*n).cas_state(NodeState::Live, NodeState::PhysicallyPending));
            Node::reclaim_unpublished(n);
        }
    }
}
