//! The uniform set facade shared by every back-end.
//!
//! Mirrors the reference source's `set_contains` / `set_insert` /
//! `set_remove` / `set_size` surface, plus thread registration, as a single
//! Rust trait so call sites and the test suite in `tests/` can be written
//! once and exercised against all five back-ends.

use crate::key::Key;

/// A concurrent ordered-integer set back-end.
///
/// `register_thread` / `unregister_thread` bind a worker thread to whatever
/// per-thread bookkeeping a back-end needs (RCU slot, GC slot). Back-ends
/// that need none of that (coupling, lazy, versioned) implement these as
/// no-ops, documented as such at each call site. Harris and the indexed
/// list both register a thread into an `RcuDomain` for reclamation; Harris
/// tolerates an unregistered caller (its read sections become no-ops, at
/// the cost of that caller never delaying a `synchronize`), while the
/// indexed list's background worker assumes every live caller is
/// registered and should be treated as mandatory there.
pub trait ConcurrentSet: Send + Sync {
    /// Bind the calling thread to id `id`. Must be called once per thread
    /// before that thread issues any other operation, for back-ends that
    /// require registration. `id` must lie in `0..num_threads` as passed to
    /// the back-end's constructor.
    fn register_thread(&self, id: usize);

    /// Release whatever per-thread state `register_thread` bound.
    fn unregister_thread(&self, id: usize);

    /// Return whether `key` is currently present.
    fn contains(&self, key: Key) -> bool;

    /// Insert `key`. Returns `true` iff it was not already present.
    fn insert(&self, key: Key) -> bool;

    /// Remove `key`. Returns `true` iff it was present.
    fn remove(&self, key: Key) -> bool;

    /// A non-linearizable diagnostic count of keys currently present.
    fn len(&self) -> usize;

    /// Convenience wrapper over [`ConcurrentSet::len`].
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
