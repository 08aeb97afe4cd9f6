//! Error types for the one genuinely recoverable failure mode in this crate.
//!
//! Everything else in the public surface returns a plain `bool` (present /
//! absent, newly-inserted / already-present) rather than a `Result`, matching
//! the reference source's convention that transient contention and expected
//! "not found" outcomes are not errors.

use thiserror::Error;

/// Failure registering a worker thread with the RCU / garbage-collector
/// tables backing [`crate::indexed::IndexedSet`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    /// The thread table was sized for `capacity` participants at
    /// construction time and is already full.
    #[error("thread registration table exhausted (capacity = {capacity})")]
    Exhausted {
        /// The table's fixed capacity.
        capacity: usize,
    },
    /// The caller supplied an id outside `0..capacity`.
    #[error("thread id {id} out of range for capacity {capacity}")]
    OutOfRange {
        /// The offending id.
        id: usize,
        /// The table's fixed capacity.
        capacity: usize,
    },
}
