//! The ordered key space shared by every back-end.
//!
//! Keys are bounded signed integers. Two values are reserved as sentinels and
//! must never be passed to `insert`/`remove`/`contains`: `KEY_MIN` anchors the
//! head of every sorted list, `KEY_MAX` anchors the indexed list's
//! background scan (`IndexedSet` uses it as a "scan past the end" probe key).

/// The key type used across all back-ends.
pub type Key = i64;

/// Reserved sentinel: the head of every sorted list owns this key.
pub const KEY_MIN: Key = Key::MIN;

/// Reserved sentinel: never present as a user key, used by the background
/// worker to force a full-list scan.
pub const KEY_MAX: Key = Key::MAX;

/// Debug-assertion guard for the reserved key space. Called at every
/// back-end's public `contains`/`insert`/`remove` entry point (not at
/// internal traversal helpers, some of which probe with `KEY_MAX`
/// themselves). Compiled out in release builds, matching the reference
/// source's "undefined behavior on misuse" posture for this class of
/// caller error.
#[inline]
pub(crate) fn debug_assert_user_key(key: Key) {
    debug_assert!(
        key != KEY_MIN && key != KEY_MAX,
        "key {key} collides with a reserved sentinel"
    );
}
