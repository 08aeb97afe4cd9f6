//! Concurrent stress properties (SPEC_FULL.md section 8, properties 8-9) and
//! the indexed-list-specific properties 10-12.
//!
//! Property 9 (no use-after-free / double-free under a race detector) is a
//! Miri/loom concern exercised by the test-tooling setup described in
//! `SPEC_FULL.md` section 10, not by assertions inside these tests; what
//! these tests check is the *observable* outcome of sustained concurrent
//! load, which is what a race detector run would be validating alongside.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use ordset_core::{
    BackgroundConfig, ConcurrentSet, CouplingSet, HarrisSet, IndexedSet, LazySet, VersionedSet,
};

const THREADS: usize = 4;
const PER_THREAD: i64 = 500;

fn stress<S: ConcurrentSet + 'static>(set: Arc<S>) {
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                set.register_thread(t);
                let base = (t as i64) * PER_THREAD;
                for i in 0..PER_THREAD {
                    assert!(set.insert(base + i));
                }
                // Remove every other key this thread inserted.
                for i in (0..PER_THREAD).step_by(2) {
                    assert!(set.remove(base + i));
                }
                set.unregister_thread(t);
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let mut expected = HashSet::new();
    for t in 0..THREADS {
        let base = (t as i64) * PER_THREAD;
        for i in (1..PER_THREAD).step_by(2) {
            expected.insert(base + i);
        }
    }

    assert_eq!(set.len(), expected.len());
    for &k in &expected {
        assert!(set.contains(k));
    }
}

#[test]
fn property_8_coupling_disjoint_ranges_survive_concurrent_load() {
    stress(Arc::new(CouplingSet::new(THREADS)));
}

#[test]
fn property_8_lazy_disjoint_ranges_survive_concurrent_load() {
    stress(Arc::new(LazySet::new(THREADS)));
}

#[test]
fn property_8_harris_disjoint_ranges_survive_concurrent_load() {
    stress(Arc::new(HarrisSet::new(THREADS)));
}

#[test]
fn property_8_versioned_disjoint_ranges_survive_concurrent_load() {
    stress(Arc::new(VersionedSet::new(THREADS)));
}

#[test]
fn property_8_indexed_disjoint_ranges_survive_concurrent_load() {
    stress(Arc::new(IndexedSet::new(THREADS)));
}

#[test]
fn property_10_reachable_after_restructure_and_grace_period() {
    let config = BackgroundConfig {
        sleep_interval: std::time::Duration::from_millis(2),
        idx_gap: 8,
        max_gap: 16,
    };
    let set = IndexedSet::with_config(1, config);
    set.register_thread(0);
    for k in 1..2000 {
        set.insert(k);
    }
    for k in (1..2000).step_by(3) {
        set.remove(k);
    }
    thread::sleep(std::time::Duration::from_millis(100));
    // Every surviving key must still be reachable and correctly reported.
    for k in 1..2000 {
        let expected = k % 3 != 1;
        assert_eq!(set.contains(k), expected, "key {k}");
    }
}

#[test]
fn property_12_remove_then_concurrent_insert_is_linearizable() {
    let set = Arc::new(IndexedSet::new(2));
    set.register_thread(0);
    assert!(set.insert(10));
    assert!(set.remove(10));

    let s1 = Arc::clone(&set);
    let t1 = thread::spawn(move || {
        s1.register_thread(0);
        s1.insert(10)
    });
    let s2 = Arc::clone(&set);
    let t2 = thread::spawn(move || {
        s2.register_thread(1);
        s2.insert(10)
    });
    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();

    // Exactly one of the two racing inserts created the entry.
    assert_ne!(r1, r2);
    assert!(set.contains(10));
}
