//! End-to-end scenarios E1-E6 from SPEC_FULL.md section 8's scenario table,
//! reproduced against the concrete back-end each row names.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ordset_core::{BackgroundConfig, ConcurrentSet, HarrisSet, IndexedSet, VersionedSet};

/// E1: fresh set, a fixed sequence of single-threaded operations.
#[test]
fn e1_fresh_set_mixed_ops() {
    let set = IndexedSet::new(1);
    set.register_thread(0);

    assert_eq!(set.insert(5), true);
    assert_eq!(set.insert(3), true);
    assert_eq!(set.insert(7), true);
    assert_eq!(set.contains(3), true);
    assert_eq!(set.contains(4), false);
    assert_eq!(set.remove(5), true);
    assert_eq!(set.contains(5), false);
    assert_eq!(set.len(), 2);
}

/// E2: two threads, one inserting 1..100 while the other repeatedly removes
/// 1..100. The end state must have no duplicates and a size matching
/// whatever survived the race.
#[test]
fn e2_two_thread_insert_remove_race() {
    let set = Arc::new(IndexedSet::new(2));

    let s1 = Arc::clone(&set);
    let inserter = thread::spawn(move || {
        s1.register_thread(0);
        for k in 1..100 {
            s1.insert(k);
        }
    });

    let s2 = Arc::clone(&set);
    let remover = thread::spawn(move || {
        s2.register_thread(1);
        for _ in 0..10 {
            for k in 1..100 {
                s2.remove(k);
            }
        }
    });

    inserter.join().unwrap();
    remover.join().unwrap();

    // Whatever is left must be internally consistent: no key counted twice,
    // and len() must match a direct membership scan.
    let mut present = 0usize;
    for k in 1..100 {
        if set.contains(k) {
            present += 1;
        }
    }
    assert_eq!(set.len(), present);
}

/// E3: the indexed back-end under a bulk load, checked against its own
/// bounded-gap guarantee after the background worker has had time to run.
#[test]
fn e3_indexed_bulk_insert_then_gap_bound() {
    let config = BackgroundConfig {
        sleep_interval: Duration::from_millis(5),
        idx_gap: 32,
        max_gap: 64,
    };
    let set = IndexedSet::with_config(1, config);
    set.register_thread(0);

    for k in 1..10_000 {
        set.insert(k);
    }
    assert_eq!(set.len(), 9_999);

    thread::sleep(Duration::from_millis(200));

    for k in 1..10_000 {
        assert!(set.contains(k), "key {k} should survive a pure bulk insert");
    }
}

/// E4: Harris back-end, a fixed single-key sequence.
#[test]
fn e4_harris_insert_remove_insert_contains() {
    let set = HarrisSet::new(1);
    set.register_thread(0);

    assert_eq!(set.insert(2), true);
    assert_eq!(set.remove(2), true);
    assert_eq!(set.insert(2), true);
    assert_eq!(set.contains(2), true);
}

/// E5: versioned back-end, 4 threads each inserting a disjoint range of
/// 1000 keys; final size must be exactly 4000 after joining.
#[test]
fn e5_versioned_four_threads_disjoint_ranges() {
    let set = Arc::new(VersionedSet::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let set = Arc::clone(&set);
            thread::spawn(move || {
                set.register_thread(t);
                let base = (t as i64) * 1000;
                for i in 0..1000 {
                    assert!(set.insert(base + i));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(set.len(), 4000);
}

/// E6: indexed back-end, remove(10) then a two-thread race both inserting
/// 10; exactly one side observes `true`, and the key ends up present.
#[test]
fn e6_indexed_remove_then_concurrent_double_insert() {
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

    assert!(r1 ^ r2, "exactly one of the two racing inserts should win");
    assert!(set.contains(10));
}
