//! Universal invariants (SPEC_FULL.md section 8, properties 1-7), run
//! against every back-end through the shared `ConcurrentSet` trait.

use ordset_core::{ConcurrentSet, CouplingSet, HarrisSet, IndexedSet, LazySet, VersionedSet};

fn make_all(num_threads: usize) -> Vec<(&'static str, Box<dyn ConcurrentSet>)> {
    vec![
        ("coupling", Box::new(CouplingSet::new(num_threads))),
        ("lazy", Box::new(LazySet::new(num_threads))),
        ("harris", Box::new(HarrisSet::new(num_threads))),
        ("versioned", Box::new(VersionedSet::new(num_threads))),
        ("indexed", Box::new(IndexedSet::new(num_threads))),
    ]
}

#[test]
fn property_1_insert_then_contains() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        assert!(set.insert(42), "{name}: first insert should be new");
        assert!(set.contains(42), "{name}: contains after insert");
    }
}

#[test]
fn property_2_double_insert() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        assert!(set.insert(7), "{name}: first insert");
        assert!(!set.insert(7), "{name}: second insert of same key");
        assert!(set.contains(7), "{name}: still present");
    }
}

#[test]
fn property_3_remove_absent_key_is_noop() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        assert!(!set.remove(99), "{name}: remove of absent key");
        assert!(!set.contains(99), "{name}: absent key stays absent");
        assert_eq!(set.len(), 0, "{name}: no membership change");
    }
}

#[test]
fn property_4_remove_present_key() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        assert!(set.insert(13));
        assert!(set.remove(13), "{name}: remove of present key");
        assert!(!set.contains(13), "{name}: gone after remove");
    }
}

#[test]
fn property_5_at_most_one_of_each_key() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        for _ in 0..5 {
            set.insert(1);
        }
        assert_eq!(set.len(), 1, "{name}: repeated inserts collapse to one entry");
        set.remove(1);
        assert_eq!(set.len(), 0, "{name}: single remove clears it");
    }
}

#[test]
fn property_6_keys_stay_sorted_at_quiescence() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        let keys = [50, 10, 90, 30, 70, 20, 60, 40, 80];
        for k in keys {
            set.insert(k);
        }
        let mut sorted = keys;
        sorted.sort_unstable();
        for k in sorted {
            assert!(set.contains(k), "{name}: key {k} should be present");
        }
        assert_eq!(set.len(), keys.len(), "{name}: all distinct keys present");
    }
}

#[test]
fn property_7_len_matches_insert_minus_remove() {
    for (name, set) in make_all(1) {
        set.register_thread(0);
        for k in 1..=20 {
            set.insert(k);
        }
        for k in 1..=10 {
            set.remove(k);
        }
        assert_eq!(set.len(), 10, "{name}: len reflects net membership");
    }
}
