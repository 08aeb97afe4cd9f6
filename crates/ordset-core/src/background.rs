//! Background worker for the indexed list: periodic index restructuring and
//! physical-removal sweeps. Grounded on the reference source's
//! `background.c`.
//!
//! Runs as one extra `std::thread`, sleeping between passes. Each pass:
//! 1. Claims the global GC freelist.
//! 2. Measures the largest `next`-hop gap between consecutive index
//!    entries; if it exceeds `max_gap`, rebuilds the index from a fresh walk
//!    of the list, promoting logically-deleted nodes to physically-pending
//!    along the way (the only place that promotion happens).
//! 3. Waits out a grace period, covering both the claimed freelist and any
//!    now-retired index snapshot.
//! 4. Frees the claimed freelist (and the retired index snapshot, if any).
//! 5. Runs a dummy slow-path `contains` to help-remove any remaining
//!    physically-pending node reachable from `head`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::indexed::{IndexSnapshot, IndexedCore};
use crate::key::KEY_MIN;
use crate::node::NodeState;

/// Default sleep interval between background passes.
pub const DEFAULT_BG_SLEEP: Duration = Duration::from_micros(250);
/// Default number of live nodes between consecutive index entries.
pub const DEFAULT_IDX_GAP: usize = 16;
/// Default maximum tolerated `next`-hop gap before a restructure is forced.
pub const DEFAULT_MAX_GAP: usize = DEFAULT_IDX_GAP * 10;

/// Tunable knobs for the background worker, overriding the `DEFAULT_*`
/// constants above.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundConfig {
    /// How long the worker sleeps between passes.
    pub sleep_interval: Duration,
    /// Target spacing (in live nodes) between index entries.
    pub idx_gap: usize,
    /// Largest tolerated `next`-hop gap before a restructure is triggered.
    pub max_gap: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            sleep_interval: DEFAULT_BG_SLEEP,
            idx_gap: DEFAULT_IDX_GAP,
            max_gap: DEFAULT_MAX_GAP,
        }
    }
}

/// Owns the worker thread's lifecycle: a stop flag and its `JoinHandle`.
pub(crate) struct BackgroundWorker {
    should_stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub(crate) fn spawn(core: Arc<IndexedCore>, config: BackgroundConfig) -> Self {
        let should_stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&should_stop);
        let handle = thread::Builder::new()
            .name("ordset-indexed-bg".to_string())
            .spawn(move || run(&core, &config, &stop_flag))
            .expect("failed to spawn indexed-list background worker");
        Self {
            should_stop,
            handle: Some(handle),
        }
    }

    /// Signal the worker to stop and join it, re-raising its panic (if any)
    /// so a worker failure surfaces loudly instead of degrading silently.
    pub(crate) fn stop_and_join(&mut self) {
        self.should_stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(payload) = handle.join() {
                std::panic::resume_unwind(payload);
            }
        }
    }
}

fn run(core: &IndexedCore, config: &BackgroundConfig, should_stop: &AtomicBool) {
    while !should_stop.load(Ordering::Acquire) {
        thread::sleep(config.sleep_interval);
        if should_stop.load(Ordering::Acquire) {
            break;
        }
        run_pass(core, config);
    }
}

fn run_pass(core: &IndexedCore, config: &BackgroundConfig) {
    let freelist = core.gc.cut();

    let gap = max_index_gap(core);
    let stale_index = if gap > config.max_gap {
        debug!(gap, max_gap = config.max_gap, "restructuring index");
        if gap > config.max_gap * 4 {
            warn!(gap, max_gap = config.max_gap, "index gap far exceeds max_gap");
        }
        Some(restructure(core, config))
    } else {
        None
    };

    core.rcu.synchronize();

    unsafe {
        core.gc.free_list(freelist);
        if let Some(old) = stale_index {
            drop(Box::from_raw(old));
        }
    }

    trace!("background pass: running scan_all");
    core.scan_all();
}

/// The largest number of `next`-hops between consecutive index entries (and
/// from the last entry to the end of the list).
fn max_index_gap(core: &IndexedCore) -> usize {
    let snapshot = core.idx.load(Ordering::Acquire);
    let entries = unsafe { (*snapshot).entries() };

    let mut max_gap = 0usize;
    for pair in entries.windows(2) {
        let (_, start) = pair[0];
        let (_, end) = pair[1];
        max_gap = max_gap.max(count_hops(start, Some(end)));
    }
    if let Some(&(_, last)) = entries.last() {
        max_gap = max_gap.max(count_hops(last, None));
    }
    max_gap
}

fn count_hops(start: *mut crate::node::Node, stop_at: Option<*mut crate::node::Node>) -> usize {
    let mut gap = 0;
    let mut node = start;
    loop {
        let next = unsafe { (*node).next.load(Ordering::Acquire) };
        if next.is_null() || Some(next) == stop_at {
            break;
        }
        gap += 1;
        node = next;
    }
    gap
}

/// Walk the whole list, promoting logically-deleted nodes to
/// physically-pending, and build a fresh index with an entry every
/// `config.idx_gap` live nodes. Swaps it in and returns the now-retired
/// previous index pointer (the caller must wait a grace period before
/// freeing it).
fn restructure(core: &IndexedCore, config: &BackgroundConfig) -> *mut IndexSnapshot {
    let mut entries = vec![(KEY_MIN, core.head)];
    let mut since_last = 0usize;

    let mut node = unsafe { (*core.head).next.load(Ordering::Acquire) };
    while !node.is_null() {
        let state = unsafe { (*node).state() };
        match state {
            NodeState::LogicallyDeleted => {
                core.try_mark_phys_remove(node);
            }
            NodeState::PhysicallyPending => {}
            NodeState::Live => {
                since_last += 1;
                if since_last >= config.idx_gap {
                    entries.push((unsafe { (*node).k }, node));
                    since_last = 0;
                }
            }
        }
        node = unsafe { (*node).next.load(Ordering::Acquire) };
    }

    core.swap_index(Box::new(IndexSnapshot::from_entries(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_gap_is_ten_times_idx_gap() {
        assert_eq!(DEFAULT_MAX_GAP, DEFAULT_IDX_GAP * 10);
    }

    #[test]
    fn restructure_shrinks_gap_after_bulk_insert() {
        let core = IndexedCore::new_bare(1);
        core.try_register_caller(0).unwrap();
        for k in 1..500 {
            assert!(core.raw_insert(k, Some(0)));
        }
        let config = BackgroundConfig {
            idx_gap: 8,
            max_gap: 16,
            ..BackgroundConfig::default()
        };
        assert!(max_index_gap(&core) > config.max_gap);
        let old = restructure(&core, &config);
        core.rcu.synchronize();
        unsafe { drop(Box::from_raw(old)) };
        assert!(max_index_gap(&core) <= config.max_gap);
    }
}
