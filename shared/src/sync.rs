//! Barrier used by the tick workers to alternate parallel work with a single-threaded merge

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct BarrierState {
    waiting: usize,
    generation: u64,
}

/// A reusable barrier whose last arriver does the merge before releasing everyone.
///
/// Every party calls [`SyncPoint::synchronize_and_release_last`] once per
/// crossing. All but the last block; the last returns `true` immediately and
/// must call [`SyncPoint::release_waiting_threads`] once its merge is done.
/// The others then return `false` and observe everything the merge wrote.
pub struct SyncPoint {
    parties: usize,
    state: Mutex<BarrierState>,
    released: Condvar,
}

impl SyncPoint {
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a sync point needs at least one party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                waiting: 0,
                generation: 0,
            }),
            released: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn synchronize_and_release_last(&self) -> bool {
        let mut state = self.state.lock();
        state.waiting += 1;
        if state.waiting == self.parties {
            return true;
        }
        let generation = state.generation;
        while state.generation == generation {
            self.released.wait(&mut state);
        }
        false
    }

    /// Called by the last arriver only.
    pub fn release_waiting_threads(&self) {
        let mut state = self.state.lock();
        assert_eq!(
            state.waiting, self.parties,
            "release called before every party arrived"
        );
        state.waiting = 0;
        state.generation += 1;
        self.released.notify_all();
    }
}

/// One worker's view of the pool: which partition it owns and the barrier it shares.
#[derive(Clone)]
pub struct ProcessorElement {
    pub thread_index: usize,
    pub thread_count: usize,
    sync: Arc<SyncPoint>,
}

impl ProcessorElement {
    pub fn new(thread_index: usize, sync: Arc<SyncPoint>) -> Self {
        let thread_count = sync.parties();
        assert!(thread_index < thread_count);
        Self {
            thread_index,
            thread_count,
            sync,
        }
    }

    /// Used by client projections, which process everything on the caller's thread.
    pub fn single_threaded() -> Self {
        Self::new(0, Arc::new(SyncPoint::new(1)))
    }

    /// Round-robin over the sorted key order: the key at `ordinal` belongs to
    /// exactly one thread for a given thread count.
    pub fn handles(&self, ordinal: usize) -> bool {
        ordinal % self.thread_count == self.thread_index
    }

    pub fn synchronize_and_release_last(&self) -> bool {
        self.sync.synchronize_and_release_last()
    }

    pub fn release_waiting_threads(&self) {
        self.sync.release_waiting_threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_single_party_is_always_last() {
        let element = ProcessorElement::single_threaded();
        for _ in 0..3 {
            assert!(element.synchronize_and_release_last());
            element.release_waiting_threads();
        }
        assert!(element.handles(0) && element.handles(7));
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let sync = Arc::new(SyncPoint::new(3));
        let elements: Vec<ProcessorElement> =
            (0..3).map(|index| ProcessorElement::new(index, Arc::clone(&sync))).collect();
        for ordinal in 0..20 {
            let owners = elements.iter().filter(|element| element.handles(ordinal)).count();
            assert_eq!(owners, 1);
        }
    }

    #[test]
    fn test_exactly_one_merger_per_crossing() {
        const THREADS: usize = 4;
        const CROSSINGS: usize = 50;
        let sync = Arc::new(SyncPoint::new(THREADS));
        let merges = Arc::new(AtomicUsize::new(0));
        let merged_value = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..THREADS)
            .map(|index| {
                let element = ProcessorElement::new(index, Arc::clone(&sync));
                let merges = Arc::clone(&merges);
                let merged_value = Arc::clone(&merged_value);
                thread::spawn(move || {
                    for crossing in 0..CROSSINGS {
                        if element.synchronize_and_release_last() {
                            merges.fetch_add(1, Ordering::SeqCst);
                            merged_value.store(crossing + 1, Ordering::SeqCst);
                            element.release_waiting_threads();
                        }
                        // Everyone sees the merge of this crossing before moving on.
                        assert!(merged_value.load(Ordering::SeqCst) >= crossing + 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(merges.load(Ordering::SeqCst), CROSSINGS);
    }
}
