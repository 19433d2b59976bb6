//! Bounded, deduplicating, LIFO work queue shared by a bundle's Prefetchers.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

struct State {
    /// LIFO stack of pending keys, most recently enqueued at the end.
    stack: Vec<String>,
    /// Every key currently either pending in `stack` or checked out by a
    /// Prefetcher that hasn't finished with it yet. Used for dedup.
    present: HashSet<String>,
}

/// A bounded LIFO queue of `(bundle, key)` work items (the bundle is implicit
/// — one queue per [`crate::BundleScheduler`]).
///
/// `enqueue` deduplicates against both pending and in-flight keys; when full,
/// the oldest pending key is dropped to make room for the newest (viewer UIs
/// care most about the freshest request).
pub struct PrefetchQueue {
    capacity: usize,
    state: Mutex<State>,
    not_empty: Condvar,
}

impl PrefetchQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                stack: Vec::new(),
                present: HashSet::new(),
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Pushes `key` if it isn't already pending or in-flight. Drops the
    /// oldest pending key if the queue is at capacity.
    pub fn enqueue(&self, key: String) {
        let mut state = self.state.lock();
        if state.present.contains(&key) {
            return;
        }
        if state.stack.len() >= self.capacity {
            let dropped = state.stack.remove(0);
            state.present.remove(&dropped);
        }
        state.present.insert(key.clone());
        state.stack.push(key);
        self.not_empty.notify_one();
    }

    /// Pops the most recently enqueued key, blocking up to `timeout` if the
    /// queue is empty. The key stays in the "present" set after this call
    /// returns, so a concurrent `enqueue` of the same key is still
    /// deduplicated until the caller later calls [`Self::finish`].
    pub fn dequeue(&self, timeout: Duration) -> Option<String> {
        let mut state = self.state.lock();
        if state.stack.is_empty() {
            let result = self.not_empty.wait_for(&mut state, timeout);
            if result.timed_out() && state.stack.is_empty() {
                return None;
            }
        }
        state.stack.pop()
    }

    /// Releases `key` from the "present" set once a Prefetcher is done with
    /// it (stored, discarded, or failed), allowing it to be enqueued again.
    pub fn finish(&self, key: &str) {
        self.state.lock().present.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_collapses_repeated_enqueues() {
        let q = PrefetchQueue::new(8);
        q.enqueue("A".to_owned());
        q.enqueue("A".to_owned());
        q.enqueue("A".to_owned());
        q.enqueue("A".to_owned());

        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("A".to_owned()));
        assert_eq!(q.dequeue(Duration::from_millis(10)), None);
    }

    #[test]
    fn lifo_order_serves_most_recent_first() {
        let q = PrefetchQueue::new(8);
        q.enqueue("a".to_owned());
        q.enqueue("b".to_owned());
        q.enqueue("c".to_owned());

        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("c".to_owned()));
        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("b".to_owned()));
        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("a".to_owned()));
    }

    #[test]
    fn full_queue_drops_the_oldest_pending_key() {
        let q = PrefetchQueue::new(2);
        q.enqueue("a".to_owned());
        q.enqueue("b".to_owned());
        q.enqueue("c".to_owned()); // drops "a"

        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("c".to_owned()));
        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("b".to_owned()));
        assert_eq!(q.dequeue(Duration::from_millis(10)), None);
    }

    #[test]
    fn finish_allows_re_enqueue_of_an_in_flight_key() {
        let q = PrefetchQueue::new(8);
        q.enqueue("A".to_owned());
        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("A".to_owned()));

        // Still "present" (in flight): re-enqueue is a no-op.
        q.enqueue("A".to_owned());
        assert_eq!(q.dequeue(Duration::from_millis(10)), None);

        q.finish("A");
        q.enqueue("A".to_owned());
        assert_eq!(q.dequeue(Duration::from_millis(10)), Some("A".to_owned()));
    }

    #[test]
    fn dequeue_times_out_on_empty_queue() {
        let q = PrefetchQueue::new(8);
        let start = std::time::Instant::now();
        assert_eq!(q.dequeue(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
