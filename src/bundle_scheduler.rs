//! Everything scoped to a single bundle: its factory, its prefetch queue,
//! and its pool of background workers.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache_manager::CacheManager;
use crate::factory::Factory;
use crate::prefetch_queue::PrefetchQueue;
use crate::prefetcher::Prefetcher;

/// Owns one [`Factory`], one [`PrefetchQueue`], and `num_threads`
/// [`Prefetcher`]s draining it.
pub struct BundleScheduler {
    factory: Arc<dyn Factory>,
    queue: Arc<PrefetchQueue>,
    workers: Vec<Prefetcher>,
}

impl BundleScheduler {
    pub fn new(
        bundle: i64,
        factory: Arc<dyn Factory>,
        num_threads: usize,
        max_prefetch_size: usize,
        cache: Arc<Mutex<CacheManager>>,
    ) -> Self {
        let queue = Arc::new(PrefetchQueue::new(max_prefetch_size));
        let workers = (0..num_threads.max(1))
            .map(|_| {
                Prefetcher::spawn(
                    bundle,
                    Arc::clone(&queue),
                    Arc::clone(&factory),
                    Arc::clone(&cache),
                )
            })
            .collect();

        Self {
            factory,
            queue,
            workers,
        }
    }

    pub fn prefetch(&self, key: String) {
        self.queue.enqueue(key);
    }

    /// Fans invalidation out to every worker, so a production in flight for
    /// `key` is discarded before it can be stored.
    pub fn invalidate(&self, key: &str) {
        for worker in &self.workers {
            worker.signal_invalidated(key);
        }
    }

    /// A cloned handle to this bundle's factory, for callers that need to
    /// invoke it themselves after releasing the registry lock (the cold-miss
    /// path in `CacheScheduler`, which must not hold `factory_mutex` across a
    /// synchronous, potentially I/O-bound `create` call).
    pub fn factory_handle(&self) -> Arc<dyn Factory> {
        Arc::clone(&self.factory)
    }
}
