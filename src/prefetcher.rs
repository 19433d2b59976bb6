//! Background worker that drains a [`PrefetchQueue`] by calling a bundle's
//! factory and storing the result, racing safely against invalidation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache_manager::CacheManager;
use crate::factory::{Factory, FactoryResult};
use crate::prefetch_queue::PrefetchQueue;

const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct WorkerState {
    prefetching: Option<String>,
    invalidated: bool,
}

/// One background thread draining a bundle's [`PrefetchQueue`].
///
/// Dropping a `Prefetcher` requests shutdown and joins the thread, mirroring
/// the source plugin's `done`-flag-plus-join shutdown discipline.
pub struct Prefetcher {
    worker_state: Arc<Mutex<WorkerState>>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Prefetcher {
    pub fn spawn(
        bundle: i64,
        queue: Arc<PrefetchQueue>,
        factory: Arc<dyn Factory>,
        cache: Arc<Mutex<CacheManager>>,
    ) -> Self {
        let worker_state = Arc::new(Mutex::new(WorkerState::default()));
        let done = Arc::new(AtomicBool::new(false));

        let handle = {
            let worker_state = Arc::clone(&worker_state);
            let done = Arc::clone(&done);
            std::thread::Builder::new()
                .name(format!("prefetcher-{bundle}"))
                .spawn(move || run(bundle, &queue, &factory, &cache, &worker_state, &done))
                .expect("failed to spawn prefetcher thread")
        };

        Self {
            worker_state,
            done,
            handle: Some(handle),
        }
    }

    /// If this worker is currently producing `key`, marks it invalidated so
    /// the result is discarded instead of stored once production completes.
    pub fn signal_invalidated(&self, key: &str) {
        let mut state = self.worker_state.lock();
        if state.prefetching.as_deref() == Some(key) {
            state.invalidated = true;
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.done.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(
    bundle: i64,
    queue: &PrefetchQueue,
    factory: &Arc<dyn Factory>,
    cache: &Arc<Mutex<CacheManager>>,
    worker_state: &Arc<Mutex<WorkerState>>,
    done: &AtomicBool,
) {
    loop {
        let Some(key) = queue.dequeue(DEQUEUE_TIMEOUT) else {
            if done.load(Ordering::SeqCst) {
                return;
            }
            continue;
        };
        if done.load(Ordering::SeqCst) {
            queue.finish(&key);
            return;
        }

        match cache.lock().is_cached(bundle, &key) {
            Ok(true) => {
                queue.finish(&key);
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                log::warn!("is_cached check failed for bundle={bundle} key={key}: {err}");
                queue.finish(&key);
                continue;
            }
        }

        {
            let mut state = worker_state.lock();
            state.prefetching = Some(key.clone());
            state.invalidated = false;
        }

        let produced = match factory.create(&key) {
            FactoryResult::Produced(bytes) => Some(bytes),
            FactoryResult::NotAvailable => None,
            FactoryResult::Error(err) => {
                log::warn!("prefetch factory error for bundle={bundle} key={key}: {err}");
                None
            }
        };

        if let Some(bytes) = produced {
            let discard = {
                let mut state = worker_state.lock();
                let discard = state.invalidated;
                state.prefetching = None;
                discard
            };
            if discard {
                log::debug!("discarding prefetched bundle={bundle} key={key}: invalidated mid-flight");
            } else if let Err(err) = cache.lock().store(bundle, &key, &bytes) {
                log::warn!("failed to store prefetched bundle={bundle} key={key}: {err}");
            }
        } else {
            worker_state.lock().prefetching = None;
        }

        queue.finish(&key);
    }
}
