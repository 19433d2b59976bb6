//! Public facade: registration, access/prefetch/invalidate, and the prefetch
//! policy hook, coordinating the cache mutex, the bundle registry, and the
//! background worker pools.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::bundle_scheduler::BundleScheduler;
use crate::cache_manager::{BundleQuota, CacheManager};
use crate::error::{CacheError, Result};
use crate::factory::{Factory, FactoryResult};
use crate::policy::{CacheKey, PrefetchPolicy};

/// Lock order, strictly enforced: `policy_mutex` ⊃ `factory_mutex` ⊃
/// `cache_mutex`. No method here ever holds `cache_mutex` while calling a
/// factory or a policy.
pub struct CacheScheduler {
    cache_mutex: Arc<Mutex<CacheManager>>,
    factory_mutex: Mutex<HashMap<i64, BundleScheduler>>,
    policy_mutex: ReentrantMutex<RefCell<Option<Arc<dyn PrefetchPolicy>>>>,
    max_prefetch_size: usize,
}

impl CacheScheduler {
    pub fn new(cache: CacheManager, max_prefetch_size: usize) -> Self {
        Self {
            cache_mutex: Arc::new(Mutex::new(cache)),
            factory_mutex: Mutex::new(HashMap::new()),
            policy_mutex: ReentrantMutex::new(RefCell::new(None)),
            max_prefetch_size,
        }
    }

    /// Registers `bundle`'s factory and spins up its worker pool. Bundles
    /// must all be registered before serving traffic; registering the same
    /// bundle twice is a caller bug.
    pub fn register(&self, bundle: i64, factory: Arc<dyn Factory>, num_threads: usize) -> Result<()> {
        let mut bundles = self.factory_mutex.lock();
        if bundles.contains_key(&bundle) {
            return Err(CacheError::BadSequenceOfCalls(format!(
                "bundle {bundle} is already registered"
            )));
        }
        let scheduler = BundleScheduler::new(
            bundle,
            factory,
            num_threads,
            self.max_prefetch_size,
            Arc::clone(&self.cache_mutex),
        );
        bundles.insert(bundle, scheduler);
        Ok(())
    }

    pub fn register_policy(&self, policy: Arc<dyn PrefetchPolicy>) {
        let guard = self.policy_mutex.lock();
        *guard.borrow_mut() = Some(policy);
    }

    /// Cache hit: served straight from `CacheManager`. Cache miss: calls the
    /// bundle's factory on the caller's own thread, without holding
    /// `cache_mutex`, so other keys stay served while a slow producer runs.
    pub fn access(&self, bundle: i64, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.cache_mutex.lock().access(bundle, key)? {
            self.apply_policy(bundle, key, &value);
            return Ok(Some(value));
        }

        match self.call_factory(bundle, key)? {
            FactoryResult::Produced(bytes) => {
                self.cache_mutex.lock().store(bundle, key, &bytes)?;
                self.apply_policy(bundle, key, &bytes);
                Ok(Some(bytes))
            }
            FactoryResult::NotAvailable => Ok(None),
            FactoryResult::Error(err) => Err(CacheError::Factory(err)),
        }
    }

    pub fn is_cached(&self, bundle: i64, key: &str) -> Result<bool> {
        self.cache_mutex.lock().is_cached(bundle, key)
    }

    /// Enqueues `key` as a background prefetch hint. A no-op if `bundle`
    /// isn't registered.
    pub fn prefetch(&self, bundle: i64, key: impl Into<String>) {
        let bundles = self.factory_mutex.lock();
        match bundles.get(&bundle) {
            Some(scheduler) => scheduler.prefetch(key.into()),
            None => log::warn!("prefetch requested for unregistered bundle {bundle}"),
        }
    }

    /// Removes `(bundle, key)` from the durable cache, then fans invalidation
    /// out to every worker in that bundle so a production in flight for the
    /// same key is discarded rather than stored.
    pub fn invalidate(&self, bundle: i64, key: &str) -> Result<()> {
        self.cache_mutex.lock().invalidate(bundle, key)?;
        if let Some(scheduler) = self.factory_mutex.lock().get(&bundle) {
            scheduler.invalidate(key);
        }
        Ok(())
    }

    pub fn clear_bundle(&self, bundle: i64) -> Result<()> {
        self.cache_mutex.lock().clear_bundle(bundle)
    }

    pub fn clear(&self) -> Result<()> {
        self.cache_mutex.lock().clear()
    }

    pub fn lookup_property(&self, key: &str) -> Result<Option<String>> {
        self.cache_mutex.lock().lookup_property(key)
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.cache_mutex.lock().set_property(key, value)
    }

    /// Sets the quota used for any bundle without an explicit override.
    pub fn set_default_quota(&self, quota: BundleQuota) {
        self.cache_mutex.lock().set_default_quota(quota);
    }

    /// Installs or updates `bundle`'s quota, evicting immediately if it is
    /// now exceeded. Does not require `bundle` to be registered.
    pub fn set_bundle_quota(&self, bundle: i64, quota: BundleQuota) -> Result<()> {
        self.cache_mutex.lock().set_bundle_quota(bundle, quota)
    }

    /// Looks up `bundle`'s factory under `factory_mutex` just long enough to
    /// clone the `Arc`, then releases the lock before calling `create` so a
    /// slow (network-bound) factory never blocks `register`/`prefetch`/
    /// `invalidate`/other bundles' cold misses.
    fn call_factory(&self, bundle: i64, key: &str) -> Result<FactoryResult> {
        let factory = {
            let bundles = self.factory_mutex.lock();
            let scheduler = bundles.get(&bundle).ok_or_else(|| {
                CacheError::BadSequenceOfCalls(format!("bundle {bundle} is not registered"))
            })?;
            scheduler.factory_handle()
        };
        Ok(factory.create(key))
    }

    fn apply_policy(&self, bundle: i64, key: &str, value: &[u8]) {
        let guard = self.policy_mutex.lock();
        let policy = guard.borrow().clone();
        let Some(policy) = policy else {
            return;
        };
        let targets: Vec<CacheKey> = policy.apply(self, (bundle, key), value);
        // Enqueued in reverse so the first target in the returned list ends
        // up on top of each bundle's LIFO (served first).
        for (target_bundle, target_key) in targets.into_iter().rev() {
            self.prefetch(target_bundle, target_key);
        }
    }
}
