//! Two-tier caching subsystem for a DICOM web viewer.
//!
//! The durable tier ([`CacheManager`]) is a bundle-partitioned key/value
//! cache over a content-addressed [`BlobStore`] and a small relational
//! [`IndexDb`], enforcing a per-bundle quota with LRU eviction. The
//! scheduling tier ([`CacheScheduler`]) sits on top: it dispatches cache
//! misses to a per-bundle [`Factory`], runs background [`Prefetcher`]
//! workers pulling from a [`PrefetchQueue`], and applies an optional
//! [`PrefetchPolicy`] after every successful access.
//!
//! This crate knows nothing about DICOM, HTTP, or image decoding — those are
//! external collaborators, reached only through the [`Factory`] and
//! [`PrefetchPolicy`] traits.

mod blob_store;
mod bundle_scheduler;
mod cache_manager;
mod cache_scheduler;
mod config;
mod error;
mod factory;
mod index_db;
mod policy;
mod prefetch_queue;
mod prefetcher;

#[cfg(feature = "setup")]
mod setup;

pub use blob_store::BlobStore;
pub use bundle_scheduler::BundleScheduler;
pub use cache_manager::{BundleQuota, CacheManager};
pub use cache_scheduler::CacheScheduler;
pub use config::{BundleQuotaOverrides, CacheConfig};
pub use error::{CacheError, Result};
pub use factory::{Factory, FactoryError, FactoryResult};
pub use index_db::{BundleStats, CacheEntry, IndexDb};
pub use policy::{CacheKey, PrefetchPolicy};
pub use prefetch_queue::PrefetchQueue;
pub use prefetcher::Prefetcher;

#[cfg(feature = "setup")]
pub use setup::init_logging;

/// Bundle id conventionally used for the decoded-image bundle, the one
/// `CacheConfig::cache_size_mib` bounds. External collaborators are free to
/// register additional bundles under other ids; this one is just the id
/// `open` installs the configured size quota against.
pub const DECODED_IMAGE_BUNDLE: i64 = 1;

/// Opens a [`CacheScheduler`] rooted at `config.cache_path`, applying
/// `config.sanity_check_enabled` to the durable tier and installing
/// `config.cache_size_bytes()` as [`DECODED_IMAGE_BUNDLE`]'s byte quota.
/// Bundles (including that one) still need to be registered with a factory
/// by the caller after this returns.
pub fn open(config: &CacheConfig, max_prefetch_size: usize) -> Result<CacheScheduler> {
    config.validate()?;
    let manager = CacheManager::open(&config.cache_path, config.sanity_check_enabled)?;
    let scheduler = CacheScheduler::new(manager, max_prefetch_size);
    scheduler.set_bundle_quota(
        DECODED_IMAGE_BUNDLE,
        BundleQuota {
            max_count: 0,
            max_bytes: config.cache_size_bytes(),
        },
    )?;
    Ok(scheduler)
}
