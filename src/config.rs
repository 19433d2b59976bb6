//! Configuration recognised by the cache engine.
//!
//! The embedding host (the DICOM store's plugin loader) hands us a handful
//! of options read from its own configuration file; this module is the
//! typed landing spot for those options, independent of however the host
//! chooses to parse its configuration format.

use std::path::PathBuf;

use crate::cache_manager::BundleQuota;

/// Top-level cache configuration.
///
/// See [`Self::DEFAULT`] for the defaults the host falls back to when an
/// option is unset.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory holding the blob store and the index database.
    ///
    /// Defaults to `<storage_directory>/WebViewerCache`, but since this
    /// crate has no notion of "storage directory", the bare default here is
    /// `./WebViewerCache`; hosts are expected to override it.
    pub cache_path: PathBuf,

    /// `max_bytes` for the decoded-image bundle, in MiB. Must be `> 0`.
    pub cache_size_mib: u64,

    /// Worker pool size for the decoded-image bundle.
    pub threads: usize,

    /// Run [`crate::CacheManager`]'s sanity check after every mutating
    /// operation. Debug-only; never enable in production, it makes every
    /// write linear in the size of the cache.
    pub sanity_check_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new_default()
    }
}

impl CacheConfig {
    /// `max(1, hardware_concurrency / 2)`, per the source plugin's default.
    pub fn default_threads() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
            .div_euclid(2)
            .max(1)
    }

    /// `max_bytes` for the decoded-image bundle, in bytes.
    #[inline]
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_mib.saturating_mul(1024 * 1024)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.cache_size_mib == 0 {
            return Err(crate::error::CacheError::BadConfiguration(
                "cache_size_mib must be > 0".to_owned(),
            ));
        }
        if self.threads == 0 {
            return Err(crate::error::CacheError::BadConfiguration(
                "threads must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    pub const DEFAULT_CACHE_SIZE_MIB: u64 = 100;

    /// The teacher's `DataStoreConfig` exposes a `const DEFAULT`; `threads`
    /// here depends on a runtime `hardware_concurrency` reading, which isn't
    /// available in a `const` context, so this is a plain associated fn
    /// instead and [`Default::default`] forwards to it.
    pub fn new_default() -> Self {
        Self {
            cache_path: PathBuf::from("WebViewerCache"),
            cache_size_mib: Self::DEFAULT_CACHE_SIZE_MIB,
            threads: Self::default_threads(),
            sanity_check_enabled: cfg!(debug_assertions),
        }
    }
}

/// Per-bundle quota overrides supplied at registration time, keyed by bundle id.
///
/// Example: the series-info bundle is commonly registered with
/// `BundleQuota { max_count: 1000, max_bytes: 0 }` (bounded count, unbounded
/// size, relying on an external invalidation signal instead of LRU pressure).
pub type BundleQuotaOverrides = std::collections::HashMap<i64, BundleQuota>;
