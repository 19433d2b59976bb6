//! Bundle-partitioned, quota-enforcing, LRU-evicting cache over
//! [`BlobStore`] + [`IndexDb`].
//!
//! `CacheManager` is **not** internally synchronised: every method assumes
//! the caller serialises access with a single mutex (`cache_mutex`, owned by
//! [`crate::CacheScheduler`]). This mirrors the source plugin, which passes
//! the same `boost::mutex` by reference into every component that touches
//! the manager rather than making the manager re-entrant itself.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::blob_store::BlobStore;
use crate::error::{CacheError, Result};
use crate::index_db::{CacheEntry, IndexDb};

/// A per-bundle quota. `0` in either field means "unlimited in that dimension".
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct BundleQuota {
    pub max_count: u64,
    pub max_bytes: u64,
}

impl BundleQuota {
    pub const UNLIMITED: Self = Self {
        max_count: 0,
        max_bytes: 0,
    };

    fn count_ok(&self, count: u64) -> bool {
        self.max_count == 0 || count <= self.max_count
    }

    fn bytes_ok(&self, total_size: u64) -> bool {
        self.max_bytes == 0 || total_size <= self.max_bytes
    }
}

impl Default for BundleQuota {
    fn default() -> Self {
        Self::UNLIMITED
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BundleCounters {
    count: u64,
    total_size: u64,
}

/// The durable half of the two-tier cache: a content-addressed blob store
/// plus a relational index, with per-bundle quotas enforced on every write.
pub struct CacheManager {
    blobs: BlobStore,
    index: IndexDb,
    last_access_counter: AtomicI64,
    quotas: HashMap<i64, BundleQuota>,
    default_quota: BundleQuota,
    counters: HashMap<i64, BundleCounters>,
    sanity_check_enabled: bool,
}

impl CacheManager {
    /// Opens the cache rooted at `root` (a blob subdirectory and a
    /// `index.sqlite3` file are created under it), reconciling blob/row
    /// referential integrity from whatever is already on disk.
    pub fn open(root: &Path, sanity_check_enabled: bool) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(CacheError::Io)?;
        let blobs = BlobStore::open(root.join("blobs")).map_err(CacheError::Io)?;
        let mut index = IndexDb::open(&root.join("index.sqlite3"))?;

        Self::sweep_orphan_blobs(&blobs, &index)?;

        let last_access_counter = AtomicI64::new(index.max_last_access()?);
        let mut counters = HashMap::new();
        for bundle in index.bundles_in_use()? {
            let stats = index.bundle_stats(bundle)?;
            counters.insert(
                bundle,
                BundleCounters {
                    count: stats.count,
                    total_size: stats.total_size,
                },
            );
        }

        Ok(Self {
            blobs,
            index,
            last_access_counter,
            quotas: HashMap::new(),
            default_quota: BundleQuota::UNLIMITED,
            counters,
            sanity_check_enabled,
        })
    }

    /// Any blob not referenced by an index row is an orphan left behind by a
    /// crash between [`BlobStore::put`] and the matching index-row insert,
    /// and is deleted.
    fn sweep_orphan_blobs(blobs: &BlobStore, index: &IndexDb) -> Result<()> {
        let on_disk = blobs.list().map_err(CacheError::Io)?;
        if on_disk.is_empty() {
            return Ok(());
        }
        let referenced: HashSet<String> =
            index.all_entries()?.into_iter().map(|e| e.uuid).collect();

        for orphan in on_disk.difference(&referenced) {
            log::warn!("sweeping orphan blob {orphan} with no index row");
            blobs.delete(orphan).map_err(CacheError::Io)?;
        }
        Ok(())
    }

    pub fn set_default_quota(&mut self, quota: BundleQuota) {
        self.default_quota = quota;
    }

    /// Installs or updates `bundle`'s quota, immediately evicting if the new
    /// quota is now exceeded.
    pub fn set_bundle_quota(&mut self, bundle: i64, quota: BundleQuota) -> Result<()> {
        self.quotas.insert(bundle, quota);
        self.ensure_quota(bundle)
    }

    fn quota_for(&self, bundle: i64) -> BundleQuota {
        self.quotas.get(&bundle).copied().unwrap_or(self.default_quota)
    }

    fn next_last_access(&self) -> i64 {
        self.last_access_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn forget(&mut self, bundle: i64, removed: &CacheEntry) -> Result<()> {
        self.blobs.delete(&removed.uuid).map_err(CacheError::Io)?;
        let counters = self.counters.entry(bundle).or_default();
        counters.count = counters.count.saturating_sub(1);
        counters.total_size = counters.total_size.saturating_sub(removed.size);
        Ok(())
    }

    /// Stores `bytes` under `(bundle, key)`, overwriting any previous entry,
    /// then enforces the bundle's quota.
    pub fn store(&mut self, bundle: i64, key: &str, bytes: &[u8]) -> Result<()> {
        if let Some(old) = self.index.delete_entry(bundle, key)? {
            self.forget(bundle, &old)?;
        }

        let uuid = self.blobs.put(bytes).map_err(CacheError::Io)?;
        let size = bytes.len() as u64;
        let last_access = self.next_last_access();

        let entry = CacheEntry {
            bundle,
            key: key.to_owned(),
            uuid,
            size,
            last_access,
        };
        if let Err(e) = self.index.upsert_entry(&entry) {
            // Roll the blob back out so BlobStore and IndexDb don't diverge.
            let _ = self.blobs.delete(&entry.uuid);
            return Err(e);
        }

        let counters = self.counters.entry(bundle).or_default();
        counters.count += 1;
        counters.total_size += size;

        log::debug!("stored bundle={bundle} key={key} size={size}");

        self.ensure_quota(bundle)?;
        if self.sanity_check_enabled {
            self.sanity_check()?;
        }
        Ok(())
    }

    /// Reads `(bundle, key)` if present, bumping `last_access`.
    pub fn access(&mut self, bundle: i64, key: &str) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.index.get_entry(bundle, key)? else {
            return Ok(None);
        };

        let bytes = self.blobs.get(&entry.uuid).map_err(CacheError::Io)?;

        let mut updated = entry;
        updated.last_access = self.next_last_access();
        self.index.upsert_entry(&updated)?;

        Ok(Some(bytes))
    }

    pub fn is_cached(&self, bundle: i64, key: &str) -> Result<bool> {
        Ok(self.index.get_entry(bundle, key)?.is_some())
    }

    /// Removes `(bundle, key)` if present. No error if absent.
    pub fn invalidate(&mut self, bundle: i64, key: &str) -> Result<()> {
        if let Some(old) = self.index.delete_entry(bundle, key)? {
            self.forget(bundle, &old)?;
        }
        Ok(())
    }

    pub fn clear_bundle(&mut self, bundle: i64) -> Result<()> {
        let uuids = self.index.clear_bundle(bundle)?;
        for uuid in uuids {
            self.blobs.delete(&uuid).map_err(CacheError::Io)?;
        }
        self.counters.remove(&bundle);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        let uuids = self.index.clear_all()?;
        for uuid in uuids {
            self.blobs.delete(&uuid).map_err(CacheError::Io)?;
        }
        self.counters.clear();
        Ok(())
    }

    pub fn lookup_property(&self, key: &str) -> Result<Option<String>> {
        self.index.get_property(key)
    }

    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.index.set_property(key, value)
    }

    /// Evicts the globally-oldest entries in `bundle` until both quota
    /// dimensions are satisfied. A single entry whose own size exceeds
    /// `max_bytes` is always left in place (forward-progress guarantee).
    fn ensure_quota(&mut self, bundle: i64) -> Result<()> {
        let quota = self.quota_for(bundle);
        if quota.max_count == 0 && quota.max_bytes == 0 {
            return Ok(());
        }

        loop {
            let counters = self.counters.get(&bundle).copied().unwrap_or_default();
            if quota.count_ok(counters.count) && quota.bytes_ok(counters.total_size) {
                break;
            }
            if counters.count <= 1 {
                // Never evict the sole remaining entry: guarantees `store`
                // always leaves at least the entry it just wrote.
                break;
            }

            let Some(oldest) = self.index.oldest_entry(bundle)? else {
                break;
            };
            self.index.delete_entry(bundle, &oldest.key)?;
            self.forget(bundle, &oldest)?;

            log::trace!("evicted bundle={bundle} key={} (quota pressure)", oldest.key);
        }
        Ok(())
    }

    /// Verifies blob/row referential integrity and per-bundle counter
    /// bookkeeping against the current on-disk state. Debug tooling only:
    /// `O(entries + blobs)`, never on the hot path unless the host
    /// explicitly opts in via [`crate::CacheConfig::sanity_check_enabled`].
    pub fn sanity_check(&mut self) -> Result<()> {
        let on_disk = self.blobs.list().map_err(CacheError::Io)?;
        let entries = self.index.all_entries()?;

        let mut referenced = HashSet::with_capacity(entries.len());
        let mut recomputed: HashMap<i64, BundleCounters> = HashMap::new();

        for entry in &entries {
            if !referenced.insert(entry.uuid.clone()) {
                return Err(CacheError::Corruption(format!(
                    "blob {} is referenced by more than one index row",
                    entry.uuid
                )));
            }

            if !on_disk.contains(&entry.uuid) {
                return Err(CacheError::Corruption(format!(
                    "index row ({}, {}) references missing blob {}",
                    entry.bundle, entry.key, entry.uuid
                )));
            }
            let actual_size = self.blobs.size_of(&entry.uuid).map_err(CacheError::Io)?;
            if actual_size != entry.size {
                return Err(CacheError::Corruption(format!(
                    "blob {} size mismatch: index says {}, disk says {actual_size}",
                    entry.uuid, entry.size
                )));
            }

            let counters = recomputed.entry(entry.bundle).or_default();
            counters.count += 1;
            counters.total_size += entry.size;
        }

        if referenced != on_disk {
            return Err(CacheError::Corruption(format!(
                "blob store holds {} blob(s) with no index row",
                on_disk.difference(&referenced).count()
            )));
        }

        for (bundle, counters) in &self.counters {
            let expected = recomputed.get(bundle).copied().unwrap_or_default();
            if counters.count != expected.count || counters.total_size != expected.total_size {
                return Err(CacheError::Corruption(format!(
                    "bundle {bundle} counters out of sync: in-memory {counters:?}, index {expected:?}"
                )));
            }
            let quota = self.quota_for(*bundle);
            if !quota.count_ok(counters.count) || !quota.bytes_ok(counters.total_size) {
                if counters.count > 1 {
                    return Err(CacheError::Corruption(format!(
                        "bundle {bundle} exceeds its quota: {counters:?} vs {quota:?}"
                    )));
                }
            }
        }

        Ok(())
    }
}
