//! Prefetch policy hook: given a just-accessed item, suggest what else to
//! warm while the caller is already looking at this region.

use crate::cache_scheduler::CacheScheduler;

/// `(bundle, key)`, carried forward from the source plugin's `CacheIndex`
/// pair as a plain tuple alias rather than a named struct.
pub type CacheKey = (i64, String);

/// Advisory hook invoked after every successful [`CacheScheduler::access`].
///
/// Implementations must not block on I/O and must not call `access` on the
/// scheduler (that path can recurse into a factory call and deadlock); they
/// may call `prefetch` or read-only predicates like `is_cached`.
pub trait PrefetchPolicy: Send + Sync {
    fn apply(&self, scheduler: &CacheScheduler, just_accessed: (i64, &str), value: &[u8]) -> Vec<CacheKey>;
}
