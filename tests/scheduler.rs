//! Whole-crate integration tests: a scheduler wired up with real factories
//! and a real on-disk cache, exercising the concurrency scenarios that a
//! unit test confined to one module can't reach.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use webviewer_cache::{
    BundleQuota, CacheConfig, CacheManager, CacheScheduler, Factory, FactoryError, FactoryResult,
    DECODED_IMAGE_BUNDLE,
};

struct ConstantFactory {
    value: Vec<u8>,
}

impl Factory for ConstantFactory {
    fn create(&self, _key: &str) -> FactoryResult {
        FactoryResult::Produced(self.value.clone())
    }
}

struct CountingFactory {
    calls: AtomicUsize,
}

impl Factory for CountingFactory {
    fn create(&self, key: &str) -> FactoryResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        FactoryResult::Produced(key.as_bytes().to_vec())
    }
}

struct SlowFactory {
    delay: Duration,
}

impl Factory for SlowFactory {
    fn create(&self, key: &str) -> FactoryResult {
        std::thread::sleep(self.delay);
        FactoryResult::Produced(format!("slow:{key}").into_bytes())
    }
}

struct FailingFactory;

impl Factory for FailingFactory {
    fn create(&self, _key: &str) -> FactoryResult {
        FactoryResult::Error(FactoryError::new("boom"))
    }
}

fn open_scheduler(dir: &tempfile::TempDir) -> CacheScheduler {
    let manager = CacheManager::open(dir.path(), true).unwrap();
    CacheScheduler::new(manager, 64)
}

#[test]
fn access_on_a_cold_key_calls_the_factory_and_caches_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    scheduler
        .register(
            0,
            Arc::new(ConstantFactory {
                value: b"from factory".to_vec(),
            }),
            1,
        )
        .unwrap();

    let value = scheduler.access(0, "k").unwrap();
    similar_asserts::assert_eq!(value, Some(b"from factory".to_vec()));
    assert!(scheduler.is_cached(0, "k").unwrap());

    // Second access is a hit: the factory is not consulted again (we can't
    // observe call count through ConstantFactory directly, so assert the
    // cached bytes are returned unchanged instead).
    let value_again = scheduler.access(0, "k").unwrap();
    similar_asserts::assert_eq!(value_again, Some(b"from factory".to_vec()));
}

#[test]
fn access_on_an_unregistered_bundle_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    let err = scheduler.access(7, "k").unwrap_err();
    assert!(err.to_string().contains("not registered"));
}

#[test]
fn registering_the_same_bundle_twice_fails() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    let factory = Arc::new(ConstantFactory { value: vec![1] });
    scheduler.register(0, factory.clone(), 1).unwrap();
    let err = scheduler.register(0, factory, 1).unwrap_err();
    assert!(err.to_string().contains("already registered"));
}

#[test]
fn a_failing_factory_surfaces_as_an_error_from_access() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    scheduler.register(0, Arc::new(FailingFactory), 1).unwrap();

    let err = scheduler.access(0, "k").unwrap_err();
    assert!(err.to_string().contains("boom"));
    assert!(!scheduler.is_cached(0, "k").unwrap());
}

#[test]
fn not_available_is_a_clean_miss_not_an_error() {
    struct Unavailable;
    impl Factory for Unavailable {
        fn create(&self, _key: &str) -> FactoryResult {
            FactoryResult::NotAvailable
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    scheduler.register(0, Arc::new(Unavailable), 1).unwrap();

    assert_eq!(scheduler.access(0, "k").unwrap(), None);
    assert!(!scheduler.is_cached(0, "k").unwrap());
}

/// Scenario: prefetch dedup — enqueuing the same key repeatedly before it is
/// drained produces exactly one factory call.
#[test]
fn prefetch_requests_for_the_same_key_collapse_into_one_factory_call() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    let factory = Arc::new(CountingFactory {
        calls: AtomicUsize::new(0),
    });
    scheduler.register(0, factory.clone(), 1).unwrap();

    for _ in 0..4 {
        scheduler.prefetch(0, "A");
    }

    // Give the worker a moment to drain and store.
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    assert!(scheduler.is_cached(0, "A").unwrap());
}

/// Scenario: invalidate-during-produce — a concurrent invalidate racing a
/// slow factory must win: the item must not be cached afterward.
#[test]
fn invalidate_during_production_discards_the_result() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = open_scheduler(&dir);
    scheduler
        .register(
            0,
            Arc::new(SlowFactory {
                delay: Duration::from_millis(80),
            }),
            1,
        )
        .unwrap();

    scheduler.prefetch(0, "k");
    std::thread::sleep(Duration::from_millis(15));
    scheduler.invalidate(0, "k").unwrap();

    std::thread::sleep(Duration::from_millis(250));

    assert!(!scheduler.is_cached(0, "k").unwrap());
}

/// Scenario: version mismatch — a host that bumps its version property
/// should clear the cache itself; this just exercises the property API the
/// host relies on to detect that condition.
#[test]
fn version_property_roundtrips_across_a_restart_and_supports_a_clear() {
    let dir = tempfile::tempdir().unwrap();
    {
        let scheduler = open_scheduler(&dir);
        scheduler
            .register(0, Arc::new(ConstantFactory { value: vec![9] }), 1)
            .unwrap();
        scheduler.access(0, "a").unwrap();
        scheduler.set_property("web_viewer_version", "1.0").unwrap();
    }

    let scheduler = open_scheduler(&dir);
    assert_eq!(
        scheduler.lookup_property("web_viewer_version").unwrap(),
        Some("1.0".to_owned())
    );

    // Host observes "1.0" != its own "2.0" and clears.
    scheduler.clear().unwrap();
    scheduler.set_property("web_viewer_version", "2.0").unwrap();
    assert!(!scheduler.is_cached(0, "a").unwrap());
}

#[test]
fn default_config_round_trips_through_open() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = CacheConfig {
        cache_path: dir.path().to_path_buf(),
        ..CacheConfig::default()
    };
    let scheduler = webviewer_cache::open(&config, 32)?;
    scheduler.register(0, Arc::new(ConstantFactory { value: vec![1, 2, 3] }), 1)?;
    assert_eq!(scheduler.access(0, "k")?, Some(vec![1, 2, 3]));
    Ok(())
}

struct FixedSizeFactory {
    bytes_per_key: usize,
}

impl Factory for FixedSizeFactory {
    fn create(&self, key: &str) -> FactoryResult {
        let mut value = vec![0u8; self.bytes_per_key];
        value.extend_from_slice(key.as_bytes());
        FactoryResult::Produced(value)
    }
}

/// `open`'s documented wiring of `cache_size_mib` into a byte quota on
/// `DECODED_IMAGE_BUNDLE`, reachable entirely through the public API.
#[test]
fn open_installs_the_configured_byte_quota_on_the_decoded_image_bundle() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = CacheConfig {
        cache_path: dir.path().to_path_buf(),
        cache_size_mib: 1,
        ..CacheConfig::default()
    };
    let scheduler = webviewer_cache::open(&config, 32)?;
    scheduler.register(
        DECODED_IMAGE_BUNDLE,
        Arc::new(FixedSizeFactory {
            bytes_per_key: 400 * 1024,
        }),
        1,
    )?;

    // Two 400 KiB entries fit under the 1 MiB quota; a third forces eviction
    // of the oldest.
    scheduler.access(DECODED_IMAGE_BUNDLE, "a")?;
    scheduler.access(DECODED_IMAGE_BUNDLE, "b")?;
    scheduler.access(DECODED_IMAGE_BUNDLE, "c")?;

    assert!(!scheduler.is_cached(DECODED_IMAGE_BUNDLE, "a")?);
    assert!(scheduler.is_cached(DECODED_IMAGE_BUNDLE, "b")?);
    assert!(scheduler.is_cached(DECODED_IMAGE_BUNDLE, "c")?);
    Ok(())
}

#[test]
fn set_bundle_quota_and_set_default_quota_are_reachable_from_the_facade() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let scheduler = open_scheduler(&dir);
    scheduler.set_default_quota(BundleQuota {
        max_count: 2,
        max_bytes: 0,
    });
    scheduler.set_bundle_quota(
        0,
        BundleQuota {
            max_count: 2,
            max_bytes: 0,
        },
    )?;
    scheduler.register(0, Arc::new(ConstantFactory { value: vec![1] }), 1)?;

    for i in 0..5 {
        scheduler.access(0, &i.to_string())?;
    }

    let cached_count = (0..5)
        .filter(|i| scheduler.is_cached(0, &i.to_string()).unwrap_or(false))
        .count();
    assert_eq!(cached_count, 2);
    Ok(())
}
