//! Integration tests for the cache tiers behind a broker
//!
//! Covers identity uniqueness, entry expiry, simulated memory pressure,
//! package exclusion and the per-broker, per-class and soft LRU tiers.

#[path = "testutils/mod.rs"]
mod testutils;

use brokercache::cache::cache_config::{IMPL_DEFAULT, IMPL_PER_BROKER, IMPL_PER_CLASS, IMPL_SOFT_LRU};
use brokercache::{CacheDescriptor, ClassName, ObjectCache, ObjectRef, PersistentObject, TierConfig, Value};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use testutils::test_fixture::{FixtureOptions, TestFixture};

#[test]
fn test_same_identity_yields_same_instance() {
    let fixture = TestFixture::new().expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let broker = fixture.broker();
    let cyd = fixture.identity("people.Person", 3);

    let first = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    let second = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(fixture.store.materialize_calls(), 1);

    // The default tier's table is shared by every broker of the factory
    let other = fixture.broker();
    let third = other.get_object_by_identity(&cyd).unwrap().unwrap();
    assert!(third.ptr_eq(&first));
    assert_eq!(fixture.store.materialize_calls(), 1);
}

#[test]
fn test_missing_row_is_not_cached() {
    let fixture = TestFixture::new().expect("Failed to create test fixture");
    let broker = fixture.broker();
    let nobody = fixture.identity("people.Person", 99);

    assert!(broker.get_object_by_identity(&nobody).unwrap().is_none());
    assert!(broker.get_object_by_identity(&nobody).unwrap().is_none());
    assert_eq!(fixture.store.materialize_calls(), 2);
}

#[test]
fn test_expired_entry_is_fetched_again() {
    let options = FixtureOptions::with_cache(
        IMPL_DEFAULT,
        TierConfig {
            timeout_secs: 0,
            ..TierConfig::default()
        },
    );
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let broker = fixture.broker();
    let cyd = fixture.identity("people.Person", 3);

    let first = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    thread::sleep(Duration::from_millis(5));
    let second = broker.get_object_by_identity(&cyd).unwrap().unwrap();

    assert!(!first.ptr_eq(&second));
    assert_eq!(first.read().field("name"), second.read().field("name"));
    assert_eq!(fixture.store.materialize_calls(), 2);
}

#[test]
fn test_negative_timeout_never_expires() {
    let options = FixtureOptions::with_cache(
        IMPL_DEFAULT,
        TierConfig {
            timeout_secs: -1,
            ..TierConfig::default()
        },
    );
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let broker = fixture.broker();
    let cyd = fixture.identity("people.Person", 3);

    let first = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    thread::sleep(Duration::from_millis(5));
    let second = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    assert!(first.ptr_eq(&second));
}

#[test]
fn test_memory_pressure_reclaims_only_unheld_objects() {
    let fixture = TestFixture::new().expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let broker = fixture.broker();
    let cyd = fixture.identity("people.Person", 3);

    let held = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    fixture.factory.registry().memory_pressure();
    assert!(broker
        .get_object_by_identity(&cyd)
        .unwrap()
        .unwrap()
        .ptr_eq(&held));
    assert_eq!(fixture.store.materialize_calls(), 1);

    drop(held);
    assert!(fixture.factory.registry().memory_pressure() >= 1);
    broker.get_object_by_identity(&cyd).unwrap().unwrap();
    assert_eq!(fixture.store.materialize_calls(), 2);
}

#[test]
fn test_hard_references_survive_memory_pressure() {
    let options = FixtureOptions::with_cache(
        IMPL_DEFAULT,
        TierConfig {
            use_soft_references: false,
            ..TierConfig::default()
        },
    );
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let broker = fixture.broker();
    let cyd = fixture.identity("people.Person", 3);

    drop(broker.get_object_by_identity(&cyd).unwrap());
    fixture.factory.registry().memory_pressure();
    broker.get_object_by_identity(&cyd).unwrap().unwrap();
    assert_eq!(fixture.store.materialize_calls(), 1);
}

#[test]
fn test_excluded_package_is_never_cached() {
    let mut options = FixtureOptions::default();
    options.config.cache.exclude_packages = vec!["values".to_string()];
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_currencies().unwrap();
    fixture.seed_people().unwrap();
    let broker = fixture.broker();

    let euro = broker.identity("values.Currency", vec![Value::Int(978)]).unwrap();
    let first = broker.get_object_by_identity(&euro).unwrap().unwrap();
    let second = broker.get_object_by_identity(&euro).unwrap().unwrap();
    assert!(!first.ptr_eq(&second));
    assert_eq!(fixture.store.materialize_calls(), 2);
    assert!(broker.cache().real().is_excluded(&ClassName::new("values.Currency")));

    // Other packages still go through the connection's tier
    let cyd = fixture.identity("people.Person", 3);
    broker.get_object_by_identity(&cyd).unwrap();
    broker.get_object_by_identity(&cyd).unwrap();
    assert_eq!(fixture.store.materialize_calls(), 3);
}

#[test]
fn test_per_broker_tier_is_private_and_cleared_on_close() {
    let options = FixtureOptions::with_cache(IMPL_PER_BROKER, TierConfig::default());
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let cyd = fixture.identity("people.Person", 3);

    let first = fixture.broker();
    let second = fixture.broker();
    let a = first.get_object_by_identity(&cyd).unwrap().unwrap();
    let b = second.get_object_by_identity(&cyd).unwrap().unwrap();
    assert!(!a.ptr_eq(&b));
    assert!(first.get_object_by_identity(&cyd).unwrap().unwrap().ptr_eq(&a));

    let tier = first
        .cache()
        .real()
        .cache_for(&ClassName::new("people.Person"))
        .unwrap();
    assert!(tier.lookup(&cyd).is_some());
    first.close().unwrap();
    assert!(tier.lookup(&cyd).is_none());

    // The other broker keeps its own entries
    assert!(second.get_object_by_identity(&cyd).unwrap().unwrap().ptr_eq(&b));
}

#[test]
fn test_per_class_tier_keys_by_real_class() {
    let options = FixtureOptions {
        article_cache: Some(CacheDescriptor::new(IMPL_PER_CLASS)),
        ..FixtureOptions::default()
    };
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_shop().unwrap();
    let broker = fixture.broker();

    // Asking for an Article finds the Book row and caches it as a Book
    let as_article = fixture.identity("shop.Article", 12);
    let book = broker.get_object_by_identity(&as_article).unwrap().unwrap();
    assert_eq!(book.class(), ClassName::new("shop.Book"));
    assert!(fixture
        .factory
        .registry()
        .table_names()
        .contains(&"default:per-class:shop.Book".to_string()));

    let as_book = fixture.identity("shop.Book", 12);
    assert!(broker.get_object_by_identity(&as_book).unwrap().unwrap().ptr_eq(&book));
    assert_eq!(fixture.store.materialize_calls(), 1);

    // The superclass identity finds the entry cached under the real class
    let again = broker.get_object_by_identity(&as_article).unwrap().unwrap();
    assert!(again.ptr_eq(&book));
    assert_eq!(fixture.store.materialize_calls(), 1);
}

#[test]
fn test_superclass_reads_hit_the_cache() {
    let fixture = TestFixture::new().expect("Failed to create test fixture");
    fixture.seed_shop().unwrap();
    let broker = fixture.broker();
    let as_article = fixture.identity("shop.Article", 12);

    let book = broker.get_object_by_identity(&as_article).unwrap().unwrap();
    for _ in 0..3 {
        let again = broker.get_object_by_identity(&as_article).unwrap().unwrap();
        assert!(again.ptr_eq(&book));
    }
    let other = fixture.broker();
    assert!(other.get_object_by_identity(&as_article).unwrap().unwrap().ptr_eq(&book));
    assert_eq!(fixture.store.materialize_calls(), 1);

    // Plain articles are still cached under their own class
    let pen = fixture.identity("shop.Article", 10);
    broker.get_object_by_identity(&pen).unwrap().unwrap();
    broker.get_object_by_identity(&pen).unwrap().unwrap();
    assert_eq!(fixture.store.materialize_calls(), 2);
}

#[test]
fn test_huge_timeout_never_expires() {
    let options = FixtureOptions::with_cache(
        IMPL_DEFAULT,
        TierConfig {
            timeout_secs: i64::MAX,
            ..TierConfig::default()
        },
    );
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_people().unwrap();
    let broker = fixture.broker();
    let cyd = fixture.identity("people.Person", 3);

    let first = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    let second = broker.get_object_by_identity(&cyd).unwrap().unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(fixture.store.materialize_calls(), 1);
}

fn race_cache_if_new(implementation: &str) {
    const THREADS: usize = 8;
    let fixture = TestFixture::with_options(FixtureOptions::with_cache(implementation, TierConfig::default()))
        .expect("Failed to create test fixture");
    let broker = fixture.broker();
    let person = ClassName::new("people.Person");
    let tier = broker.cache().real().cache_for(&person).unwrap();
    let cyd = fixture.identity("people.Person", 3);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let tier = Arc::clone(&tier);
            let cyd = cyd.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let candidate = ObjectRef::new(PersistentObject::new("people.Person"));
                barrier.wait();
                let inserted = tier.cache_if_new(&cyd, &candidate);
                (inserted, candidate)
            })
        })
        .collect();
    let results: Vec<(bool, ObjectRef)> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<&ObjectRef> = results
        .iter()
        .filter(|(inserted, _)| *inserted)
        .map(|(_, candidate)| candidate)
        .collect();
    assert_eq!(winners.len(), 1, "{} tier let several inserts through", implementation);
    assert!(tier.lookup(&cyd).unwrap().ptr_eq(winners[0]));
}

#[test]
fn test_concurrent_cache_if_new_inserts_once() {
    race_cache_if_new(IMPL_DEFAULT);
    race_cache_if_new(IMPL_SOFT_LRU);
}

#[test]
fn test_concurrent_tier_resolution_builds_one_tier() {
    const THREADS: usize = 8;
    let fixture = TestFixture::new().expect("Failed to create test fixture");
    let broker = fixture.broker();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let broker = Arc::clone(&broker);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tier = broker
                    .cache()
                    .real()
                    .cache_for(&ClassName::new("people.Person"))
                    .unwrap();
                Arc::as_ptr(&tier) as *const () as usize
            })
        })
        .collect();
    let tiers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(tiers.iter().all(|tier| *tier == tiers[0]));
    assert_eq!(broker.cache().real().tier_count(), 1);
}

#[test]
fn test_soft_lru_pins_recent_entries() {
    let options = FixtureOptions::with_cache(
        IMPL_SOFT_LRU,
        TierConfig {
            max_entries: 1,
            ..TierConfig::default()
        },
    );
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_shop().unwrap();
    let broker = fixture.broker();
    let pen = fixture.identity("shop.Article", 10);
    let ink = fixture.identity("shop.Article", 11);

    drop(broker.get_object_by_identity(&pen).unwrap());
    drop(broker.get_object_by_identity(&ink).unwrap());
    assert_eq!(fixture.store.materialize_calls(), 2);

    // Only the most recent entry is pinned by the hard queue
    fixture.factory.registry().memory_pressure();
    broker.get_object_by_identity(&ink).unwrap().unwrap();
    assert_eq!(fixture.store.materialize_calls(), 2);
    broker.get_object_by_identity(&pen).unwrap().unwrap();
    assert_eq!(fixture.store.materialize_calls(), 3);
}

#[test]
fn test_descriptor_based_caches_share_tiers() {
    let shared = CacheDescriptor::new(IMPL_DEFAULT);
    let mut options = FixtureOptions {
        article_cache: Some(shared.clone()),
        connection_cache: shared,
        ..FixtureOptions::default()
    };
    options.config.cache.descriptor_based_caches = true;
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_shop().unwrap();
    fixture.seed_people().unwrap();

    let broker = fixture.broker();
    broker.get_object_by_identity(&fixture.identity("shop.Article", 10)).unwrap();
    broker.get_object_by_identity(&fixture.identity("people.Person", 3)).unwrap();
    assert_eq!(broker.cache().real().tier_count(), 1);
}

#[test]
fn test_class_and_connection_tiers_are_separate_by_default() {
    let options = FixtureOptions {
        article_cache: Some(CacheDescriptor::new(IMPL_DEFAULT)),
        ..FixtureOptions::default()
    };
    let fixture = TestFixture::with_options(options).expect("Failed to create test fixture");
    fixture.seed_shop().unwrap();
    fixture.seed_people().unwrap();

    let broker = fixture.broker();
    broker.get_object_by_identity(&fixture.identity("shop.Article", 10)).unwrap();
    broker.get_object_by_identity(&fixture.identity("people.Person", 3)).unwrap();
    assert_eq!(broker.cache().real().tier_count(), 2);
}
