//! Integration tests for the instance registry and the opening sequence.

use covedb_core::{
    ChangeKind, CoreError, CoreResult, DynamicStore, InstanceRegistry, Migrator, ObjectSchema,
};
use covedb_testkit::{person_type, write_seeded_store, ConfigFactory};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

/// Counts how often it runs; otherwise leaves the store untouched.
struct CountingMigrator(AtomicU64);

impl Migrator for CountingMigrator {
    fn migrate(&self, _store: &mut DynamicStore<'_>, _old: u64, _new: u64) -> CoreResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn fifty_threads_share_one_initial_data_run() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let seeds = Arc::new(AtomicU64::new(0));

    let seeds_in_callback = Arc::clone(&seeds);
    let config = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(1)
        .initial_data(Arc::new(move |txn| {
            seeds_in_callback.fetch_add(1, Ordering::SeqCst);
            txn.create_object("Person")?;
            Ok(())
        }))
        .build()
        .unwrap();

    let barrier = Arc::new(Barrier::new(50));
    let mut workers = Vec::new();
    for _ in 0..50 {
        let registry = registry.clone();
        let config = config.clone();
        let barrier = Arc::clone(&barrier);
        workers.push(thread::spawn(move || {
            barrier.wait();
            let db = registry.acquire(&config).unwrap();
            assert_eq!(db.count("Person").unwrap(), 1);
            db.close().unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(seeds.load(Ordering::SeqCst), 1);
    assert_eq!(registry.open_handle_count(&config), 0);
    assert_eq!(registry.active_instance_count(), 0);
}

#[test]
fn fifty_threads_share_one_migration_run() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();

    let db = registry.acquire(&factory.person_config(1)).unwrap();
    db.close().unwrap();

    let migrator = Arc::new(CountingMigrator(AtomicU64::new(0)));
    let upgraded = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(2)
        .migration(Arc::clone(&migrator) as Arc<dyn Migrator>)
        .unwrap()
        .build()
        .unwrap();

    let barrier = Arc::new(Barrier::new(50));
    let mut workers = Vec::new();
    for _ in 0..50 {
        let registry = registry.clone();
        let config = upgraded.clone();
        let barrier = Arc::clone(&barrier);
        workers.push(thread::spawn(move || {
            barrier.wait();
            let db = registry.acquire(&config).unwrap();
            assert_eq!(db.schema_version().unwrap(), 2);
            db.close().unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(migrator.0.load(Ordering::SeqCst), 1);
}

#[test]
fn version_ladder() {
    struct AddDog;
    impl Migrator for AddDog {
        fn migrate(&self, store: &mut DynamicStore<'_>, old: u64, new: u64) -> CoreResult<()> {
            assert_eq!(old, 1);
            assert_eq!(new, 2);
            store.add_type(ObjectSchema::new("Dog"))?;
            Ok(())
        }
    }

    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();

    // Version 1: create and populate.
    let db = registry.acquire(&factory.person_config(1)).unwrap();
    db.write(|txn| {
        txn.create_object("Person")?;
        txn.create_object("Person")?;
        Ok(())
    })
    .unwrap();
    db.close().unwrap();

    // Version 2 with no migrator: refused.
    let bare = factory
        .builder()
        .schema([person_type(), ObjectSchema::new("Dog")])
        .unwrap()
        .schema_version(2)
        .build()
        .unwrap();
    assert!(matches!(
        registry.acquire(&bare),
        Err(CoreError::MigrationNeeded { .. })
    ));

    // Version 2 with a custom migrator: transformed, rows intact.
    let custom = factory
        .builder()
        .schema([person_type(), ObjectSchema::new("Dog")])
        .unwrap()
        .schema_version(2)
        .migration(Arc::new(AddDog))
        .unwrap()
        .build()
        .unwrap();
    let db = registry.acquire(&custom).unwrap();
    assert_eq!(db.schema_version().unwrap(), 2);
    assert_eq!(db.count("Person").unwrap(), 2);
    assert_eq!(db.count("Dog").unwrap(), 0);
    db.close().unwrap();

    // Version 3 with delete-if-needed: cleared and recreated.
    let cleared = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(3)
        .delete_if_migration_needed()
        .unwrap()
        .build()
        .unwrap();
    let db = registry.acquire(&cleared).unwrap();
    assert_eq!(db.schema_version().unwrap(), 3);
    assert_eq!(db.count("Person").unwrap(), 0);
    db.close().unwrap();
}

#[test]
fn noop_migrator_carries_version_bump() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();

    let db = registry.acquire(&factory.person_config(1)).unwrap();
    db.write(|txn| {
        txn.create_object("Person")?;
        Ok(())
    })
    .unwrap();
    db.close().unwrap();

    let migrator = Arc::new(CountingMigrator(AtomicU64::new(0)));
    let bumped = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(2)
        .migration(Arc::clone(&migrator) as Arc<dyn Migrator>)
        .unwrap()
        .build()
        .unwrap();

    let db = registry.acquire(&bumped).unwrap();
    assert_eq!(db.schema_version().unwrap(), 2);
    assert_eq!(db.count("Person").unwrap(), 1);
    db.close().unwrap();
    assert_eq!(migrator.0.load(Ordering::SeqCst), 1);
}

#[test]
fn equal_version_structural_change_needs_migration() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();

    let db = registry.acquire(&factory.person_config(1)).unwrap();
    db.close().unwrap();

    let widened = factory
        .builder()
        .schema([person_type(), ObjectSchema::new("Dog")])
        .unwrap()
        .schema_version(1)
        .build()
        .unwrap();
    assert!(matches!(
        registry.acquire(&widened),
        Err(CoreError::MigrationNeeded { .. })
    ));
}

#[test]
fn schema_conflict_on_cached_instance() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();

    let db = registry.acquire(&factory.person_config(1)).unwrap();

    let widened = factory
        .builder()
        .schema([person_type(), ObjectSchema::new("Dog")])
        .unwrap()
        .schema_version(1)
        .build()
        .unwrap();
    match registry.acquire(&widened) {
        Err(CoreError::IncompatibleConfiguration { field, .. }) => assert_eq!(field, "schema"),
        other => panic!("expected schema conflict, got {other:?}"),
    }

    db.close().unwrap();
}

#[test]
fn durability_exclusivity_both_orders() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let on_disk = factory.default_config();
    let in_memory = factory.builder().in_memory().build().unwrap();

    let db = registry.acquire(&on_disk).unwrap();
    assert!(matches!(
        registry.acquire(&in_memory),
        Err(CoreError::IncompatibleConfiguration { .. })
    ));
    db.close().unwrap();

    let db = registry.acquire(&in_memory).unwrap();
    assert!(matches!(
        registry.acquire(&on_disk),
        Err(CoreError::IncompatibleConfiguration { .. })
    ));
    db.close().unwrap();
}

#[test]
fn reacquire_preserves_state_without_reseeding() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let seeds = Arc::new(AtomicU64::new(0));

    let seeds_in_callback = Arc::clone(&seeds);
    let config = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(4)
        .initial_data(Arc::new(move |txn| {
            seeds_in_callback.fetch_add(1, Ordering::SeqCst);
            txn.create_object("Person")?;
            Ok(())
        }))
        .build()
        .unwrap();

    let db = registry.acquire(&config).unwrap();
    db.write(|txn| {
        txn.create_object("Person")?;
        Ok(())
    })
    .unwrap();
    db.close().unwrap();

    let db = registry.acquire(&config).unwrap();
    assert_eq!(db.schema_version().unwrap(), 4);
    assert_eq!(db.count("Person").unwrap(), 2);
    assert_eq!(seeds.load(Ordering::SeqCst), 1);
    db.close().unwrap();
}

#[test]
fn asset_seeded_open_skips_initial_data() {
    let registry = InstanceRegistry::new();
    let asset_factory = ConfigFactory::new();
    let factory = ConfigFactory::new();
    let seeds = Arc::new(AtomicU64::new(0));

    let asset = write_seeded_store(asset_factory.root(), "seed.cove", 1, 3);

    let seeds_in_callback = Arc::clone(&seeds);
    let config = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(1)
        .asset_file(&asset)
        .unwrap()
        .initial_data(Arc::new(move |txn| {
            seeds_in_callback.fetch_add(1, Ordering::SeqCst);
            txn.create_object("Person")?;
            Ok(())
        }))
        .build()
        .unwrap();

    let db = registry.acquire(&config).unwrap();
    assert_eq!(db.count("Person").unwrap(), 3);
    assert_eq!(seeds.load(Ordering::SeqCst), 0);
    db.close().unwrap();
}

#[test]
fn missing_asset_reports_file_access() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let config = factory
        .builder()
        .asset_file(factory.root().join("nowhere.cove"))
        .unwrap()
        .build()
        .unwrap();

    assert!(matches!(
        registry.acquire(&config),
        Err(CoreError::FileAccess { .. })
    ));
    assert!(!config.store_path().exists());
}

#[test]
fn feed_delivers_commits_in_order() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let config = factory.person_config(1);

    let writer = registry.acquire(&config).unwrap();
    let watcher = registry.acquire(&config).unwrap();
    let events = watcher.subscribe().unwrap();

    writer
        .write(|txn| {
            txn.create_object("Person")?;
            txn.create_object("Person")?;
            Ok(())
        })
        .unwrap();
    writer
        .write(|txn| {
            txn.delete_all("Person")?;
            Ok(())
        })
        .unwrap();

    let received: Vec<_> = (0..4).map(|_| events.try_recv().unwrap()).collect();
    assert!(events.try_recv().is_err());

    assert!(received.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert_eq!(received[0].kind, ChangeKind::Created);
    assert_eq!(received[1].kind, ChangeKind::Created);
    assert_eq!(received[2].kind, ChangeKind::Deleted);
    assert_eq!(received[3].kind, ChangeKind::Deleted);

    writer.close().unwrap();
    watcher.close().unwrap();
}

#[test]
fn failed_write_stages_nothing_and_publishes_nothing() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let config = factory.person_config(1);

    let db = registry.acquire(&config).unwrap();
    let events = db.subscribe().unwrap();

    let result: CoreResult<()> = db.write(|txn| {
        txn.create_object("Person")?;
        Err(CoreError::invalid_state("change of mind"))
    });
    assert!(result.is_err());
    assert_eq!(db.count("Person").unwrap(), 0);
    assert!(events.try_recv().is_err());

    db.close().unwrap();
}

#[test]
fn double_close_is_a_logic_error() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let config = factory.default_config();

    let db = registry.acquire(&config).unwrap();
    db.close().unwrap();
    assert!(matches!(db.close(), Err(CoreError::DatabaseClosed)));
    assert!(db.is_closed());

    assert!(matches!(db.is_empty(), Err(CoreError::DatabaseClosed)));
    assert!(matches!(
        db.write(|_txn| Ok(())),
        Err(CoreError::DatabaseClosed)
    ));
    assert!(matches!(db.subscribe(), Err(CoreError::DatabaseClosed)));
}

#[test]
fn dropping_a_handle_releases_it() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    let config = factory.default_config();

    let db = registry.acquire(&config).unwrap();
    assert_eq!(registry.open_handle_count(&config), 1);
    drop(db);
    assert_eq!(registry.open_handle_count(&config), 0);

    let db = registry.acquire(&config).unwrap();
    db.close().unwrap();
}

#[test]
fn advisory_flags_do_not_conflict_on_cached_instance() {
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();

    let strict = factory.person_config(1);
    let relaxed = factory
        .builder()
        .schema([person_type()])
        .unwrap()
        .schema_version(1)
        .allow_writes_on_main_thread(true)
        .build()
        .unwrap();

    let a = registry.acquire(&strict).unwrap();
    let b = registry.acquire(&relaxed).unwrap();
    assert_eq!(registry.open_handle_count(&strict), 2);

    a.close().unwrap();
    b.close().unwrap();
}

#[test]
fn distinct_identities_open_concurrently() {
    let registry = InstanceRegistry::new();
    let factory = Arc::new(ConfigFactory::new());

    let barrier = Arc::new(Barrier::new(8));
    let mut workers = Vec::new();
    for i in 0..8 {
        let registry = registry.clone();
        let factory = Arc::clone(&factory);
        let barrier = Arc::clone(&barrier);
        workers.push(thread::spawn(move || {
            barrier.wait();
            let config = factory
                .builder()
                .name(format!("store_{i}.cove"))
                .unwrap()
                .schema([person_type()])
                .unwrap()
                .schema_version(1)
                .build()
                .unwrap();
            let db = registry.acquire(&config).unwrap();
            db.write(|txn| {
                txn.create_object("Person")?;
                Ok(())
            })
            .unwrap();
            assert_eq!(db.count("Person").unwrap(), 1);
            db.close().unwrap();
        }));
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(registry.active_instance_count(), 0);
}
