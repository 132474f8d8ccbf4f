//! Instance registry and the opening sequence.
//!
//! One process-wide registry coordinates every open store. Each store
//! identity (canonical path plus durability) owns a slot; the slot's lock is
//! held for the whole opening sequence, so concurrent `acquire` calls on the
//! same identity serialize and at most one of them pays for creation,
//! seeding, and migration. Distinct identities never contend beyond the
//! short map lookup that finds their slot.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::handle::{Database, InstanceInner, WriteTxn};
use crate::migration::DynamicStore;
use crate::store::{self, StoreFile};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out [`Database`] handles and tracks every open instance.
///
/// Cloning is cheap; clones share the same state. A registry is typically
/// process-wide, created once and passed to whatever opens stores.
#[derive(Clone, Default)]
pub struct InstanceRegistry {
    shared: Arc<RegistryShared>,
}

impl InstanceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a handle on the store the configuration describes.
    ///
    /// When the identity is already open, the configuration is checked
    /// against the one that opened it and the existing instance is shared.
    /// Otherwise this call runs the full opening sequence: create or load
    /// the file, seed it, compact it, and reconcile schema versions. A
    /// failed opening leaves no trace, neither a registry entry nor a
    /// partial file.
    ///
    /// # Errors
    ///
    /// `InvalidState` for an unclosed link target in the declared schema,
    /// `IncompatibleConfiguration` when the identity is open under a
    /// conflicting configuration, `MigrationNeeded`, `InvalidArgument`,
    /// `FileAccess`, and `InvalidStore` per the opening sequence.
    pub fn acquire(&self, config: &Config) -> CoreResult<Database> {
        config.schema().verify_closed()?;

        let slot = self.shared.slot_for(config.store_path());
        let mut state = slot.state.lock();

        if let Some(entry) = state.open.as_mut() {
            config.verify_compatible(&entry.inner.config)?;
            entry.handles += 1;
            debug!(
                path = %config.store_path().display(),
                handles = entry.handles,
                "sharing open store instance"
            );
            return Ok(Database::new(
                Arc::clone(&self.shared),
                Arc::clone(&slot),
                Arc::clone(&entry.inner),
            ));
        }

        let store = match open_store(config) {
            Ok(store) => store,
            Err(err) => {
                drop(state);
                self.shared.purge_if_idle(&slot);
                return Err(err);
            }
        };
        let inner = Arc::new(InstanceInner::new(config.clone(), store));
        state.open = Some(OpenEntry {
            inner: Arc::clone(&inner),
            handles: 1,
        });
        debug!(path = %config.store_path().display(), "opened store instance");
        Ok(Database::new(
            Arc::clone(&self.shared),
            Arc::clone(&slot),
            inner,
        ))
    }

    /// Opens a handle using the process default configuration.
    ///
    /// # Errors
    ///
    /// `InvalidState` when no default configuration is set, otherwise as
    /// [`acquire`](Self::acquire).
    pub fn acquire_default(&self) -> CoreResult<Database> {
        let config = self
            .shared
            .default_config
            .read()
            .clone()
            .ok_or_else(|| CoreError::invalid_state("no default configuration is set"))?;
        self.acquire(&config)
    }

    /// Installs the process default configuration.
    pub fn set_default_config(&self, config: Config) {
        *self.shared.default_config.write() = Some(config);
    }

    /// The process default configuration, when set.
    #[must_use]
    pub fn default_config(&self) -> Option<Config> {
        self.shared.default_config.read().clone()
    }

    /// Clears the process default configuration.
    pub fn remove_default_config(&self) {
        *self.shared.default_config.write() = None;
    }

    /// Number of live handles on the configuration's identity.
    #[must_use]
    pub fn open_handle_count(&self, config: &Config) -> usize {
        let Some(slot) = self.shared.peek_slot(config.store_path()) else {
            return 0;
        };
        let state = slot.state.lock();
        state.open.as_ref().map_or(0, |entry| entry.handles as usize)
    }

    /// Number of distinct store identities currently open.
    #[must_use]
    pub fn active_instance_count(&self) -> usize {
        let slots = self.shared.slots.lock();
        slots
            .values()
            .filter(|slot| slot.state.lock().open.is_some())
            .count()
    }

    /// Deletes the store file behind a configuration.
    ///
    /// Returns whether a file existed. In-memory identities have no file;
    /// deleting one returns `Ok(false)`.
    ///
    /// # Errors
    ///
    /// `InvalidState` while any handle on the identity is open,
    /// `FileAccess` when removal fails.
    pub fn delete_store(&self, config: &Config) -> CoreResult<bool> {
        let slot = self.shared.slot_for(config.store_path());
        let state = slot.state.lock();
        if let Some(entry) = state.open.as_ref() {
            return Err(CoreError::invalid_state(format!(
                "cannot delete '{}': {} handle(s) still open",
                config.store_path().display(),
                entry.handles
            )));
        }
        let result = if config.is_in_memory() {
            Ok(false)
        } else {
            store::delete_file(config.store_path())
        };
        drop(state);
        self.shared.purge_if_idle(&slot);

        if matches!(result, Ok(true)) {
            info!(path = %config.store_path().display(), "deleted store file");
        }
        result
    }
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("active_instances", &self.active_instance_count())
            .finish_non_exhaustive()
    }
}

/// State shared by a registry and every handle it produced.
#[derive(Default)]
pub(crate) struct RegistryShared {
    slots: Mutex<HashMap<PathBuf, Arc<PathSlot>>>,
    default_config: RwLock<Option<Config>>,
}

impl RegistryShared {
    fn slot_for(&self, path: &Path) -> Arc<PathSlot> {
        let mut slots = self.slots.lock();
        match slots.get(path) {
            Some(slot) => Arc::clone(slot),
            None => {
                let slot = Arc::new(PathSlot {
                    path: path.to_path_buf(),
                    state: Mutex::new(SlotState { open: None }),
                });
                slots.insert(path.to_path_buf(), Arc::clone(&slot));
                slot
            }
        }
    }

    fn peek_slot(&self, path: &Path) -> Option<Arc<PathSlot>> {
        self.slots.lock().get(path).map(Arc::clone)
    }

    /// Drops one handle's refcount; tears the instance down on the last.
    ///
    /// Called from `Database::close` and `Drop`. The slot lock is released
    /// before the map lock is taken, never the other way around.
    pub(crate) fn release(&self, slot: &Arc<PathSlot>) {
        let mut state = slot.state.lock();
        let Some(entry) = state.open.as_mut() else {
            return;
        };
        entry.handles -= 1;
        if entry.handles > 0 {
            debug!(
                path = %slot.path.display(),
                handles = entry.handles,
                "released store handle"
            );
            return;
        }
        // Last handle. In-memory contents die with the entry.
        state.open = None;
        debug!(path = %slot.path.display(), "closed store instance");
        drop(state);

        self.purge_if_idle(slot);
    }

    /// Removes a slot with nothing open and nobody waiting from the map.
    fn purge_if_idle(&self, slot: &Arc<PathSlot>) {
        let mut slots = self.slots.lock();
        if let Some(mapped) = slots.get(&slot.path) {
            // Two strong refs mean the map and the caller; nobody else is
            // holding or waiting on this slot.
            if Arc::ptr_eq(mapped, slot) && Arc::strong_count(slot) == 2 {
                slots.remove(&slot.path);
            }
        }
    }
}

/// One identity's slot. Its lock serializes the opening sequence.
pub(crate) struct PathSlot {
    path: PathBuf,
    pub(crate) state: Mutex<SlotState>,
}

pub(crate) struct SlotState {
    pub(crate) open: Option<OpenEntry>,
}

pub(crate) struct OpenEntry {
    pub(crate) inner: Arc<InstanceInner>,
    pub(crate) handles: u64,
}

/// Runs the opening sequence for an identity that is not currently open.
fn open_store(config: &Config) -> CoreResult<StoreFile> {
    if config.is_in_memory() {
        let mut fresh = StoreFile::new(config.schema().clone(), config.schema_version());
        run_initial_data(config, &mut fresh)?;
        debug!(path = %config.store_path().display(), "created in-memory store");
        return Ok(fresh);
    }

    let path = config.store_path();
    if !path.exists() {
        if let Some(asset) = config.asset_file() {
            store::copy_asset(asset, path)?;
            info!(
                path = %path.display(),
                asset = %asset.display(),
                "seeded store from asset file"
            );
        } else if config.is_read_only() {
            return Err(CoreError::file_access(
                path,
                "store file does not exist and the configuration is read-only",
            ));
        } else {
            return create_new(config);
        }
    }

    let loaded = StoreFile::load(path)?;
    maybe_compact(config, &loaded)?;
    reconcile_versions(config, loaded)
}

/// Creates a genuinely new on-disk store, seeding it with initial data.
///
/// Any failure after the file appears removes it again; the caller sees an
/// error and the path stays absent.
fn create_new(config: &Config) -> CoreResult<StoreFile> {
    let path = config.store_path();
    let mut fresh = StoreFile::new(config.schema().clone(), config.schema_version());
    fresh.save(path)?;
    info!(
        path = %path.display(),
        schema_version = config.schema_version(),
        "created store file"
    );

    if config.initial_data().is_some() {
        let seeded = run_initial_data(config, &mut fresh).and_then(|()| fresh.save(path));
        if let Err(e) = seeded {
            let _ = store::delete_file(path);
            return Err(e);
        }
    }
    Ok(fresh)
}

/// Applies the one-shot initial data callback to a brand-new store.
fn run_initial_data(config: &Config, fresh: &mut StoreFile) -> CoreResult<()> {
    let Some(callback) = config.initial_data() else {
        return Ok(());
    };
    let mut staged = fresh.clone();
    let mut txn = WriteTxn::new(&mut staged);
    callback(&mut txn)?;
    // No instance exists yet, so there is nobody to publish events to.
    let _ = txn.into_events();
    *fresh = staged;
    Ok(())
}

/// Consults the compaction callback for a pre-existing file.
fn maybe_compact(config: &Config, loaded: &StoreFile) -> CoreResult<()> {
    let Some(callback) = config.compact_on_launch() else {
        return Ok(());
    };
    let path = config.store_path();
    let total_bytes = store::file_size(path)?;
    let used_bytes = loaded.encode().len() as u64;
    if callback.should_compact(total_bytes, used_bytes) {
        loaded.save(path)?;
        info!(
            path = %path.display(),
            total_bytes,
            used_bytes,
            "compacted store on launch"
        );
    }
    Ok(())
}

/// Brings a loaded store in line with the configured schema version.
fn reconcile_versions(config: &Config, loaded: StoreFile) -> CoreResult<StoreFile> {
    let path = config.store_path();
    let on_disk = loaded.schema_version();
    let configured = config.schema_version();

    if on_disk > configured {
        return Err(CoreError::invalid_argument(format!(
            "store is at schema version {on_disk}, cannot downgrade to {configured}"
        )));
    }

    let schema_matches = config.schema().is_empty() || loaded.schema() == config.schema();
    if on_disk == configured && schema_matches {
        return Ok(loaded);
    }

    if config.delete_if_migration_needed() {
        info!(
            path = %path.display(),
            on_disk,
            configured,
            "clearing store instead of migrating"
        );
        store::delete_file(path)?;
        return create_new(config);
    }

    if config.is_read_only() {
        return Err(CoreError::migration_needed(format!(
            "store at '{}' needs migration but the configuration is read-only",
            path.display()
        )));
    }

    if on_disk == configured {
        return Err(CoreError::migration_needed(format!(
            "declared object types do not match the store at schema version {on_disk}"
        )));
    }

    let Some(migrator) = config.migration() else {
        return Err(CoreError::migration_needed(format!(
            "store is at schema version {on_disk}, configuration requires {configured}"
        )));
    };

    let mut staged = loaded.clone();
    let mut view = DynamicStore::new(&mut staged);
    migrator.migrate(&mut view, on_disk, configured)?;
    drop(view);
    staged.set_schema_version(configured);

    if !config.schema().is_empty() && staged.schema() != config.schema() {
        return Err(CoreError::migration_needed(
            "migration did not produce the declared object types",
        ));
    }

    staged.save(path)?;
    info!(path = %path.display(), on_disk, configured, "migrated store");
    Ok(staged)
}
