//! Database handle and write transactions.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::feed::{ChangeEvent, ChangeFeed, ChangeKind};
use crate::object::ObjectId;
use crate::registry::{PathSlot, RegistryShared};
use crate::schema::Schema;
use crate::store::StoreFile;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// The open instance behind every handle on one store identity.
///
/// Owned by the registry entry; handles share it through an `Arc`. The
/// committed [`StoreFile`] only ever changes under the write lock, and for
/// on-disk stores only after the new contents reached the file.
pub(crate) struct InstanceInner {
    pub(crate) config: Config,
    pub(crate) store: RwLock<StoreFile>,
    pub(crate) feed: ChangeFeed,
    sequence: AtomicU64,
}

impl InstanceInner {
    pub(crate) fn new(config: Config, store: StoreFile) -> Self {
        let feed = config.feed_factory().create_feed();
        Self {
            config,
            store: RwLock::new(store),
            feed,
            sequence: AtomicU64::new(0),
        }
    }
}

/// A refcounted handle on an open store.
///
/// Returned by [`InstanceRegistry::acquire`](crate::InstanceRegistry::acquire).
/// All handles on the same identity observe the same contents; the instance
/// stays open until the last handle is closed or dropped.
///
/// ```rust,ignore
/// use covedb_core::{Config, InstanceRegistry};
///
/// let registry = InstanceRegistry::new();
/// let config = Config::builder().directory("/var/lib/app")?.build()?;
///
/// let db = registry.acquire(&config)?;
/// db.write(|txn| {
///     txn.create_object("Person")?;
///     Ok(())
/// })?;
/// db.close()?;
/// ```
pub struct Database {
    registry: Arc<RegistryShared>,
    slot: Arc<PathSlot>,
    inner: Arc<InstanceInner>,
    closed: AtomicBool,
}

impl Database {
    pub(crate) fn new(
        registry: Arc<RegistryShared>,
        slot: Arc<PathSlot>,
        inner: Arc<InstanceInner>,
    ) -> Self {
        Self {
            registry,
            slot,
            inner,
            closed: AtomicBool::new(false),
        }
    }

    /// The configuration this handle was acquired with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Canonical path of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.config.store_path()
    }

    /// True once this handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current schema version of the open store.
    ///
    /// After a migration this is the configured version, not the one the
    /// file was found at.
    pub fn schema_version(&self) -> CoreResult<u64> {
        self.ensure_open()?;
        Ok(self.inner.store.read().schema_version())
    }

    /// Snapshot of the store's object types.
    pub fn schema(&self) -> CoreResult<Schema> {
        self.ensure_open()?;
        Ok(self.inner.store.read().schema().clone())
    }

    /// True when no type holds any rows.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.ensure_open()?;
        Ok(self.inner.store.read().is_empty())
    }

    /// Number of rows of one type.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown or embedded type.
    pub fn count(&self, type_name: &str) -> CoreResult<u64> {
        self.ensure_open()?;
        self.inner.store.read().count(type_name)
    }

    /// Runs a write transaction.
    ///
    /// The closure works on a staged copy of the store. When it returns
    /// `Ok`, the copy is persisted (for on-disk stores), installed as the
    /// committed state, and its change events published. When it returns
    /// `Err`, the staged copy is discarded and the store is untouched.
    ///
    /// # Errors
    ///
    /// `InvalidState` on a read-only handle, `DatabaseClosed` after
    /// `close`, and whatever the closure or the persist step returns.
    pub fn write<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> CoreResult<T>,
    {
        self.ensure_open()?;
        if self.inner.config.is_read_only() {
            return Err(CoreError::invalid_state(
                "cannot start a write transaction on a read-only store",
            ));
        }

        let mut committed = self.inner.store.write();
        let mut staged = committed.clone();
        let mut txn = WriteTxn::new(&mut staged);
        let value = work(&mut txn)?;
        let mut events = txn.into_events();

        if !self.inner.config.is_in_memory() {
            staged.save(self.inner.config.store_path())?;
        }
        for event in &mut events {
            event.sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        }
        *committed = staged;
        // Published under the write lock so subscribers see commit order.
        self.inner.feed.publish(&events);
        Ok(value)
    }

    /// Subscribes to change events from this instance.
    ///
    /// Events committed before the subscription are not replayed.
    pub fn subscribe(&self) -> CoreResult<Receiver<ChangeEvent>> {
        self.ensure_open()?;
        Ok(self.inner.feed.subscribe())
    }

    /// Closes this handle, releasing its refcount on the instance.
    ///
    /// The instance itself stays open while other handles remain. Closing
    /// an already closed handle is a logic error.
    ///
    /// # Errors
    ///
    /// `DatabaseClosed` when this handle was closed before.
    pub fn close(&self) -> CoreResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(CoreError::DatabaseClosed);
        }
        self.registry.release(&self.slot);
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CoreError::DatabaseClosed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.registry.release(&self.slot);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A write transaction over a staged copy of the store.
///
/// Handed to the closures of [`Database::write`] and to initial data
/// callbacks. Mutations become visible to other handles only when the
/// transaction commits.
pub struct WriteTxn<'a> {
    store: &'a mut StoreFile,
    events: Vec<ChangeEvent>,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(store: &'a mut StoreFile) -> Self {
        Self {
            store,
            events: Vec::new(),
        }
    }

    pub(crate) fn into_events(self) -> Vec<ChangeEvent> {
        self.events
    }

    /// Creates one object of the given type, returning its id.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown or embedded type.
    pub fn create_object(&mut self, type_name: &str) -> CoreResult<ObjectId> {
        let id = self.store.create_row(type_name)?;
        self.events.push(ChangeEvent {
            sequence: 0,
            type_name: type_name.to_string(),
            object_id: id,
            kind: ChangeKind::Created,
        });
        Ok(id)
    }

    /// Deletes every object of the given type, returning how many there were.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown or embedded type.
    pub fn delete_all(&mut self, type_name: &str) -> CoreResult<usize> {
        let removed = self.store.rows(type_name)?.to_vec();
        let count = self.store.delete_all(type_name)?;
        for id in removed {
            self.events.push(ChangeEvent {
                sequence: 0,
                type_name: type_name.to_string(),
                object_id: id,
                kind: ChangeKind::Deleted,
            });
        }
        Ok(count)
    }

    /// Number of rows of one type in the staged state.
    pub fn count(&self, type_name: &str) -> CoreResult<u64> {
        self.store.count(type_name)
    }

    /// True when the staged state holds no rows at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Schema version of the staged state.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.store.schema_version()
    }
}

impl std::fmt::Debug for WriteTxn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn")
            .field("staged_rows", &self.store.total_rows())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, Schema};

    fn person_store() -> StoreFile {
        let schema = Schema::from_types([ObjectSchema::new("Person")]).unwrap();
        StoreFile::new(schema, 1)
    }

    #[test]
    fn create_object_stages_row_and_event() {
        let mut store = person_store();
        let mut txn = WriteTxn::new(&mut store);

        let id = txn.create_object("Person").unwrap();
        assert_eq!(txn.count("Person").unwrap(), 1);
        assert!(!txn.is_empty());

        let events = txn.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert_eq!(events[0].object_id, id);
        assert_eq!(events[0].type_name, "Person");
    }

    #[test]
    fn delete_all_emits_one_event_per_row() {
        let mut store = person_store();
        let mut txn = WriteTxn::new(&mut store);
        txn.create_object("Person").unwrap();
        txn.create_object("Person").unwrap();

        let removed = txn.delete_all("Person").unwrap();
        assert_eq!(removed, 2);

        let events = txn.into_events();
        assert_eq!(events.len(), 4);
        assert!(events[2..].iter().all(|e| e.kind == ChangeKind::Deleted));
    }

    #[test]
    fn unknown_type_rejected() {
        let mut store = person_store();
        let mut txn = WriteTxn::new(&mut store);
        let result = txn.create_object("Dog");
        assert!(matches!(result, Err(CoreError::InvalidArgument { .. })));
    }

    #[test]
    fn schema_version_reflects_staged_store() {
        let mut store = person_store();
        let txn = WriteTxn::new(&mut store);
        assert_eq!(txn.schema_version(), 1);
    }
}
