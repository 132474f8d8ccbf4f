//! Schema migration support.
//!
//! A [`Migrator`] is invoked by the registry when a store's on-disk schema
//! version is older than the configured one. It receives a [`DynamicStore`]
//! view of a staged copy of the store; the staged copy is persisted only
//! when the callback returns `Ok`, so a failed migration leaves the on-disk
//! state untouched.

use crate::error::CoreResult;
use crate::object::ObjectId;
use crate::schema::{ObjectSchema, Schema};
use crate::store::StoreFile;

/// Callback that upgrades a store's schema between versions.
///
/// Migrators are carried in configurations as `Arc<dyn Migrator>` and are
/// compared by allocation identity, so the same `Arc` must be shared by
/// every configuration that opens the store.
pub trait Migrator: Send + Sync {
    /// Transforms the store contents from `old_version` to `new_version`.
    ///
    /// The registry records `new_version` after a successful run; the
    /// callback only reshapes types and rows.
    fn migrate(
        &self,
        store: &mut DynamicStore<'_>,
        old_version: u64,
        new_version: u64,
    ) -> CoreResult<()>;
}

/// Mutable, schema-level view of a store handed to a [`Migrator`].
pub struct DynamicStore<'a> {
    store: &'a mut StoreFile,
}

impl<'a> DynamicStore<'a> {
    pub(crate) fn new(store: &'a mut StoreFile) -> Self {
        Self { store }
    }

    /// The schema version the store currently records.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.store.schema_version()
    }

    /// The current schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    /// Returns true when a type is declared.
    #[must_use]
    pub fn has_type(&self, name: &str) -> bool {
        self.store.schema().contains(name)
    }

    /// Adds a new object type.
    pub fn add_type(&mut self, ty: ObjectSchema) -> CoreResult<()> {
        self.store.add_type(ty)
    }

    /// Removes a type and its rows. Returns false when it was absent.
    pub fn remove_type(&mut self, name: &str) -> CoreResult<bool> {
        self.store.remove_type(name)
    }

    /// Renames a type, carrying rows along and retargeting links.
    pub fn rename_type(&mut self, old: &str, new: &str) -> CoreResult<()> {
        self.store.rename_type(old, new)
    }

    /// Row count for a type.
    pub fn count(&self, name: &str) -> CoreResult<u64> {
        self.store.count(name)
    }

    /// Creates a row during migration.
    pub fn create_object(&mut self, name: &str) -> CoreResult<ObjectId> {
        self.store.create_row(name)
    }

    /// Clears a type's rows.
    pub fn delete_all(&mut self, name: &str) -> CoreResult<usize> {
        self.store.delete_all(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::schema::FieldKind;

    struct AddCatType;

    impl Migrator for AddCatType {
        fn migrate(
            &self,
            store: &mut DynamicStore<'_>,
            _old_version: u64,
            _new_version: u64,
        ) -> CoreResult<()> {
            store.add_type(ObjectSchema::new("Cat").field("name", FieldKind::String))?;
            store.create_object("Cat")?;
            Ok(())
        }
    }

    struct FailingMigrator;

    impl Migrator for FailingMigrator {
        fn migrate(
            &self,
            _store: &mut DynamicStore<'_>,
            _old_version: u64,
            _new_version: u64,
        ) -> CoreResult<()> {
            Err(CoreError::invalid_state("intentional failure"))
        }
    }

    fn base_store() -> StoreFile {
        let schema =
            Schema::from_types([ObjectSchema::new("Dog").field("name", FieldKind::String)])
                .unwrap();
        StoreFile::new(schema, 0)
    }

    #[test]
    fn migrator_reshapes_store() {
        let mut store = base_store();
        let mut view = DynamicStore::new(&mut store);

        AddCatType.migrate(&mut view, 0, 1).unwrap();

        assert!(store.schema().contains("Cat"));
        assert_eq!(store.count("Cat").unwrap(), 1);
    }

    #[test]
    fn failing_migrator_surfaces_error() {
        let mut store = base_store();
        let mut view = DynamicStore::new(&mut store);
        let result = FailingMigrator.migrate(&mut view, 0, 1);
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
    }

    #[test]
    fn view_exposes_version_and_types() {
        let mut store = base_store();
        let view = DynamicStore::new(&mut store);
        assert_eq!(view.schema_version(), 0);
        assert!(view.has_type("Dog"));
        assert!(!view.has_type("Cat"));
    }
}
