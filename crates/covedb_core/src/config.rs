//! Store configuration.
//!
//! [`ConfigBuilder`] accumulates options and validates them eagerly: a
//! conflicting pair of options fails at the second setter, whichever order
//! they are applied in, and `build()` only checks what single setters cannot
//! see. The resulting [`Config`] is immutable, cheap to clone, and usable as
//! a hash key; every handle opened against it shares the same frozen value.
//!
//! Lifecycle callbacks (migration, initial data, compaction, feed factory)
//! are carried as `Arc`s and compared by allocation identity. Configurations
//! that should compare equal must share the same `Arc`s.

use crate::error::{CoreError, CoreResult};
use crate::feed::{default_feed_factory, FeedFactory};
use crate::handle::WriteTxn;
use crate::key::EncryptionKey;
use crate::migration::Migrator;
use crate::schema::{ObjectSchema, Schema, SchemaModule};
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default store file name.
pub const DEFAULT_STORE_NAME: &str = "default.cove";

/// Default bound on concurrently pinned store versions.
pub const DEFAULT_MAX_ACTIVE_VERSIONS: u64 = u64::MAX;

/// One-shot callback run inside a write transaction the first time a
/// genuinely new store is created.
pub type InitialDataFn = dyn Fn(&mut WriteTxn<'_>) -> CoreResult<()> + Send + Sync;

/// Decides whether a store file should be compacted before use.
pub trait CompactOnLaunch: Send + Sync {
    /// Called once per opening of a pre-existing on-disk store.
    fn should_compact(&self, total_bytes: u64, used_bytes: u64) -> bool;
}

/// Durability mode of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Durability {
    /// Backed by a file on disk.
    OnDisk,
    /// Held in memory for the lifetime of the open instance.
    InMemory,
}

/// Immutable store configuration.
///
/// Built via [`Config::builder`]. Two configurations are equal iff every
/// stored option compares equal; callbacks compare by `Arc` identity.
#[derive(Clone)]
pub struct Config {
    store_path: PathBuf,
    name: String,
    in_memory: bool,
    read_only: bool,
    encryption_key: Option<EncryptionKey>,
    schema_version: u64,
    schema: Schema,
    migration: Option<Arc<dyn Migrator>>,
    delete_if_migration_needed: bool,
    asset_file: Option<PathBuf>,
    initial_data: Option<Arc<InitialDataFn>>,
    compact_on_launch: Option<Arc<dyn CompactOnLaunch>>,
    feed_factory: Arc<dyn FeedFactory>,
    max_active_versions: u64,
    allow_queries_on_main_thread: bool,
    allow_writes_on_main_thread: bool,
}

impl Config {
    /// Starts a new builder.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Canonical path of the store file. For in-memory stores this is the
    /// identity of the instance, not a file that exists.
    #[must_use]
    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// The store file name component.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Durability mode.
    #[must_use]
    pub fn durability(&self) -> Durability {
        if self.in_memory {
            Durability::InMemory
        } else {
            Durability::OnDisk
        }
    }

    /// True for in-memory stores.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// True for read-only configurations.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The encryption key, when set.
    #[must_use]
    pub fn encryption_key(&self) -> Option<&EncryptionKey> {
        self.encryption_key.as_ref()
    }

    /// Configured schema version.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    /// Declared object types. An empty schema adopts whatever the on-disk
    /// store declares.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The custom migration callback, when set.
    #[must_use]
    pub fn migration(&self) -> Option<&Arc<dyn Migrator>> {
        self.migration.as_ref()
    }

    /// True when a needed migration clears the store instead of running a
    /// callback.
    #[must_use]
    pub fn delete_if_migration_needed(&self) -> bool {
        self.delete_if_migration_needed
    }

    /// The asset file to seed from, when set.
    #[must_use]
    pub fn asset_file(&self) -> Option<&Path> {
        self.asset_file.as_deref()
    }

    /// The initial data transaction, when set.
    #[must_use]
    pub fn initial_data(&self) -> Option<&Arc<InitialDataFn>> {
        self.initial_data.as_ref()
    }

    /// The compaction callback, when set.
    #[must_use]
    pub fn compact_on_launch(&self) -> Option<&Arc<dyn CompactOnLaunch>> {
        self.compact_on_launch.as_ref()
    }

    /// The change feed factory.
    #[must_use]
    pub fn feed_factory(&self) -> &Arc<dyn FeedFactory> {
        &self.feed_factory
    }

    /// Bound on concurrently pinned store versions. Advisory to the storage
    /// engine; not enforced by the lifecycle layer.
    #[must_use]
    pub fn max_active_versions(&self) -> u64 {
        self.max_active_versions
    }

    /// Whether queries may run on the main thread.
    #[must_use]
    pub fn allow_queries_on_main_thread(&self) -> bool {
        self.allow_queries_on_main_thread
    }

    /// Whether writes may run on the main thread.
    #[must_use]
    pub fn allow_writes_on_main_thread(&self) -> bool {
        self.allow_writes_on_main_thread
    }

    /// Checks this configuration against the one that opened the identity.
    ///
    /// Only identity-relevant fields participate: durability, schema
    /// version, encryption key, schema set, and the migration-policy
    /// representation. Advisory flags may differ between handles.
    pub(crate) fn verify_compatible(&self, cached: &Self) -> CoreResult<()> {
        if self.in_memory != cached.in_memory {
            return Err(CoreError::incompatible(
                "durability",
                format!(
                    "'{}' is already open as {:?}, requested {:?}",
                    cached.store_path.display(),
                    cached.durability(),
                    self.durability()
                ),
            ));
        }
        if self.schema_version != cached.schema_version {
            return Err(CoreError::incompatible(
                "schema_version",
                format!(
                    "already open at schema version {}, requested {}",
                    cached.schema_version, self.schema_version
                ),
            ));
        }
        if self.encryption_key != cached.encryption_key {
            return Err(CoreError::incompatible(
                "encryption_key",
                "already open with a different encryption key",
            ));
        }
        if !self.schema.is_empty() && !cached.schema.is_empty() && self.schema != cached.schema {
            return Err(CoreError::incompatible(
                "schema",
                "already open with a different set of object types",
            ));
        }
        if self.delete_if_migration_needed != cached.delete_if_migration_needed
            || !same_optional_arc(&self.migration, &cached.migration)
        {
            return Err(CoreError::incompatible(
                "migration",
                "migration policies differ; callbacks are compared by identity, \
                 so share a single Arc<dyn Migrator> across configurations that \
                 open the same store",
            ));
        }
        Ok(())
    }
}

impl PartialEq for Config {
    fn eq(&self, other: &Self) -> bool {
        self.store_path == other.store_path
            && self.name == other.name
            && self.in_memory == other.in_memory
            && self.read_only == other.read_only
            && self.encryption_key == other.encryption_key
            && self.schema_version == other.schema_version
            && self.schema == other.schema
            && same_optional_arc(&self.migration, &other.migration)
            && self.delete_if_migration_needed == other.delete_if_migration_needed
            && self.asset_file == other.asset_file
            && same_optional_arc(&self.initial_data, &other.initial_data)
            && same_optional_arc(&self.compact_on_launch, &other.compact_on_launch)
            && Arc::ptr_eq(&self.feed_factory, &other.feed_factory)
            && self.max_active_versions == other.max_active_versions
            && self.allow_queries_on_main_thread == other.allow_queries_on_main_thread
            && self.allow_writes_on_main_thread == other.allow_writes_on_main_thread
    }
}

impl Eq for Config {}

impl Hash for Config {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.store_path.hash(state);
        self.name.hash(state);
        self.in_memory.hash(state);
        self.read_only.hash(state);
        self.encryption_key.hash(state);
        self.schema_version.hash(state);
        self.schema.hash(state);
        hash_optional_arc(&self.migration, state);
        self.delete_if_migration_needed.hash(state);
        self.asset_file.hash(state);
        hash_optional_arc(&self.initial_data, state);
        hash_optional_arc(&self.compact_on_launch, state);
        hash_arc(&self.feed_factory, state);
        self.max_active_versions.hash(state);
        self.allow_queries_on_main_thread.hash(state);
        self.allow_writes_on_main_thread.hash(state);
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("store_path", &self.store_path)
            .field("durability", &self.durability())
            .field("read_only", &self.read_only)
            .field("encryption_key", &self.encryption_key)
            .field("schema_version", &self.schema_version)
            .field("schema_types", &self.schema.len())
            .field("has_migration", &self.migration.is_some())
            .field("delete_if_migration_needed", &self.delete_if_migration_needed)
            .field("asset_file", &self.asset_file)
            .field("has_initial_data", &self.initial_data.is_some())
            .field("has_compact_on_launch", &self.compact_on_launch.is_some())
            .field("max_active_versions", &self.max_active_versions)
            .finish_non_exhaustive()
    }
}

/// Accumulates and validates store options.
///
/// Fallible setters reject bad values immediately; mutually exclusive pairs
/// fail at the second setter in either order. See the module docs for the
/// full rule set.
#[derive(Clone)]
pub struct ConfigBuilder {
    directory: Option<PathBuf>,
    name: String,
    in_memory: bool,
    read_only: bool,
    encryption_key: Option<EncryptionKey>,
    schema_version: u64,
    schema: Schema,
    migration: Option<Arc<dyn Migrator>>,
    delete_if_migration_needed: bool,
    asset_file: Option<PathBuf>,
    initial_data: Option<Arc<InitialDataFn>>,
    compact_on_launch: Option<Arc<dyn CompactOnLaunch>>,
    feed_factory: Arc<dyn FeedFactory>,
    max_active_versions: u64,
    allow_queries_on_main_thread: bool,
    allow_writes_on_main_thread: bool,
}

impl ConfigBuilder {
    /// Creates a builder with default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: None,
            name: DEFAULT_STORE_NAME.to_string(),
            in_memory: false,
            read_only: false,
            encryption_key: None,
            schema_version: 0,
            schema: Schema::new(),
            migration: None,
            delete_if_migration_needed: false,
            asset_file: None,
            initial_data: None,
            compact_on_launch: None,
            feed_factory: default_feed_factory(),
            max_active_versions: DEFAULT_MAX_ACTIVE_VERSIONS,
            allow_queries_on_main_thread: true,
            allow_writes_on_main_thread: false,
        }
    }

    /// Sets the directory the store lives in, creating it if missing.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty, relative, non-directory, unwritable,
    /// or uncreatable path.
    pub fn directory(mut self, dir: impl AsRef<Path>) -> CoreResult<Self> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(CoreError::invalid_argument("directory path is empty"));
        }
        if !dir.is_absolute() {
            return Err(CoreError::invalid_argument(format!(
                "directory path must be absolute: '{}'",
                dir.display()
            )));
        }
        if dir.exists() && !dir.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "not a directory: '{}'",
                dir.display()
            )));
        }
        fs::create_dir_all(dir).map_err(|e| {
            CoreError::invalid_argument(format!(
                "cannot create directory '{}': {e}",
                dir.display()
            ))
        })?;
        let metadata = fs::metadata(dir).map_err(|e| {
            CoreError::invalid_argument(format!("cannot access directory '{}': {e}", dir.display()))
        })?;
        if metadata.permissions().readonly() {
            return Err(CoreError::invalid_argument(format!(
                "directory is not writable: '{}'",
                dir.display()
            )));
        }
        self.directory = Some(dir.to_path_buf());
        Ok(self)
    }

    /// Sets the store file name.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when empty.
    pub fn name(mut self, name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::invalid_argument("store name is empty"));
        }
        self.name = name;
        Ok(self)
    }

    /// Makes the store in-memory. Contents are discarded when the last
    /// handle closes.
    #[must_use]
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Makes handles read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the encryption key. The bytes are copied.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` unless the slice is exactly
    /// [`KEY_SIZE`](crate::key::KEY_SIZE) bytes.
    pub fn encryption_key(mut self, bytes: &[u8]) -> CoreResult<Self> {
        self.encryption_key = Some(EncryptionKey::from_bytes(bytes)?);
        Ok(self)
    }

    /// Sets the schema version the store should be at.
    #[must_use]
    pub fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Replaces the declared object types.
    ///
    /// Link targets are not resolved here; completeness is verified when an
    /// instance opens.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for duplicate or inconsistent descriptors.
    pub fn schema(mut self, types: impl IntoIterator<Item = ObjectSchema>) -> CoreResult<Self> {
        self.schema = Schema::from_types(types)?;
        Ok(self)
    }

    /// Merges a module's types into the declared schema.
    ///
    /// Modules may overlap; a type declared twice must have the same shape.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a redeclared type differs structurally.
    pub fn add_module(mut self, module: SchemaModule) -> CoreResult<Self> {
        for ty in module.types() {
            match self.schema.get(&ty.name) {
                Some(existing) if existing == ty => {}
                Some(_) => {
                    return Err(CoreError::invalid_argument(format!(
                        "object type '{}' declared twice with different shapes",
                        ty.name
                    )))
                }
                None => self.schema.add(ty.clone())?,
            }
        }
        Ok(self)
    }

    /// Sets the custom migration callback.
    ///
    /// # Errors
    ///
    /// `InvalidState` when delete-if-migration-needed is already set.
    pub fn migration(mut self, migrator: Arc<dyn Migrator>) -> CoreResult<Self> {
        if self.delete_if_migration_needed {
            return Err(CoreError::invalid_state(
                "a custom migration cannot be combined with delete-if-migration-needed",
            ));
        }
        self.migration = Some(migrator);
        Ok(self)
    }

    /// Clears and recreates the store whenever a migration would be needed.
    ///
    /// # Errors
    ///
    /// `InvalidState` when a custom migration or an asset file is already
    /// set.
    pub fn delete_if_migration_needed(mut self) -> CoreResult<Self> {
        if self.migration.is_some() {
            return Err(CoreError::invalid_state(
                "delete-if-migration-needed cannot be combined with a custom migration",
            ));
        }
        if self.asset_file.is_some() {
            return Err(CoreError::invalid_state(
                "delete-if-migration-needed cannot be combined with an asset file",
            ));
        }
        self.delete_if_migration_needed = true;
        Ok(self)
    }

    /// Seeds the store from a pre-populated file on first creation.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty path, `InvalidState` when
    /// delete-if-migration-needed is already set.
    pub fn asset_file(mut self, path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(CoreError::invalid_argument("asset file path is empty"));
        }
        if self.delete_if_migration_needed {
            return Err(CoreError::invalid_state(
                "an asset file cannot be combined with delete-if-migration-needed",
            ));
        }
        self.asset_file = Some(path.to_path_buf());
        Ok(self)
    }

    /// Sets the one-shot initial data transaction.
    #[must_use]
    pub fn initial_data(mut self, callback: Arc<InitialDataFn>) -> Self {
        self.initial_data = Some(callback);
        self
    }

    /// Sets the compaction callback.
    #[must_use]
    pub fn compact_on_launch(mut self, callback: Arc<dyn CompactOnLaunch>) -> Self {
        self.compact_on_launch = Some(callback);
        self
    }

    /// Replaces the change feed factory.
    #[must_use]
    pub fn feed_factory(mut self, factory: Arc<dyn FeedFactory>) -> Self {
        self.feed_factory = factory;
        self
    }

    /// Bounds how many store versions may stay pinned concurrently.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when zero.
    pub fn max_active_versions(mut self, bound: u64) -> CoreResult<Self> {
        if bound == 0 {
            return Err(CoreError::invalid_argument(
                "max active versions must be at least 1, got 0",
            ));
        }
        self.max_active_versions = bound;
        Ok(self)
    }

    /// Allows or forbids queries on the main thread. Advisory.
    #[must_use]
    pub fn allow_queries_on_main_thread(mut self, allow: bool) -> Self {
        self.allow_queries_on_main_thread = allow;
        self
    }

    /// Allows or forbids writes on the main thread. Advisory.
    #[must_use]
    pub fn allow_writes_on_main_thread(mut self, allow: bool) -> Self {
        self.allow_writes_on_main_thread = allow;
        self
    }

    /// Freezes the options into a [`Config`].
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when no directory was set, the directory cannot be
    /// resolved, or the target path is an existing directory.
    /// `InvalidState` for read-only combined with initial data,
    /// delete-if-migration-needed, or a compaction callback, and for an
    /// asset file combined with in-memory.
    pub fn build(self) -> CoreResult<Config> {
        let directory = self
            .directory
            .ok_or_else(|| CoreError::invalid_argument("directory is required"))?;

        if self.read_only {
            if self.initial_data.is_some() {
                return Err(CoreError::invalid_state(
                    "a read-only store cannot run an initial data transaction",
                ));
            }
            if self.delete_if_migration_needed {
                return Err(CoreError::invalid_state(
                    "a read-only store cannot be combined with delete-if-migration-needed",
                ));
            }
            if self.compact_on_launch.is_some() {
                return Err(CoreError::invalid_state(
                    "a read-only store cannot be compacted on launch",
                ));
            }
        }
        if self.in_memory && self.asset_file.is_some() {
            return Err(CoreError::invalid_state(
                "an in-memory store cannot be seeded from an asset file",
            ));
        }

        let directory = fs::canonicalize(&directory).map_err(|e| {
            CoreError::invalid_argument(format!(
                "cannot resolve directory '{}': {e}",
                directory.display()
            ))
        })?;
        let store_path = directory.join(&self.name);
        if store_path.is_dir() {
            return Err(CoreError::invalid_argument(format!(
                "store path is an existing directory: '{}'",
                store_path.display()
            )));
        }

        Ok(Config {
            store_path,
            name: self.name,
            in_memory: self.in_memory,
            read_only: self.read_only,
            encryption_key: self.encryption_key,
            schema_version: self.schema_version,
            schema: self.schema,
            migration: self.migration,
            delete_if_migration_needed: self.delete_if_migration_needed,
            asset_file: self.asset_file,
            initial_data: self.initial_data,
            compact_on_launch: self.compact_on_launch,
            feed_factory: self.feed_factory,
            max_active_versions: self.max_active_versions,
            allow_queries_on_main_thread: self.allow_queries_on_main_thread,
            allow_writes_on_main_thread: self.allow_writes_on_main_thread,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("directory", &self.directory)
            .field("name", &self.name)
            .field("in_memory", &self.in_memory)
            .field("read_only", &self.read_only)
            .field("schema_version", &self.schema_version)
            .field("schema_types", &self.schema.len())
            .finish_non_exhaustive()
    }
}

fn same_optional_arc<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn hash_arc<T: ?Sized, H: Hasher>(arc: &Arc<T>, state: &mut H) {
    (Arc::as_ptr(arc) as *const () as usize).hash(state);
}

fn hash_optional_arc<T: ?Sized, H: Hasher>(arc: &Option<Arc<T>>, state: &mut H) {
    match arc {
        Some(arc) => {
            state.write_u8(1);
            hash_arc(arc, state);
        }
        None => state.write_u8(0),
    }
}
