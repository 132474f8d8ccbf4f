//! # CoveDB Core
//!
//! Configuration validation and instance lifecycle management for CoveDB
//! stores.
//!
//! This crate owns everything that happens between describing a store and
//! holding an open handle on it:
//!
//! - [`Config`] / [`ConfigBuilder`] validate options eagerly and freeze them
//!   into an immutable, hashable value
//! - [`InstanceRegistry`] maps each store identity to at most one open
//!   instance and hands out refcounted [`Database`] handles
//! - the opening sequence creates, seeds, compacts, and migrates store
//!   files, leaving nothing behind when it fails
//!
//! ## Example
//!
//! ```rust,ignore
//! use covedb_core::{Config, InstanceRegistry, ObjectSchema};
//!
//! let registry = InstanceRegistry::new();
//! let config = Config::builder()
//!     .directory("/var/lib/app")?
//!     .schema([ObjectSchema::new("Person")])?
//!     .schema_version(1)
//!     .build()?;
//!
//! let db = registry.acquire(&config)?;
//! db.write(|txn| {
//!     txn.create_object("Person")?;
//!     Ok(())
//! })?;
//! db.close()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod feed;
mod handle;
mod key;
mod migration;
mod object;
mod registry;
mod schema;
mod store;

pub use config::{
    CompactOnLaunch, Config, ConfigBuilder, Durability, InitialDataFn, DEFAULT_MAX_ACTIVE_VERSIONS,
    DEFAULT_STORE_NAME,
};
pub use error::{CoreError, CoreResult};
pub use feed::{ChangeEvent, ChangeFeed, ChangeKind, ChannelFeedFactory, FeedFactory};
pub use handle::{Database, WriteTxn};
pub use key::{EncryptionKey, KEY_SIZE};
pub use migration::{DynamicStore, Migrator};
pub use object::ObjectId;
pub use registry::InstanceRegistry;
pub use schema::{FieldKind, FieldSchema, ObjectSchema, Schema, SchemaModule};
pub use store::{copy_asset, delete_file, StoreFile, STORE_FORMAT_VERSION, STORE_MAGIC};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
