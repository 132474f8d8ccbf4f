//! Test fixtures and configuration helpers.
//!
//! Provides convenience functions for setting up registries, configurations,
//! and pre-seeded store files in temporary directories.

use covedb_core::{
    Config, ConfigBuilder, FieldKind, InstanceRegistry, ObjectSchema, KEY_SIZE,
};
use rand::Rng;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Builds configurations rooted in one temporary directory.
///
/// The directory lives as long as the factory; every configuration it
/// produces points into it, so two factories never collide.
pub struct ConfigFactory {
    temp_dir: TempDir,
}

impl ConfigFactory {
    /// Creates a factory with a fresh temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// The directory configurations are rooted in.
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A builder already pointed at the factory's directory.
    pub fn builder(&self) -> ConfigBuilder {
        Config::builder()
            .directory(self.temp_dir.path())
            .expect("Failed to set directory")
    }

    /// A default configuration in the factory's directory.
    pub fn default_config(&self) -> Config {
        self.builder().build().expect("Failed to build config")
    }

    /// A configuration for a named store file.
    pub fn named(&self, name: &str) -> Config {
        self.builder()
            .name(name)
            .expect("Failed to set name")
            .build()
            .expect("Failed to build config")
    }

    /// A configuration declaring the Person type at the given version.
    pub fn person_config(&self, version: u64) -> Config {
        self.builder()
            .schema([person_type()])
            .expect("Failed to set schema")
            .schema_version(version)
            .build()
            .expect("Failed to build config")
    }
}

impl Default for ConfigFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// An object type with a couple of scalar fields.
pub fn person_type() -> ObjectSchema {
    ObjectSchema::new("Person")
        .field("name", FieldKind::String)
        .field("age", FieldKind::Int)
}

/// A closed two-type schema where Dog links to Person.
pub fn pet_schema() -> Vec<ObjectSchema> {
    vec![
        person_type(),
        ObjectSchema::new("Dog")
            .field("name", FieldKind::String)
            .field("owner", FieldKind::Link("Person".to_string())),
    ]
}

/// A fresh random encryption key of the required length.
pub fn random_key() -> [u8; KEY_SIZE] {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes
}

/// Runs a test with a registry and a configuration factory.
///
/// # Example
///
/// ```rust,ignore
/// use covedb_testkit::with_registry;
///
/// #[test]
/// fn my_test() {
///     with_registry(|registry, factory| {
///         let db = registry.acquire(&factory.default_config()).unwrap();
///         db.close().unwrap();
///     });
/// }
/// ```
pub fn with_registry<F, R>(f: F) -> R
where
    F: FnOnce(&InstanceRegistry, &ConfigFactory) -> R,
{
    let registry = InstanceRegistry::new();
    let factory = ConfigFactory::new();
    f(&registry, &factory)
}

/// Writes a store file holding `rows` Person objects, returning its path.
///
/// The file goes through the real opening sequence, so it carries a valid
/// header and digest and can serve as an asset file or a pre-existing store.
pub fn write_seeded_store(dir: &Path, name: &str, version: u64, rows: usize) -> PathBuf {
    let registry = InstanceRegistry::new();
    let config = Config::builder()
        .directory(dir)
        .expect("Failed to set directory")
        .name(name)
        .expect("Failed to set name")
        .schema([person_type()])
        .expect("Failed to set schema")
        .schema_version(version)
        .build()
        .expect("Failed to build config");

    let db = registry.acquire(&config).expect("Failed to open store");
    db.write(|txn| {
        for _ in 0..rows {
            txn.create_object("Person")?;
        }
        Ok(())
    })
    .expect("Failed to seed store");
    db.close().expect("Failed to close store");
    config.store_path().to_path_buf()
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A factory plus an on-disk store already holding `rows` Person objects.
    pub fn populated(rows: usize) -> (ConfigFactory, Config) {
        let factory = ConfigFactory::new();
        let config = factory.person_config(1);
        let registry = InstanceRegistry::new();

        let db = registry.acquire(&config).expect("Failed to open store");
        db.write(|txn| {
            for _ in 0..rows {
                txn.create_object("Person")?;
            }
            Ok(())
        })
        .expect("Failed to populate store");
        db.close().expect("Failed to close store");

        (factory, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_configs_share_directory() {
        let factory = ConfigFactory::new();
        let a = factory.named("a.cove");
        let b = factory.named("b.cove");
        assert_eq!(a.store_path().parent(), b.store_path().parent());
        assert_ne!(a.store_path(), b.store_path());
    }

    #[test]
    fn seeded_store_reopens_with_rows() {
        let factory = ConfigFactory::new();
        let path = write_seeded_store(factory.root(), "seeded.cove", 1, 3);
        assert!(path.exists());

        let registry = InstanceRegistry::new();
        let config = factory
            .builder()
            .name("seeded.cove")
            .unwrap()
            .schema([person_type()])
            .unwrap()
            .schema_version(1)
            .build()
            .unwrap();
        let db = registry.acquire(&config).unwrap();
        assert_eq!(db.count("Person").unwrap(), 3);
        db.close().unwrap();
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(random_key(), random_key());
    }

    #[test]
    fn populated_scenario() {
        let (_factory, config) = scenarios::populated(5);
        let registry = InstanceRegistry::new();
        let db = registry.acquire(&config).unwrap();
        assert_eq!(db.count("Person").unwrap(), 5);
        db.close().unwrap();
    }
}
