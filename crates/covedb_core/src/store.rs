//! Store stamp file.
//!
//! The lifecycle layer observes a small self-contained file per store:
//!
//! ```text
//! <directory>/<name>
//! ├─ magic "CVDB" + format version     # container header
//! ├─ schema version + schema digest    # what the opener reconciles
//! ├─ schema table                      # object type descriptors
//! └─ row tables                        # object ids per non-embedded type
//! ```
//!
//! Rows are opaque 16-byte object ids; data pages belong to the storage
//! engine. Saves are atomic: write to a temp sibling, fsync, rename, fsync
//! the directory.

use crate::error::{CoreError, CoreResult};
use crate::object::ObjectId;
use crate::schema::{self, ObjectSchema, Schema};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Magic bytes for store files.
pub const STORE_MAGIC: [u8; 4] = *b"CVDB";

/// Current store format version.
pub const STORE_FORMAT_VERSION: u16 = 1;

/// In-memory image of a store stamp file.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreFile {
    /// Schema version recorded on disk.
    schema_version: u64,
    /// Object types recorded on disk.
    schema: Schema,
    /// Row ids per non-embedded type name.
    tables: BTreeMap<String, Vec<ObjectId>>,
}

impl StoreFile {
    /// Creates a fresh store image for a schema at a version.
    ///
    /// Every non-embedded type gets an empty row table.
    #[must_use]
    pub fn new(schema: Schema, schema_version: u64) -> Self {
        let tables = schema
            .types()
            .filter(|ty| !ty.embedded)
            .map(|ty| (ty.name.clone(), Vec::new()))
            .collect();
        Self {
            schema_version,
            schema,
            tables,
        }
    }

    /// Returns the recorded schema version.
    #[must_use]
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    pub(crate) fn set_schema_version(&mut self, version: u64) {
        self.schema_version = version;
    }

    /// Returns the recorded schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns true when every row table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }

    /// Total rows across all tables.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.tables.values().map(|rows| rows.len() as u64).sum()
    }

    /// Row count for a type.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an undeclared or embedded type.
    pub fn count(&self, type_name: &str) -> CoreResult<u64> {
        self.table(type_name).map(|rows| rows.len() as u64)
    }

    /// Row ids for a type.
    pub fn rows(&self, type_name: &str) -> CoreResult<&[ObjectId]> {
        self.table(type_name).map(Vec::as_slice)
    }

    /// Appends a new row to a type's table.
    pub fn create_row(&mut self, type_name: &str) -> CoreResult<ObjectId> {
        self.check_writable_type(type_name)?;
        let id = ObjectId::new();
        if let Some(rows) = self.tables.get_mut(type_name) {
            rows.push(id);
        }
        Ok(id)
    }

    /// Clears a type's table, returning how many rows were removed.
    pub fn delete_all(&mut self, type_name: &str) -> CoreResult<usize> {
        self.check_writable_type(type_name)?;
        Ok(self
            .tables
            .get_mut(type_name)
            .map(|rows| std::mem::take(rows).len())
            .unwrap_or_default())
    }

    /// Adds a type to the schema, creating its table when not embedded.
    pub fn add_type(&mut self, ty: ObjectSchema) -> CoreResult<()> {
        let name = ty.name.clone();
        let embedded = ty.embedded;
        self.schema.add(ty)?;
        if !embedded {
            self.tables.insert(name, Vec::new());
        }
        Ok(())
    }

    /// Removes a type and its rows. Returns false when the type was absent.
    pub fn remove_type(&mut self, type_name: &str) -> CoreResult<bool> {
        if self.schema.remove(type_name).is_none() {
            return Ok(false);
        }
        self.tables.remove(type_name);
        Ok(true)
    }

    /// Renames a type, moving its rows and retargeting links to it.
    pub fn rename_type(&mut self, old: &str, new: &str) -> CoreResult<()> {
        if self.schema.contains(new) {
            return Err(CoreError::invalid_argument(format!(
                "object type '{new}' already exists"
            )));
        }
        let mut ty = self
            .schema
            .remove(old)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown object type: '{old}'")))?;
        ty.name = new.to_string();
        self.schema.add(ty)?;

        let renamed: Vec<String> = self.schema.names().map(str::to_string).collect();
        for name in renamed {
            if let Some(mut ty) = self.schema.remove(&name) {
                for field in &mut ty.fields {
                    if let schema::FieldKind::Link(target) = &mut field.kind {
                        if target == old {
                            *target = new.to_string();
                        }
                    }
                }
                self.schema.add(ty)?;
            }
        }

        if let Some(rows) = self.tables.remove(old) {
            self.tables.insert(new.to_string(), rows);
        }
        Ok(())
    }

    fn table(&self, type_name: &str) -> CoreResult<&Vec<ObjectId>> {
        self.check_writable_type(type_name)?;
        self.tables
            .get(type_name)
            .ok_or_else(|| CoreError::invalid_argument(format!("unknown object type: '{type_name}'")))
    }

    fn check_writable_type(&self, type_name: &str) -> CoreResult<()> {
        match self.schema.get(type_name) {
            None => Err(CoreError::invalid_argument(format!(
                "unknown object type: '{type_name}'"
            ))),
            Some(ty) if ty.embedded => Err(CoreError::invalid_argument(format!(
                "embedded type '{type_name}' has no standalone rows"
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Encodes the store image to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        // Header
        buf.extend_from_slice(&STORE_MAGIC);
        buf.extend_from_slice(&STORE_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.schema_version.to_le_bytes());
        buf.extend_from_slice(&self.schema.digest());

        // Schema table
        self.schema.encode_into(&mut buf);

        // Row tables
        let table_count = u32::try_from(self.tables.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&table_count.to_le_bytes());
        for (name, rows) in &self.tables {
            schema::write_string(&mut buf, name);
            let row_count = u32::try_from(rows.len()).unwrap_or(u32::MAX);
            buf.extend_from_slice(&row_count.to_le_bytes());
            for id in rows {
                buf.extend_from_slice(id.as_bytes());
            }
        }

        buf
    }

    /// Decodes a store image from bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let mut cursor = 0;

        // Header
        if data.len() < 4 || data[0..4] != STORE_MAGIC {
            return Err(CoreError::invalid_store("not a covedb store file"));
        }
        cursor += 4;

        let format_version = schema::read_u16(data, &mut cursor)?;
        if format_version > STORE_FORMAT_VERSION {
            return Err(CoreError::invalid_store(format!(
                "unsupported store format version: {format_version}"
            )));
        }

        let schema_version = schema::read_u64(data, &mut cursor)?;

        if cursor + 32 > data.len() {
            return Err(CoreError::invalid_store("store file truncated"));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&data[cursor..cursor + 32]);
        cursor += 32;

        // Schema table
        let schema = Schema::decode_from(data, &mut cursor)?;
        if schema.digest() != digest {
            return Err(CoreError::invalid_store("schema digest mismatch"));
        }

        // Row tables
        let table_count = schema::read_u32(data, &mut cursor)?;
        let mut tables = BTreeMap::new();
        for _ in 0..table_count {
            let name = schema::read_string(data, &mut cursor)?;
            match schema.get(&name) {
                None => {
                    return Err(CoreError::invalid_store(format!(
                        "row table for undeclared type: '{name}'"
                    )))
                }
                Some(ty) if ty.embedded => {
                    return Err(CoreError::invalid_store(format!(
                        "row table for embedded type: '{name}'"
                    )))
                }
                Some(_) => {}
            }
            let row_count = schema::read_u32(data, &mut cursor)? as usize;
            let mut rows = Vec::with_capacity(row_count);
            for _ in 0..row_count {
                if cursor + 16 > data.len() {
                    return Err(CoreError::invalid_store("store file truncated"));
                }
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(&data[cursor..cursor + 16]);
                cursor += 16;
                rows.push(ObjectId::from_bytes(bytes));
            }
            tables.insert(name, rows);
        }

        // A hand-built file may omit empty tables; every concrete type owns one.
        for ty in schema.types().filter(|ty| !ty.embedded) {
            tables.entry(ty.name.clone()).or_default();
        }

        Ok(Self {
            schema_version,
            schema,
            tables,
        })
    }

    /// Loads a store image from disk.
    ///
    /// # Errors
    ///
    /// `FileAccess` when the file cannot be read, `InvalidStore` when the
    /// content does not decode.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let data = fs::read(path)
            .map_err(|e| CoreError::file_access(path, format!("cannot read store file: {e}")))?;
        Self::decode(&data)
    }

    /// Saves the store image to disk atomically.
    ///
    /// Uses write-then-rename for crash safety:
    /// 1. Write to a temp sibling
    /// 2. Sync the temp file to disk
    /// 3. Rename over the target
    /// 4. Fsync the directory so the rename is durable
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let temp_path = path.with_extension("cove.tmp");
        let data = self.encode();

        let mut file = File::create(&temp_path).map_err(|e| {
            CoreError::file_access(&temp_path, format!("cannot create store file: {e}"))
        })?;
        file.write_all(&data)
            .and_then(|()| file.sync_all())
            .map_err(|e| {
                CoreError::file_access(&temp_path, format!("cannot write store file: {e}"))
            })?;
        drop(file);

        fs::rename(&temp_path, path)
            .map_err(|e| CoreError::file_access(path, format!("cannot replace store file: {e}")))?;

        sync_parent_directory(path)
    }
}

/// Copies an asset file over the target path.
///
/// # Errors
///
/// `FileAccess` naming the asset when it is missing or unreadable.
pub fn copy_asset(asset: &Path, target: &Path) -> CoreResult<()> {
    if !asset.exists() {
        return Err(CoreError::file_access(asset, "asset file not found"));
    }
    fs::copy(asset, target)
        .map_err(|e| CoreError::file_access(asset, format!("cannot copy asset file: {e}")))?;
    sync_parent_directory(target)
}

/// Removes a store file. Returns false when nothing existed.
pub fn delete_file(path: &Path) -> CoreResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            sync_parent_directory(path)?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CoreError::file_access(
            path,
            format!("cannot delete store file: {e}"),
        )),
    }
}

pub(crate) fn file_size(path: &Path) -> CoreResult<u64> {
    fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| CoreError::file_access(path, format!("cannot stat store file: {e}")))
}

/// Syncs the parent directory so metadata updates are durable.
///
/// On Windows the NTFS journal covers metadata durability, so the explicit
/// fsync is skipped there.
#[cfg(unix)]
fn sync_parent_directory(path: &Path) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        let dir = File::open(parent)
            .map_err(|e| CoreError::file_access(parent, format!("cannot open directory: {e}")))?;
        dir.sync_all()
            .map_err(|e| CoreError::file_access(parent, format!("cannot sync directory: {e}")))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}
