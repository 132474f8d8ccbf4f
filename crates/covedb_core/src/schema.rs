//! Object schema descriptors.
//!
//! A [`Schema`] is the set of object types a configuration declares. Types
//! are kept in a canonical ordered map so equality, hashing, and the digest
//! are independent of declaration order. Link targets are not resolved at
//! build time; [`Schema::verify_closed`] runs when an instance is opened.

use crate::error::{CoreError, CoreResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The kind of a stored field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Double,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    String,
    /// Opaque byte blob.
    Bytes,
    /// Reference to another object type by name.
    Link(String),
}

impl FieldKind {
    fn tag(&self) -> u8 {
        match self {
            Self::Int => 1,
            Self::Double => 2,
            Self::Bool => 3,
            Self::String => 4,
            Self::Bytes => 5,
            Self::Link(_) => 6,
        }
    }
}

/// A single field of an object type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
}

impl FieldSchema {
    /// Creates a field descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Descriptor for one object type.
///
/// Built fluently:
///
/// ```
/// use covedb_core::{FieldKind, ObjectSchema};
///
/// let dog = ObjectSchema::new("Dog")
///     .field("name", FieldKind::String)
///     .field("owner", FieldKind::Link("Owner".into()))
///     .primary_key("name");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectSchema {
    /// Type name.
    pub name: String,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldSchema>,
    /// Optional primary key field name.
    pub primary_key: Option<String>,
    /// Whether this type only exists embedded in a parent object.
    pub embedded: bool,
}

impl ObjectSchema {
    /// Creates an empty descriptor for a type name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            primary_key: None,
            embedded: false,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSchema::new(name, kind));
        self
    }

    /// Declares the primary key field.
    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    /// Marks this type as embedded.
    #[must_use]
    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    /// Checks internal consistency of the descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the name is empty, the primary key names
    /// an undeclared field, or an embedded type declares a primary key.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_argument("object type name is empty"));
        }
        if let Some(pk) = &self.primary_key {
            if self.embedded {
                return Err(CoreError::invalid_argument(format!(
                    "embedded type '{}' cannot declare a primary key",
                    self.name
                )));
            }
            if !self.fields.iter().any(|f| &f.name == pk) {
                return Err(CoreError::invalid_argument(format!(
                    "primary key '{pk}' is not a declared field of '{}'",
                    self.name
                )));
            }
        }
        Ok(())
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        write_string(buf, &self.name);
        buf.push(u8::from(self.embedded));
        match &self.primary_key {
            Some(pk) => {
                buf.push(1);
                write_string(buf, pk);
            }
            None => buf.push(0),
        }
        let field_count = u16::try_from(self.fields.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&field_count.to_le_bytes());
        for field in &self.fields {
            write_string(buf, &field.name);
            buf.push(field.kind.tag());
            if let FieldKind::Link(target) = &field.kind {
                write_string(buf, target);
            }
        }
    }

    fn decode_from(data: &[u8], cursor: &mut usize) -> CoreResult<Self> {
        let name = read_string(data, cursor)?;
        let embedded = read_u8(data, cursor)? != 0;
        let primary_key = if read_u8(data, cursor)? != 0 {
            Some(read_string(data, cursor)?)
        } else {
            None
        };
        let field_count = read_u16(data, cursor)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_name = read_string(data, cursor)?;
            let kind = match read_u8(data, cursor)? {
                1 => FieldKind::Int,
                2 => FieldKind::Double,
                3 => FieldKind::Bool,
                4 => FieldKind::String,
                5 => FieldKind::Bytes,
                6 => FieldKind::Link(read_string(data, cursor)?),
                tag => {
                    return Err(CoreError::invalid_store(format!(
                        "unknown field kind tag: {tag}"
                    )))
                }
            };
            fields.push(FieldSchema { name: field_name, kind });
        }
        Ok(Self {
            name,
            fields,
            primary_key,
            embedded,
        })
    }
}

/// A bundle of object types, merged into a schema via
/// `ConfigBuilder::add_module`.
#[derive(Debug, Clone, Default)]
pub struct SchemaModule {
    types: Vec<ObjectSchema>,
}

impl SchemaModule {
    /// Creates an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Adds a type to the module.
    #[must_use]
    pub fn with_type(mut self, ty: ObjectSchema) -> Self {
        self.types.push(ty);
        self
    }

    /// Returns the types in this module.
    #[must_use]
    pub fn types(&self) -> &[ObjectSchema] {
        &self.types
    }
}

/// The declared object types of a configuration, keyed by type name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Schema {
    types: BTreeMap<String, ObjectSchema>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Builds a schema from a list of type descriptors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for duplicate or internally inconsistent
    /// descriptors.
    pub fn from_types(types: impl IntoIterator<Item = ObjectSchema>) -> CoreResult<Self> {
        let mut schema = Self::new();
        for ty in types {
            schema.add(ty)?;
        }
        Ok(schema)
    }

    /// Adds one type descriptor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the descriptor is inconsistent or the
    /// name is already declared.
    pub fn add(&mut self, ty: ObjectSchema) -> CoreResult<()> {
        ty.validate()?;
        if self.types.contains_key(&ty.name) {
            return Err(CoreError::invalid_argument(format!(
                "object type '{}' declared twice",
                ty.name
            )));
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// Returns true when no types are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Number of declared types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true when a type name is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Looks up a type descriptor.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ObjectSchema> {
        self.types.get(name)
    }

    /// Iterates the declared types in name order.
    pub fn types(&self) -> impl Iterator<Item = &ObjectSchema> {
        self.types.values()
    }

    /// Iterates the declared type names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Removes a type descriptor, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<ObjectSchema> {
        self.types.remove(name)
    }

    /// Verifies that every link target is itself a declared type.
    ///
    /// Runs when an instance is opened, not when the schema is declared, so
    /// partial schemas can be assembled freely before use.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` naming the first missing target.
    pub fn verify_closed(&self) -> CoreResult<()> {
        for ty in self.types.values() {
            for field in &ty.fields {
                if let FieldKind::Link(target) = &field.kind {
                    if !self.types.contains_key(target) {
                        return Err(CoreError::invalid_state(format!(
                            "schema does not contain all defined object types: \
                             '{target}' is referenced by '{}.{}'",
                            ty.name, field.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Canonical byte encoding, used for the digest and the store file.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf);
        buf
    }

    /// SHA-256 digest over the canonical encoding.
    #[must_use]
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_bytes());
        hasher.finalize().into()
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        let count = u32::try_from(self.types.len()).unwrap_or(u32::MAX);
        buf.extend_from_slice(&count.to_le_bytes());
        for ty in self.types.values() {
            ty.encode_into(buf);
        }
    }

    pub(crate) fn decode_from(data: &[u8], cursor: &mut usize) -> CoreResult<Self> {
        let count = read_u32(data, cursor)?;
        let mut schema = Self::new();
        for _ in 0..count {
            let ty = ObjectSchema::decode_from(data, cursor)?;
            schema.add(ty).map_err(|e| {
                CoreError::invalid_store(format!("schema table is inconsistent: {e}"))
            })?;
        }
        Ok(schema)
    }
}

pub(crate) fn write_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(&bytes[..len as usize]);
}

pub(crate) fn read_u8(data: &[u8], cursor: &mut usize) -> CoreResult<u8> {
    let byte = *data
        .get(*cursor)
        .ok_or_else(|| CoreError::invalid_store("store file truncated"))?;
    *cursor += 1;
    Ok(byte)
}

pub(crate) fn read_u16(data: &[u8], cursor: &mut usize) -> CoreResult<u16> {
    if *cursor + 2 > data.len() {
        return Err(CoreError::invalid_store("store file truncated"));
    }
    let value = u16::from_le_bytes([data[*cursor], data[*cursor + 1]]);
    *cursor += 2;
    Ok(value)
}

pub(crate) fn read_u32(data: &[u8], cursor: &mut usize) -> CoreResult<u32> {
    if *cursor + 4 > data.len() {
        return Err(CoreError::invalid_store("store file truncated"));
    }
    let value = u32::from_le_bytes([
        data[*cursor],
        data[*cursor + 1],
        data[*cursor + 2],
        data[*cursor + 3],
    ]);
    *cursor += 4;
    Ok(value)
}

pub(crate) fn read_u64(data: &[u8], cursor: &mut usize) -> CoreResult<u64> {
    if *cursor + 8 > data.len() {
        return Err(CoreError::invalid_store("store file truncated"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[*cursor..*cursor + 8]);
    *cursor += 8;
    Ok(u64::from_le_bytes(bytes))
}

pub(crate) fn read_string(data: &[u8], cursor: &mut usize) -> CoreResult<String> {
    let len = read_u16(data, cursor)? as usize;
    if *cursor + len > data.len() {
        return Err(CoreError::invalid_store("store file truncated"));
    }
    let s = std::str::from_utf8(&data[*cursor..*cursor + len])
        .map_err(|_| CoreError::invalid_store("invalid utf-8 in store file"))?
        .to_string();
    *cursor += len;
    Ok(s)
}
