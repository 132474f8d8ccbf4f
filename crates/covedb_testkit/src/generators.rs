//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random configurations and schema
//! fragments that maintain required invariants.

use covedb_core::{FieldKind, ObjectId, ObjectSchema, KEY_SIZE};
use proptest::prelude::*;

/// Strategy for generating valid object ids.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    prop::array::uniform16(any::<u8>()).prop_map(ObjectId::from_bytes)
}

/// Strategy for generating valid type names.
pub fn type_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating valid field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for scalar field kinds.
pub fn scalar_kind_strategy() -> impl Strategy<Value = FieldKind> {
    prop_oneof![
        Just(FieldKind::Int),
        Just(FieldKind::Double),
        Just(FieldKind::Bool),
        Just(FieldKind::String),
        Just(FieldKind::Bytes),
    ]
}

/// Strategy for whole object types with scalar fields.
pub fn object_schema_strategy() -> impl Strategy<Value = ObjectSchema> {
    (
        type_name_strategy(),
        prop::collection::btree_map(field_name_strategy(), scalar_kind_strategy(), 0..6),
    )
        .prop_map(|(name, fields)| {
            let mut ty = ObjectSchema::new(name);
            for (field, kind) in fields {
                ty = ty.field(field, kind);
            }
            ty
        })
}

/// Strategy for key byte slices of every length around the required one.
pub fn key_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..KEY_SIZE * 2)
}

/// Strategy for schema versions.
pub fn schema_version_strategy() -> impl Strategy<Value = u64> {
    0u64..1000
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_types_validate(ty in object_schema_strategy()) {
            prop_assert!(ty.validate().is_ok());
        }

        #[test]
        fn type_names_start_uppercase(name in type_name_strategy()) {
            prop_assert!(name.chars().next().is_some_and(|c| c.is_ascii_uppercase()));
        }

        #[test]
        fn key_bytes_stay_bounded(bytes in key_bytes_strategy()) {
            prop_assert!(bytes.len() < KEY_SIZE * 2);
        }
    }
}
