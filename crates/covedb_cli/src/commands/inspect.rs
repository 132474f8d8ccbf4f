//! Inspect command implementation.

use covedb_core::StoreFile;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store file path.
    pub path: String,
    /// File size in bytes.
    pub file_size: u64,
    /// On-disk format version.
    pub format_version: u16,
    /// Schema version the store is at.
    pub schema_version: u64,
    /// Number of declared object types.
    pub type_count: usize,
    /// Total rows across all tables.
    pub total_rows: u64,
    /// Per-type statistics.
    pub types: Vec<TypeStats>,
}

/// Statistics for a single object type.
#[derive(Debug, Serialize)]
pub struct TypeStats {
    /// Type name.
    pub name: String,
    /// Number of declared fields.
    pub field_count: usize,
    /// Whether the type is embedded.
    pub embedded: bool,
    /// Primary key field, if declared.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    /// Number of rows. Always zero for embedded types.
    pub row_count: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No store file found at {:?}", path).into());
    }

    let raw = std::fs::read(path)?;
    debug!(path = %path.display(), bytes = raw.len(), "loading store file");
    let store = StoreFile::decode(&raw)?;

    // The header is magic (4 bytes) then the little-endian format version.
    let format_version = u16::from_le_bytes([raw[4], raw[5]]);

    let mut types = Vec::new();
    for ty in store.schema().types() {
        let row_count = if ty.embedded {
            0
        } else {
            store.count(&ty.name)?
        };
        types.push(TypeStats {
            name: ty.name.clone(),
            field_count: ty.fields.len(),
            embedded: ty.embedded,
            primary_key: ty.primary_key.clone(),
            row_count,
        });
    }

    let result = InspectResult {
        path: path.display().to_string(),
        file_size: raw.len() as u64,
        format_version,
        schema_version: store.schema_version(),
        type_count: store.schema().len(),
        total_rows: store.total_rows(),
        types,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("CoveDB Store Inspection");
    println!("=======================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("File:");
    println!("  Size:           {}", format_size(result.file_size));
    println!("  Format version: {}", result.format_version);
    println!();
    println!("Schema:");
    println!("  Schema version: {}", result.schema_version);
    println!("  Object types:   {}", result.type_count);
    println!("  Total rows:     {}", result.total_rows);

    if !result.types.is_empty() {
        println!();
        println!("Types:");
        for ty in &result.types {
            let kind = if ty.embedded { "embedded" } else { "top-level" };
            let key = ty
                .primary_key
                .as_deref()
                .map(|pk| format!(", pk={pk}"))
                .unwrap_or_default();
            println!(
                "  {} ({kind}{key}): {} fields, {} rows",
                ty.name, ty.field_count, ty.row_count
            );
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
