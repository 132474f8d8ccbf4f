//! Verify command implementation.

use covedb_core::StoreFile;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Number of checks run.
    pub checks_run: usize,
    /// List of problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new() -> Self {
        Self {
            checks_run: 0,
            errors: Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let mut result = VerifyResult::new();

    // Decode covers the magic, format version, digest, and table layout.
    result.checks_run += 1;
    let store = match StoreFile::load(path) {
        Ok(store) => {
            debug!(path = %path.display(), "store file decoded");
            Some(store)
        }
        Err(e) => {
            result.errors.push(format!("decode failed: {e}"));
            None
        }
    };

    if let Some(store) = &store {
        result.checks_run += 1;
        if let Err(e) = store.schema().verify_closed() {
            result.errors.push(format!("schema closure: {e}"));
        }

        result.checks_run += 1;
        for ty in store.schema().types().filter(|ty| !ty.embedded) {
            match store.rows(&ty.name) {
                Ok(rows) => {
                    let unique: HashSet<_> = rows.iter().collect();
                    if unique.len() != rows.len() {
                        result
                            .errors
                            .push(format!("duplicate object id in table '{}'", ty.name));
                    }
                }
                Err(e) => result.errors.push(format!("table '{}': {e}", ty.name)),
            }
        }
    }

    println!(
        "  Checks run: {}, problems: {}",
        result.checks_run,
        result.errors.len()
    );
    for error in &result.errors {
        println!("    ERROR: {error}");
    }

    println!();
    if result.is_ok() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}
