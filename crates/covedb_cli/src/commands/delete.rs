//! Delete command implementation.

use covedb_core::delete_file;
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

/// Runs the delete command.
pub fn run(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        println!("Nothing to delete at {:?}", path);
        return Ok(());
    }

    if !force {
        print!("Delete store file {:?}? [y/N] ", path);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            println!("Aborted");
            return Ok(());
        }
    }

    if delete_file(path)? {
        info!(path = %path.display(), "store file deleted");
        println!("Deleted {:?}", path);
    } else {
        println!("Nothing to delete at {:?}", path);
    }
    Ok(())
}
