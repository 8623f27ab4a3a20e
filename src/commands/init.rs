//! Init command - write a starter selections snapshot.
//!
//! Gives an operator a minimal, valid snapshot to edit instead of writing
//! JSON from scratch.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::selections::Selections;

/// Execute the init command.
pub fn cmd_init(path: &Path, source: PathBuf, index: u32, output: PathBuf) -> Result<()> {
    if path.exists() {
        bail!(
            "{} already exists; refusing to overwrite a selections file",
            path.display()
        );
    }
    let selections = Selections::new(source, index, output);
    selections.save(path)?;
    println!("Wrote selections template to {}", path.display());
    println!("Edit it, then run: wimforge run -s {}", path.display());
    Ok(())
}
