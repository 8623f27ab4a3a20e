//! Clean command - remove scratch state.
//!
//! The update repository is deliberately preserved unless asked for: it
//! is expensive to refill and safe to reuse across runs.

use anyhow::Result;
use std::fs;
use std::path::Path;

use crate::config::Config;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Staging trees only (default)
    Staging,
    /// Run logs only
    Logs,
    /// The update repository
    Repo,
    /// Staging, logs, and the update repository
    All,
}

fn remove_tree(dir: &Path) -> Result<bool> {
    if dir.exists() {
        println!("Removing {}...", dir.display());
        fs::remove_dir_all(dir)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Execute the clean command.
pub fn cmd_clean(base_dir: &Path, target: CleanTarget) -> Result<()> {
    let config = Config::load(base_dir);

    let mut cleaned = false;
    match target {
        CleanTarget::Staging => {
            cleaned |= remove_tree(&config.staging_dir)?;
        }
        CleanTarget::Logs => {
            cleaned |= remove_tree(&config.log_dir)?;
        }
        CleanTarget::Repo => {
            cleaned |= remove_tree(&config.update_repo)?;
        }
        CleanTarget::All => {
            cleaned |= remove_tree(&config.staging_dir)?;
            cleaned |= remove_tree(&config.log_dir)?;
            cleaned |= remove_tree(&config.update_repo)?;
        }
    }

    if cleaned {
        println!("Clean complete.");
    } else {
        println!("Nothing to clean.");
    }
    Ok(())
}
