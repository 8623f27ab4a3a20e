//! Prune command - drop superseded artifacts from the repository.

use anyhow::Result;
use std::path::Path;

use crate::catalog;
use crate::config::Config;
use crate::logging::RunLog;
use crate::repo::UpdateRepository;
use crate::winver::OsFamily;

use super::run::build_catalog;

/// Execute the prune command.
pub fn cmd_prune(base_dir: &Path, family: OsFamily, version: &str) -> Result<()> {
    let config = Config::load(base_dir);
    let catalog_source = build_catalog(&config)?;
    let repo = UpdateRepository::new(&config.update_repo);
    let mut log = RunLog::stdout_only();

    println!("=== Pruning {family} {version} ===");
    let removed = catalog::prune(&repo, catalog_source.as_ref(), family, version, &mut log)?;
    println!("Pruned {removed} superseded artifact(s).");
    Ok(())
}
