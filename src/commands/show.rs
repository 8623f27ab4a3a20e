//! Show command - display configuration, selections, or repository state.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::repo::UpdateRepository;
use crate::selections::Selections;
use crate::winver::OsFamily;

/// Show target for the show command.
pub enum ShowTarget {
    /// Resolved environment configuration
    Config,
    /// A selections snapshot, round-tripped through the loader
    Selections { path: PathBuf },
    /// Stored artifacts for one family/version
    Repo { family: OsFamily, version: String },
}

/// Execute the show command.
pub fn cmd_show(base_dir: &Path, target: ShowTarget) -> Result<()> {
    let config = Config::load(base_dir);
    match target {
        ShowTarget::Config => {
            config.print();
        }
        ShowTarget::Selections { path } => {
            let selections = Selections::load(&path)?;
            println!("{}", serde_json::to_string_pretty(&selections)?);
        }
        ShowTarget::Repo { family, version } => {
            let repo = UpdateRepository::new(&config.update_repo);
            let stored = repo.stored_artifacts(family, &version)?;
            if stored.is_empty() {
                println!("No stored artifacts for {family} {version}.");
                return Ok(());
            }
            println!("Stored artifacts for {family} {version}:");
            for artifact in stored {
                println!("  [{}] {}", artifact.class.key(), artifact.name);
            }
        }
    }
    Ok(())
}
