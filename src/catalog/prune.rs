//! Supersedence pruning.
//!
//! Stored artifacts are only as good as the catalog says they are. The
//! pruner re-queries supersedence for everything on disk and deletes what
//! is no longer current; an artifact the catalog no longer lists at all
//! counts as superseded. It must run to completion before a resolution
//! pass in the same cycle, so the resolver never re-downloads into a stale
//! tree.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;

use crate::logging::RunLog;
use crate::repo::{sanitize_name, UpdateRepository};
use crate::winver::OsFamily;

use super::{CatalogQuery, CatalogSource};

/// Remove stored artifacts the catalog has superseded or dropped.
/// Returns the number of artifacts removed.
pub fn prune(
    repo: &UpdateRepository,
    source: &dyn CatalogSource,
    family: OsFamily,
    version: &str,
    log: &mut RunLog,
) -> Result<usize> {
    let stored = repo.stored_artifacts(family, version)?;
    if stored.is_empty() {
        log.info("Update repository holds nothing for this target.");
        return Ok(0);
    }

    let records = source.query(&CatalogQuery {
        family,
        version: version.to_string(),
        architecture: None,
    })?;

    // Directory names are sanitized titles, so compare in the same space.
    let current: HashSet<String> = records
        .iter()
        .filter(|r| !r.superseded)
        .map(|r| sanitize_name(&r.title))
        .collect();

    let mut removed = 0;
    for artifact in stored {
        if current.contains(&artifact.name) {
            continue;
        }
        log.info(&format!(
            "  Removing superseded {} [{}]",
            artifact.name,
            artifact.class.key()
        ));
        fs::remove_dir_all(&artifact.path).with_context(|| {
            format!("Could not remove superseded {}", artifact.path.display())
        })?;
        removed += 1;
    }

    repo.remove_empty_dirs(family, version)?;
    Ok(removed)
}
