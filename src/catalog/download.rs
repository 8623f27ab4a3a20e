//! Artifact download into the local repository.
//!
//! Each content file is fetched exactly once: a file already present with
//! the expected size is skipped. Fresh downloads are digest-verified when
//! the catalog supplied one, and cabinet containers are validated before
//! acceptance; anything that fails verification is deleted so a later run
//! re-fetches it.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;

use crate::logging::RunLog;
use crate::repo::UpdateRepository;

use super::{content, ContentFile, UpdateArtifact};

/// Per-artifact download tally.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchSummary {
    pub fetched: usize,
    pub skipped: usize,
}

/// Download every content file of an artifact into its repository slot.
pub fn fetch_artifact(
    client: &reqwest::blocking::Client,
    artifact: &UpdateArtifact,
    repo: &UpdateRepository,
    log: &mut RunLog,
) -> Result<FetchSummary> {
    let dir = repo.artifact_dir(
        artifact.family,
        &artifact.version,
        artifact.class,
        &artifact.title,
    );
    fs::create_dir_all(&dir)
        .with_context(|| format!("Could not create artifact directory {}", dir.display()))?;

    let mut summary = FetchSummary::default();
    for file in &artifact.files {
        let dest = dir.join(&file.name);
        if is_present(&dest, file) {
            log.skip(&format!("{} already present", file.name));
            summary.skipped += 1;
            continue;
        }
        fetch_file(client, file, &dest)?;
        log.info(&format!("  Downloaded {}", file.name));
        summary.fetched += 1;
    }
    Ok(summary)
}

/// A file counts as present when it exists with the expected size
/// (or any size if the catalog did not report one).
fn is_present(dest: &Path, file: &ContentFile) -> bool {
    let Ok(meta) = fs::metadata(dest) else {
        return false;
    };
    match file.size {
        Some(size) => meta.len() == size,
        None => true,
    }
}

/// Fetch one file, verify it, and keep it only if everything checks out.
fn fetch_file(client: &reqwest::blocking::Client, file: &ContentFile, dest: &Path) -> Result<()> {
    let mut response = client
        .get(&file.url)
        .send()
        .with_context(|| format!("Download of {} failed", file.url))?
        .error_for_status()
        .with_context(|| format!("Download of {} rejected", file.url))?;

    let mut out = File::create(dest)
        .with_context(|| format!("Could not create {}", dest.display()))?;
    io::copy(&mut response, &mut out)
        .with_context(|| format!("Download of {} interrupted", file.url))?;
    drop(out);

    if let Some(expected) = &file.sha256 {
        let actual = hash_file(dest)?;
        if !actual.eq_ignore_ascii_case(expected) {
            fs::remove_file(dest).ok();
            bail!(
                "Checksum mismatch for {}\n  Expected: {}\n  Got: {}\nDeleted the download.",
                file.name,
                expected,
                actual
            );
        }
    }

    let lower = file.name.to_lowercase();
    if lower.ends_with(".cab") || lower.ends_with(".msu") {
        if let Err(err) = content::validate_container(dest) {
            fs::remove_file(dest).ok();
            return Err(err.context(format!("{} is not a valid update container", file.name)));
        }
    }

    Ok(())
}

/// SHA256 of a file, streamed.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("Could not open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
