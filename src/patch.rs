//! Patch deployment engine.
//!
//! Applies downloaded updates of one class to the mounted image. Most
//! classes apply their packages directly. `LCU` handling branches per OS
//! family through an external data table: split families carry a combined
//! package whose servicing-stack component must go in strictly before the
//! cumulative component (applying them out of order can corrupt the
//! image), convert families get the inner cabinet extracted and applied.
//! `Dynamic` content never touches the mount; it lands in media staging.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::UpdateClass;
use crate::logging::RunLog;
use crate::process::Cmd;
use crate::repo::{StoredArtifact, UpdateRepository};
use crate::servicing::ImageServicing;
use crate::session::ImageSession;
use crate::winver::OsFamily;

/// Per-class apply tally. A failed artifact never aborts the rest.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassSummary {
    pub applied: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// How a family's cumulative update is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LcuMode {
    /// Combined package: unpack, servicing stack strictly first.
    SplitCombined,
    /// Extract the inner cabinet and apply it directly.
    ConvertAndApply,
}

/// External LCU handling table, JSON-overridable.
///
/// Whether the built-in table stays exhaustive for future releases is an
/// open question, so deployments can swap it without a rebuild.
#[derive(Debug, Clone, Deserialize)]
pub struct LcuHandling {
    split_families: Vec<String>,
    convert_families: Vec<String>,
}

impl Default for LcuHandling {
    fn default() -> Self {
        Self {
            split_families: vec!["Windows 10".to_string()],
            convert_families: vec!["Windows 11".to_string()],
        }
    }
}

impl LcuHandling {
    /// Load from the configured override file, or fall back to the
    /// built-in table.
    pub fn load(override_file: Option<&Path>) -> Result<Self> {
        match override_file {
            Some(path) => {
                let content = fs::read_to_string(path).with_context(|| {
                    format!("Could not read LCU handling table {}", path.display())
                })?;
                serde_json::from_str(&content).with_context(|| {
                    format!("Invalid LCU handling table {}", path.display())
                })
            }
            None => Ok(Self::default()),
        }
    }

    pub fn mode_for(&self, family: OsFamily) -> Result<LcuMode> {
        let name = family.to_string();
        if self.split_families.iter().any(|f| *f == name) {
            return Ok(LcuMode::SplitCombined);
        }
        if self.convert_families.iter().any(|f| *f == name) {
            return Ok(LcuMode::ConvertAndApply);
        }
        bail!("No LCU handling entry for {name}");
    }
}

/// Apply every stored artifact of one class to the session's mount.
///
/// `media_dir` receives Dynamic content instead of the mount.
pub fn apply_class(
    servicing: &dyn ImageServicing,
    session: &ImageSession,
    repo: &UpdateRepository,
    class: UpdateClass,
    lcu_handling: &LcuHandling,
    work_dir: &Path,
    media_dir: Option<&Path>,
    log: &mut RunLog,
) -> Result<ClassSummary> {
    let family = session.family()?;
    let version = session.marketing_version()?.to_string();

    let artifacts: Vec<StoredArtifact> = repo
        .stored_artifacts(family, &version)?
        .into_iter()
        .filter(|a| a.class == class)
        .collect();

    let mut summary = ClassSummary::default();
    if artifacts.is_empty() {
        log.skip(&format!("No stored {class} artifacts for {family} {version}"));
        return Ok(summary);
    }

    for artifact in artifacts {
        let result = apply_artifact(
            servicing,
            session,
            &artifact,
            class,
            lcu_handling,
            work_dir,
            media_dir,
            log,
        );
        match result {
            Ok(true) => summary.applied += 1,
            Ok(false) => summary.skipped += 1,
            Err(err) => {
                // One bad artifact must not sink the rest of the class.
                log.warn(&format!("Applying {} failed", artifact.name), &err);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// Returns Ok(true) if applied, Ok(false) if skipped.
fn apply_artifact(
    servicing: &dyn ImageServicing,
    session: &ImageSession,
    artifact: &StoredArtifact,
    class: UpdateClass,
    lcu_handling: &LcuHandling,
    work_dir: &Path,
    media_dir: Option<&Path>,
    log: &mut RunLog,
) -> Result<bool> {
    log.info(&format!("  {} [{}]", artifact.name, class.key()));

    match class {
        UpdateClass::Lcu => match lcu_handling.mode_for(session.family()?)? {
            LcuMode::SplitCombined => {
                let parts = combined_parts(&artifact.path, &work_dir.join(&artifact.name))?;
                for part in parts {
                    servicing.apply_package(&session.mount_dir, &part)?;
                }
                Ok(true)
            }
            LcuMode::ConvertAndApply => {
                let package = converted_package(&artifact.path, &work_dir.join(&artifact.name))?;
                servicing.apply_package(&session.mount_dir, &package)?;
                Ok(true)
            }
        },
        UpdateClass::Dynamic => {
            let Some(media) = media_dir else {
                log.skip(&format!(
                    "{}: no media staging configured for dynamic content",
                    artifact.name
                ));
                return Ok(false);
            };
            stage_dynamic_content(&artifact.path, media)?;
            Ok(true)
        }
        _ => {
            for package in package_files(&artifact.path)? {
                servicing.apply_package(&session.mount_dir, &package)?;
            }
            Ok(true)
        }
    }
}

/// Servicing-stack parts must be applied before anything else in a
/// combined package.
fn is_ssu_part(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase().contains("ssu"))
        .unwrap_or(false)
}

fn is_scan_blob(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().eq_ignore_ascii_case("wsusscan.cab"))
        .unwrap_or(false)
}

/// Cabinet files in a directory, minus the applicability blob.
fn cab_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut cabs = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Could not read artifact directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().map(|e| e == "cab").unwrap_or(false) && !is_scan_blob(&path) {
            cabs.push(path);
        }
    }
    cabs.sort();
    Ok(cabs)
}

/// All applicable packages (.msu/.cab) in a directory.
pub(crate) fn package_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut packages = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Could not read artifact directory {}", dir.display()))?
    {
        let path = entry?.path();
        let is_package = path
            .extension()
            .map(|e| e == "cab" || e == "msu")
            .unwrap_or(false);
        if is_package && !is_scan_blob(&path) {
            packages.push(path);
        }
    }
    packages.sort();
    if packages.is_empty() {
        bail!("{} holds no applicable packages", dir.display());
    }
    Ok(packages)
}

/// Order a combined package's parts: servicing stack strictly first.
fn order_ssu_first(mut parts: Vec<PathBuf>) -> Vec<PathBuf> {
    parts.sort();
    let (ssu, rest): (Vec<_>, Vec<_>) = parts.into_iter().partition(|p| is_ssu_part(p));
    ssu.into_iter().chain(rest).collect()
}

/// Parts of a split-family combined LCU, apply order.
///
/// Pre-extracted parts sitting beside the download are used as-is;
/// otherwise the combined .msu is unpacked into `work_dir` first.
fn combined_parts(artifact_dir: &Path, work_dir: &Path) -> Result<Vec<PathBuf>> {
    let existing = cab_files(artifact_dir)?;
    if existing.iter().any(|p| is_ssu_part(p)) {
        return Ok(order_ssu_first(existing));
    }

    let msu = find_msu(artifact_dir)?;
    expand_into(&msu, work_dir)?;
    let extracted = cab_files(work_dir)?;
    if extracted.is_empty() {
        bail!(
            "Combined package {} expanded to no cabinet parts",
            msu.display()
        );
    }
    Ok(order_ssu_first(extracted))
}

/// Convert-family LCU: the one cabinet to apply directly.
fn converted_package(artifact_dir: &Path, work_dir: &Path) -> Result<PathBuf> {
    let existing = cab_files(artifact_dir)?;
    if let Some(cab) = existing.into_iter().next() {
        return Ok(cab);
    }

    let msu = find_msu(artifact_dir)?;
    expand_into(&msu, work_dir)?;
    cab_files(work_dir)?
        .into_iter()
        .next()
        .with_context(|| format!("{} expanded to no cabinet", msu.display()))
}

fn find_msu(dir: &Path) -> Result<PathBuf> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "msu").unwrap_or(false) {
            return Ok(path);
        }
    }
    bail!("{} holds no combined package", dir.display())
}

/// Unpack a cabinet-format package with the platform expand tool.
fn expand_into(package: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    Cmd::new("expand")
        .arg("-F:*")
        .arg_path(package)
        .arg_path(dest)
        .error_msg(format!("Unpacking {}", package.display()))
        .run()?;
    Ok(())
}

/// Dynamic updates feed Windows Setup, not the installed image: unpack
/// them into the media tree's sources directory.
pub(crate) fn stage_dynamic_content(artifact_dir: &Path, media_dir: &Path) -> Result<()> {
    let dest = media_dir.join("sources");
    for package in package_files(artifact_dir)? {
        expand_into(&package, &dest)?;
    }
    Ok(())
}
