//! Content-file acceptance rules and container validation.
//!
//! Offline servicing can only consume full update packages. Express and
//! delta payloads need the online component store, baseline-dependent
//! packages need a package that is not in the image, and metadata-only
//! packages carry nothing applicable. All of those are rejected by name
//! before download. Cabinet containers are additionally opened and checked
//! for installer metadata before they are accepted into the repository.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

/// Extensions offline servicing accepts.
const ALLOWED_EXTENSIONS: &[&str] = &["msu", "cab"];

/// Name fragments of packages that cannot be applied to an offline image.
const OFFLINE_INCOMPATIBLE: &[(&str, &str)] = &[
    ("express", "express delta requires the online component store"),
    ("delta", "delta package requires the online component store"),
    ("baseline", "package depends on a baseline not present in the image"),
    ("metadata", "feature-metadata-only package, nothing to apply"),
];

/// Why a content file is rejected, or None if acceptable.
pub fn rejection(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase();

    let allowed = ALLOWED_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")));
    if !allowed {
        return Some("extension not in the offline-serviceable set");
    }

    for (pattern, reason) in OFFLINE_INCOMPATIBLE {
        if lower.contains(pattern) {
            return Some(reason);
        }
    }
    None
}

/// Validate a downloaded cabinet-format container (.cab/.msu).
///
/// The CFFILE directory must list installer metadata: a `.mum` component
/// manifest, or the `wsusscan.cab` applicability blob that MSU wrappers
/// carry. Anything else is not an update package.
pub fn validate_container(path: &Path) -> Result<()> {
    let entries = cab_entry_names(path)?;
    let has_metadata = entries.iter().any(|name| {
        let lower = name.to_lowercase();
        lower.ends_with(".mum") || lower == "wsusscan.cab"
    });
    if !has_metadata {
        bail!(
            "{} carries no installer metadata ({} entries listed)",
            path.display(),
            entries.len()
        );
    }
    Ok(())
}

/// List file names from a cabinet's CFFILE directory.
///
/// Only the header and directory are read; folder data is never
/// decompressed.
pub fn cab_entry_names(path: &Path) -> Result<Vec<String>> {
    let data = fs::read(path)
        .with_context(|| format!("Could not read container {}", path.display()))?;

    if data.len() < 36 || &data[0..4] != b"MSCF" {
        bail!("{} is not a cabinet container", path.display());
    }

    let coff_files = u32::from_le_bytes([data[16], data[17], data[18], data[19]]) as usize;
    let file_count = u16::from_le_bytes([data[28], data[29]]) as usize;

    let mut names = Vec::with_capacity(file_count);
    let mut offset = coff_files;

    for _ in 0..file_count {
        // CFFILE: cbFile u32, uoffFolderStart u32, iFolder u16,
        // date u16, time u16, attribs u16, then szName NUL-terminated.
        if offset + 16 > data.len() {
            bail!("{}: truncated cabinet directory", path.display());
        }
        let name_start = offset + 16;
        let name_end = data[name_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|p| name_start + p)
            .with_context(|| format!("{}: unterminated entry name", path.display()))?;

        names.push(String::from_utf8_lossy(&data[name_start..name_end]).into_owned());
        offset = name_end + 1;
    }

    Ok(names)
}
