//! Local update repository.
//!
//! Downloaded update artifacts live in a plain directory tree keyed
//! `<root>/<os family>/<version>/<class>/<artifact>/`. The pruner is the
//! only thing that deletes from it; the resolver only adds.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::UpdateClass;
use crate::winver::OsFamily;

/// One artifact directory found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub class: UpdateClass,
    /// Directory name (sanitized artifact title).
    pub name: String,
    pub path: PathBuf,
}

/// Directory-tree handle for the update repository.
#[derive(Debug, Clone)]
pub struct UpdateRepository {
    root: PathBuf,
}

impl UpdateRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for one OS family + version.
    pub fn version_dir(&self, family: OsFamily, version: &str) -> PathBuf {
        self.root.join(family.key()).join(version)
    }

    /// Directory for one update class under a family/version.
    pub fn class_dir(&self, family: OsFamily, version: &str, class: UpdateClass) -> PathBuf {
        self.version_dir(family, version).join(class.key())
    }

    /// Directory for one artifact; created on demand by the downloader.
    pub fn artifact_dir(
        &self,
        family: OsFamily,
        version: &str,
        class: UpdateClass,
        artifact_name: &str,
    ) -> PathBuf {
        self.class_dir(family, version, class)
            .join(sanitize_name(artifact_name))
    }

    /// All artifact directories stored for a family/version, all classes.
    pub fn stored_artifacts(
        &self,
        family: OsFamily,
        version: &str,
    ) -> Result<Vec<StoredArtifact>> {
        let mut stored = Vec::new();
        let version_dir = self.version_dir(family, version);
        if !version_dir.exists() {
            return Ok(stored);
        }

        for class in UpdateClass::ALL {
            let class_dir = version_dir.join(class.key());
            if !class_dir.exists() {
                continue;
            }
            let entries = fs::read_dir(&class_dir)
                .with_context(|| format!("Could not read {}", class_dir.display()))?;
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    stored.push(StoredArtifact {
                        class: *class,
                        name: entry.file_name().to_string_lossy().into_owned(),
                        path: entry.path(),
                    });
                }
            }
        }
        Ok(stored)
    }

    /// Remove class/version/family directories left empty after pruning.
    pub fn remove_empty_dirs(&self, family: OsFamily, version: &str) -> Result<()> {
        let version_dir = self.version_dir(family, version);
        for class in UpdateClass::ALL {
            remove_if_empty(&version_dir.join(class.key()))?;
        }
        remove_if_empty(&version_dir)?;
        remove_if_empty(&self.root.join(family.key()))?;
        Ok(())
    }
}

fn remove_if_empty(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let is_empty = fs::read_dir(dir)?.next().is_none();
    if is_empty {
        fs::remove_dir(dir)
            .with_context(|| format!("Could not remove empty directory {}", dir.display()))?;
    }
    Ok(())
}

/// Make an artifact title safe as a directory name.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_dir_keys_by_family_version_class_name() {
        let repo = UpdateRepository::new("/repo");
        let dir = repo.artifact_dir(
            OsFamily::Windows10,
            "22H2",
            UpdateClass::Lcu,
            "2024-01 Cumulative Update (KB5034122)",
        );
        assert_eq!(
            dir,
            PathBuf::from("/repo/w10/22H2/lcu/2024-01 Cumulative Update (KB5034122)")
        );
    }

    #[test]
    fn sanitize_replaces_path_hostile_chars() {
        assert_eq!(
            sanitize_name("Update: a/b\\c <KB1?>"),
            "Update_ a_b_c _KB1__"
        );
    }

    #[test]
    fn stored_artifacts_lists_only_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = UpdateRepository::new(tmp.path());
        let a = repo.artifact_dir(OsFamily::Windows11, "23H2", UpdateClass::Ssu, "KB1");
        fs::create_dir_all(&a).unwrap();
        // stray file next to artifact dirs is ignored
        fs::write(
            repo.class_dir(OsFamily::Windows11, "23H2", UpdateClass::Ssu)
                .join("stray.txt"),
            "x",
        )
        .unwrap();

        let stored = repo.stored_artifacts(OsFamily::Windows11, "23H2").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].class, UpdateClass::Ssu);
        assert_eq!(stored[0].name, "KB1");
    }

    #[test]
    fn empty_dirs_are_removed_bottom_up() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = UpdateRepository::new(tmp.path());
        let class_dir = repo.class_dir(OsFamily::Windows10, "22H2", UpdateClass::Lcu);
        fs::create_dir_all(&class_dir).unwrap();

        repo.remove_empty_dirs(OsFamily::Windows10, "22H2").unwrap();

        assert!(!class_dir.exists());
        assert!(!repo.version_dir(OsFamily::Windows10, "22H2").exists());
        assert!(!tmp.path().join("w10").exists());
        // repository root itself stays
        assert!(tmp.path().exists());
    }
}
