//! Update catalog resolution.
//!
//! Queries one of two interchangeable catalog backends, classifies matching
//! entries through the ordered rule table, filters content files to what
//! offline servicing can actually consume, and hands back deduplicated
//! artifacts ready for download.

pub mod content;
pub mod download;
pub mod providers;
pub mod prune;
pub mod rules;

pub use providers::{CommunityCatalog, ManagementCatalog};
pub use prune::prune;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::logging::RunLog;
use crate::winver::OsFamily;

/// Update classes, in the order the pipeline applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateClass {
    Ssu,
    Lcu,
    AdobeUpdate,
    DotNet,
    DotNetCumulative,
    Optional,
    Dynamic,
}

impl UpdateClass {
    /// Every class, repository iteration order.
    pub const ALL: &'static [UpdateClass] = &[
        UpdateClass::Ssu,
        UpdateClass::Lcu,
        UpdateClass::AdobeUpdate,
        UpdateClass::DotNet,
        UpdateClass::DotNetCumulative,
        UpdateClass::Optional,
        UpdateClass::Dynamic,
    ];

    /// Classes applied to the mounted image, mandatory apply order.
    /// Dynamic is absent: its content goes to media staging instead.
    pub const APPLY_ORDER: &'static [UpdateClass] = &[
        UpdateClass::Ssu,
        UpdateClass::Lcu,
        UpdateClass::AdobeUpdate,
        UpdateClass::DotNet,
        UpdateClass::DotNetCumulative,
        UpdateClass::Optional,
    ];

    /// Directory-friendly key.
    pub fn key(&self) -> &'static str {
        match self {
            UpdateClass::Ssu => "ssu",
            UpdateClass::Lcu => "lcu",
            UpdateClass::AdobeUpdate => "adobe",
            UpdateClass::DotNet => "dotnet",
            UpdateClass::DotNetCumulative => "dotnet-cu",
            UpdateClass::Optional => "optional",
            UpdateClass::Dynamic => "dynamic",
        }
    }
}

impl fmt::Display for UpdateClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateClass::Ssu => "Servicing stack update",
            UpdateClass::Lcu => "Cumulative update",
            UpdateClass::AdobeUpdate => "Adobe update",
            UpdateClass::DotNet => ".NET Framework update",
            UpdateClass::DotNetCumulative => ".NET cumulative update",
            UpdateClass::Optional => "Optional update",
            UpdateClass::Dynamic => "Dynamic update",
        };
        write!(f, "{name}")
    }
}

/// One downloadable file of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFile {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Raw catalog entry as returned by a backend, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRecord {
    pub title: String,
    pub article_id: String,
    #[serde(default)]
    pub superseded: bool,
    pub os_family: String,
    pub version: String,
    pub architecture: String,
    pub files: Vec<ContentFile>,
}

/// A classified, filtered, current update ready for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateArtifact {
    pub title: String,
    pub article_id: String,
    pub class: UpdateClass,
    pub family: OsFamily,
    pub version: String,
    pub architecture: String,
    pub files: Vec<ContentFile>,
}

/// Filter for a catalog query.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub family: OsFamily,
    pub version: String,
    /// None matches any architecture (used by the pruner).
    pub architecture: Option<String>,
}

/// A catalog backend. Both providers normalize into `CatalogRecord`.
pub trait CatalogSource {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>>;
}

/// Resolve the current update set for one OS family/version/architecture.
///
/// Superseded records are dropped, entries are classified by the rule
/// table, content files are filtered to the offline-serviceable set, and
/// duplicate file names within a class are emitted only once.
pub fn resolve(
    source: &dyn CatalogSource,
    family: OsFamily,
    version: &str,
    architecture: &str,
    include_optional: bool,
    include_dynamic: bool,
    log: &mut RunLog,
) -> Result<Vec<UpdateArtifact>> {
    let query = CatalogQuery {
        family,
        version: version.to_string(),
        architecture: Some(architecture.to_string()),
    };
    let records = source.query(&query)?;

    let mut artifacts = Vec::new();
    let mut seen_files: HashSet<(UpdateClass, String)> = HashSet::new();

    for record in records {
        if record.superseded {
            continue;
        }
        // Providers pre-filter, but a record that slipped through with the
        // wrong target must not reach the repository.
        if record.os_family != family.to_string()
            || record.version != version
            || record.architecture != architecture
        {
            continue;
        }

        let class = rules::classify(&record.title);
        match class {
            UpdateClass::Optional if !include_optional => {
                log.skip(&format!("Optional update not requested: {}", record.title));
                continue;
            }
            UpdateClass::Dynamic if !include_dynamic => {
                log.skip(&format!("Dynamic update not requested: {}", record.title));
                continue;
            }
            _ => {}
        }

        let mut files = Vec::new();
        for file in record.files {
            if let Some(reason) = content::rejection(&file.name) {
                log.skip(&format!("{}: {reason}", file.name));
                continue;
            }
            let dedup_key = (class, file.name.to_ascii_lowercase());
            if !seen_files.insert(dedup_key) {
                continue;
            }
            files.push(file);
        }

        if files.is_empty() {
            log.skip(&format!(
                "{}: no offline-serviceable content files",
                record.title
            ));
            continue;
        }

        artifacts.push(UpdateArtifact {
            title: record.title,
            article_id: record.article_id,
            class,
            family,
            version: version.to_string(),
            architecture: architecture.to_string(),
            files,
        });
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource(Vec<CatalogRecord>);

    impl CatalogSource for FixedSource {
        fn query(&self, _query: &CatalogQuery) -> Result<Vec<CatalogRecord>> {
            Ok(self.0.clone())
        }
    }

    fn record(title: &str, files: &[&str]) -> CatalogRecord {
        CatalogRecord {
            title: title.to_string(),
            article_id: "KB5000001".to_string(),
            superseded: false,
            os_family: "Windows 10".to_string(),
            version: "22H2".to_string(),
            architecture: "x64".to_string(),
            files: files
                .iter()
                .map(|name| ContentFile {
                    name: name.to_string(),
                    url: format!("https://dl.example.test/{name}"),
                    size: Some(1024),
                    sha256: None,
                })
                .collect(),
        }
    }

    fn resolve_fixed(records: Vec<CatalogRecord>, optional: bool) -> Vec<UpdateArtifact> {
        let source = FixedSource(records);
        let mut log = RunLog::stdout_only();
        resolve(
            &source,
            OsFamily::Windows10,
            "22H2",
            "x64",
            optional,
            false,
            &mut log,
        )
        .unwrap()
    }

    #[test]
    fn superseded_records_are_dropped() {
        let mut superseded = record("2023-11 Cumulative Update (KB5032189)", &["old.msu"]);
        superseded.superseded = true;
        let artifacts = resolve_fixed(
            vec![
                superseded,
                record("2024-01 Cumulative Update (KB5034122)", &["new.msu"]),
            ],
            false,
        );
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].files[0].name, "new.msu");
    }

    #[test]
    fn mismatched_target_records_are_dropped() {
        let mut wrong_arch = record("2024-01 Cumulative Update (KB5034122)", &["arm.msu"]);
        wrong_arch.architecture = "arm64".to_string();
        assert!(resolve_fixed(vec![wrong_arch], false).is_empty());
    }

    #[test]
    fn no_duplicate_file_names_within_a_class() {
        let artifacts = resolve_fixed(
            vec![
                record("2024-01 Cumulative Update (KB5034122)", &["windows10-kb.msu"]),
                record(
                    "2024-01 Cumulative Update re-release (KB5034122)",
                    &["WINDOWS10-KB.msu"],
                ),
            ],
            false,
        );
        let total_files: usize = artifacts.iter().map(|a| a.files.len()).sum();
        assert_eq!(total_files, 1);
    }

    #[test]
    fn disallowed_extensions_never_emitted() {
        let artifacts = resolve_fixed(
            vec![record(
                "2024-01 Cumulative Update (KB5034122)",
                &["update.msu", "readme.txt", "tool.exe"],
            )],
            false,
        );
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].files.len(), 1);
        assert_eq!(artifacts[0].files[0].name, "update.msu");
    }

    #[test]
    fn unmatched_entries_are_optional_and_gated() {
        let records = vec![record("Intel display driver refresh", &["driver.cab"])];
        assert!(resolve_fixed(records.clone(), false).is_empty());

        let artifacts = resolve_fixed(records, true);
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].class, UpdateClass::Optional);
    }

    #[test]
    fn record_with_only_rejected_files_is_dropped() {
        let artifacts = resolve_fixed(
            vec![record(
                "2024-01 Cumulative Update (KB5034122)",
                &["windows10-kb-express.cab"],
            )],
            false,
        );
        assert!(artifacts.is_empty());
    }
}
