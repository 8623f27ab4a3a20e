//! Catalog resolution and pruning through the management-point provider.

use std::collections::HashSet;
use std::fs;

use wimforge::catalog::{self, ManagementCatalog, UpdateClass};
use wimforge::logging::RunLog;
use wimforge::repo::UpdateRepository;
use wimforge::winver::OsFamily;

const EXPORT: &str = r#"[
    {
        "title": "2024-01 Servicing Stack Update for Windows 10 Version 22H2 (KB5034440)",
        "article_id": "KB5034440",
        "superseded": false,
        "os_family": "Windows 10",
        "version": "22H2",
        "architecture": "x64",
        "files": [
            {"name": "ssu-19041.3803-x64.cab", "url": "https://dl.invalid/ssu.cab"}
        ]
    },
    {
        "title": "2024-01 Cumulative Update for Windows 10 Version 22H2 (KB5034122)",
        "article_id": "KB5034122",
        "superseded": false,
        "os_family": "Windows 10",
        "version": "22H2",
        "architecture": "x64",
        "files": [
            {"name": "windows10.0-kb5034122-x64.msu", "url": "https://dl.invalid/full.msu"},
            {"name": "windows10.0-kb5034122-x64-express.cab", "url": "https://dl.invalid/express.cab"},
            {"name": "kb5034122-install-notes.txt", "url": "https://dl.invalid/notes.txt"}
        ]
    },
    {
        "title": "2023-12 Cumulative Update for Windows 10 Version 22H2 (KB5033372)",
        "article_id": "KB5033372",
        "superseded": true,
        "os_family": "Windows 10",
        "version": "22H2",
        "architecture": "x64",
        "files": [
            {"name": "windows10.0-kb5033372-x64.msu", "url": "https://dl.invalid/old.msu"}
        ]
    },
    {
        "title": "2024-01 Cumulative Update re-release (KB5034122)",
        "article_id": "KB5034122",
        "superseded": false,
        "os_family": "Windows 10",
        "version": "22H2",
        "architecture": "x64",
        "files": [
            {"name": "WINDOWS10.0-KB5034122-x64.msu", "url": "https://dl.invalid/full2.msu"}
        ]
    }
]"#;

fn export_catalog(dir: &std::path::Path) -> ManagementCatalog {
    let path = dir.join("export.json");
    fs::write(&path, EXPORT).unwrap();
    ManagementCatalog::new(path)
}

#[test]
fn resolver_emits_unique_allowlisted_files_only() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog_source = export_catalog(tmp.path());
    let mut log = RunLog::stdout_only();

    let artifacts = catalog::resolve(
        &catalog_source,
        OsFamily::Windows10,
        "22H2",
        "x64",
        false,
        false,
        &mut log,
    )
    .unwrap();

    // superseded KB5033372 gone; re-release deduplicated away entirely
    assert_eq!(artifacts.len(), 2);

    let mut seen = HashSet::new();
    for artifact in &artifacts {
        for file in &artifact.files {
            let lower = file.name.to_lowercase();
            assert!(
                lower.ends_with(".msu") || lower.ends_with(".cab"),
                "{} outside the allow-list",
                file.name
            );
            assert!(!lower.contains("express"), "{} is online-only", file.name);
            assert!(
                seen.insert((artifact.class, lower)),
                "duplicate content file {}",
                file.name
            );
        }
    }
}

#[test]
fn prune_through_the_provider_is_monotonic() {
    let tmp = tempfile::tempdir().unwrap();
    let catalog_source = export_catalog(tmp.path());
    let repo = UpdateRepository::new(tmp.path().join("updates"));
    let mut log = RunLog::stdout_only();

    let current = repo.artifact_dir(
        OsFamily::Windows10,
        "22H2",
        UpdateClass::Lcu,
        "2024-01 Cumulative Update for Windows 10 Version 22H2 (KB5034122)",
    );
    let superseded = repo.artifact_dir(
        OsFamily::Windows10,
        "22H2",
        UpdateClass::Lcu,
        "2023-12 Cumulative Update for Windows 10 Version 22H2 (KB5033372)",
    );
    let vanished = repo.artifact_dir(
        OsFamily::Windows10,
        "22H2",
        UpdateClass::DotNet,
        "Removed .NET Framework update (KB0000000)",
    );
    for dir in [&current, &superseded, &vanished] {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("payload.msu"), b"payload").unwrap();
    }

    let removed = catalog::prune(
        &repo,
        &catalog_source,
        OsFamily::Windows10,
        "22H2",
        &mut log,
    )
    .unwrap();
    assert_eq!(removed, 2);
    assert!(current.exists());
    assert!(!superseded.exists());
    assert!(!vanished.exists());
    // the emptied dotnet class folder went with its last artifact
    assert!(!repo
        .class_dir(OsFamily::Windows10, "22H2", UpdateClass::DotNet)
        .exists());

    let removed_again = catalog::prune(
        &repo,
        &catalog_source,
        OsFamily::Windows10,
        "22H2",
        &mut log,
    )
    .unwrap();
    assert_eq!(removed_again, 0);
    assert!(current.exists());
}
