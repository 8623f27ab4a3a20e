//! Catalog backends.
//!
//! Two interchangeable sources feed the resolver: the public community
//! catalog over HTTP, and an enterprise management point read through the
//! JSON export its local data interface produces. Both normalize into
//! `CatalogRecord`.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::{CatalogQuery, CatalogRecord, CatalogSource};

/// Public community catalog, queried over HTTP.
pub struct CommunityCatalog {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl CommunityCatalog {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Could not build HTTP client")?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }
}

impl CatalogSource for CommunityCatalog {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>> {
        let url = format!("{}/updates", self.base_url.trim_end_matches('/'));
        let mut request = self
            .client
            .get(&url)
            .query(&[
                ("family", query.family.to_string()),
                ("version", query.version.clone()),
            ]);
        if let Some(arch) = &query.architecture {
            request = request.query(&[("arch", arch.as_str())]);
        }

        let response = request
            .send()
            .with_context(|| format!("Catalog query to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Catalog at {url} rejected the query"))?;

        let records: Vec<CatalogRecord> = response
            .json()
            .context("Catalog response was not a valid record list")?;
        Ok(records)
    }
}

/// Enterprise management catalog, read from its local data export.
pub struct ManagementCatalog {
    export_path: PathBuf,
}

impl ManagementCatalog {
    pub fn new(export_path: impl Into<PathBuf>) -> Self {
        Self {
            export_path: export_path.into(),
        }
    }
}

impl CatalogSource for ManagementCatalog {
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogRecord>> {
        let content = fs::read_to_string(&self.export_path).with_context(|| {
            format!(
                "Could not read management-point export {}",
                self.export_path.display()
            )
        })?;
        let records: Vec<CatalogRecord> = serde_json::from_str(&content).with_context(|| {
            format!(
                "Management-point export {} is not a valid record list",
                self.export_path.display()
            )
        })?;

        // The export covers every target; filter to the requested one here.
        let family = query.family.to_string();
        Ok(records
            .into_iter()
            .filter(|r| r.os_family == family)
            .filter(|r| r.version == query.version)
            .filter(|r| {
                query
                    .architecture
                    .as_ref()
                    .map(|a| &r.architecture == a)
                    .unwrap_or(true)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::winver::OsFamily;

    const EXPORT: &str = r#"[
        {
            "title": "2024-01 Cumulative Update for Windows 11 Version 23H2 (KB5034123)",
            "article_id": "KB5034123",
            "superseded": false,
            "os_family": "Windows 11",
            "version": "23H2",
            "architecture": "x64",
            "files": [{"name": "windows11.0-kb5034123-x64.msu",
                       "url": "https://dl.example.test/kb5034123.msu"}]
        },
        {
            "title": "2024-01 Cumulative Update for Windows 10 Version 22H2 (KB5034122)",
            "article_id": "KB5034122",
            "superseded": false,
            "os_family": "Windows 10",
            "version": "22H2",
            "architecture": "x64",
            "files": [{"name": "windows10.0-kb5034122-x64.msu",
                       "url": "https://dl.example.test/kb5034122.msu"}]
        }
    ]"#;

    #[test]
    fn management_export_filters_by_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, EXPORT).unwrap();

        let catalog = ManagementCatalog::new(&path);
        let records = catalog
            .query(&CatalogQuery {
                family: OsFamily::Windows11,
                version: "23H2".to_string(),
                architecture: Some("x64".to_string()),
            })
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].article_id, "KB5034123");
    }

    #[test]
    fn architecture_none_matches_all() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.json");
        fs::write(&path, EXPORT).unwrap();

        let catalog = ManagementCatalog::new(&path);
        let records = catalog
            .query(&CatalogQuery {
                family: OsFamily::Windows10,
                version: "22H2".to_string(),
                architecture: None,
            })
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn missing_export_is_an_error() {
        let catalog = ManagementCatalog::new("/nonexistent/export.json");
        let err = catalog
            .query(&CatalogQuery {
                family: OsFamily::Windows10,
                version: "22H2".to_string(),
                architecture: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("management-point export"));
    }
}
