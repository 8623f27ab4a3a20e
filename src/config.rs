//! Configuration management for wimforge.
//!
//! Reads configuration from .env file and environment variables.
//! Environment variables take precedence over .env file. Per-run choices
//! (which stages run, with what inputs) live in `selections`, not here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default community catalog endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://catalog.wimforge.dev/api/v1";

/// Which update catalog backend to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogBackend {
    /// Public community catalog over HTTP.
    Community,
    /// Enterprise management point, read through its local data export.
    Management,
}

/// Environment-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scratch area for image copies and package extraction (default: staging)
    pub staging_dir: PathBuf,
    /// Local update repository root (default: per-user data dir)
    pub update_repo: PathBuf,
    /// Directory for per-run log files (default: logs)
    pub log_dir: PathBuf,
    /// Catalog backend selection
    pub catalog_backend: CatalogBackend,
    /// Community catalog base URL
    pub catalog_url: String,
    /// Management-point data export path (required for the management backend)
    pub management_export: Option<PathBuf>,
    /// Servicing tool binary (default: dism)
    pub dism_tool: String,
    /// ISO mastering tool binary (default: oscdimg)
    pub iso_tool: String,
    /// Optional JSON file overriding the built-in LCU handling table
    pub lcu_handling_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from .env file and environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            if let Ok(content) = fs::read_to_string(&env_path) {
                for line in content.lines() {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    if let Some((key, value)) = line.split_once('=') {
                        let key = key.trim();
                        let value = value.trim().trim_matches('"').trim_matches('\'');
                        env_vars.insert(key.to_string(), value.to_string());
                    }
                }
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        let path_or = |key: &str, default: PathBuf| -> PathBuf {
            env_vars
                .get(key)
                .map(|s| {
                    let path = PathBuf::from(s);
                    if path.is_absolute() {
                        path
                    } else {
                        base_dir.join(path)
                    }
                })
                .unwrap_or(default)
        };

        let staging_dir = path_or("WIMFORGE_STAGING", base_dir.join("staging"));
        let log_dir = path_or("WIMFORGE_LOG_DIR", base_dir.join("logs"));

        let default_repo = dirs::data_local_dir()
            .map(|d| d.join("wimforge/updates"))
            .unwrap_or_else(|| base_dir.join("updates"));
        let update_repo = path_or("WIMFORGE_UPDATE_REPO", default_repo);

        let catalog_backend = match env_vars.get("WIMFORGE_CATALOG").map(String::as_str) {
            Some("management") => CatalogBackend::Management,
            _ => CatalogBackend::Community,
        };

        let catalog_url = env_vars
            .get("WIMFORGE_CATALOG_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());

        let management_export = env_vars
            .get("WIMFORGE_MANAGEMENT_EXPORT")
            .map(|s| {
                let path = PathBuf::from(s);
                if path.is_absolute() {
                    path
                } else {
                    base_dir.join(path)
                }
            });

        let dism_tool = env_vars
            .get("WIMFORGE_DISM")
            .cloned()
            .unwrap_or_else(|| "dism".to_string());

        let iso_tool = env_vars
            .get("WIMFORGE_OSCDIMG")
            .cloned()
            .unwrap_or_else(|| "oscdimg".to_string());

        let lcu_handling_file = env_vars.get("WIMFORGE_LCU_TABLE").map(PathBuf::from);

        Self {
            staging_dir,
            update_repo,
            log_dir,
            catalog_backend,
            catalog_url,
            management_export,
            dism_tool,
            iso_tool,
            lcu_handling_file,
        }
    }

    /// Print configuration for `show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  WIMFORGE_STAGING: {}", self.staging_dir.display());
        println!("  WIMFORGE_UPDATE_REPO: {}", self.update_repo.display());
        println!("  WIMFORGE_LOG_DIR: {}", self.log_dir.display());
        let backend = match self.catalog_backend {
            CatalogBackend::Community => "community",
            CatalogBackend::Management => "management",
        };
        println!("  WIMFORGE_CATALOG: {backend}");
        println!("  WIMFORGE_CATALOG_URL: {}", self.catalog_url);
        match &self.management_export {
            Some(p) => println!("  WIMFORGE_MANAGEMENT_EXPORT: {}", p.display()),
            None => println!("  WIMFORGE_MANAGEMENT_EXPORT: (not set)"),
        }
        println!("  WIMFORGE_DISM: {}", self.dism_tool);
        println!("  WIMFORGE_OSCDIMG: {}", self.iso_tool);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_resolve_under_base_dir() {
        std::env::remove_var("WIMFORGE_STAGING");
        std::env::remove_var("WIMFORGE_CATALOG");
        let base = tempfile::tempdir().unwrap();
        let config = Config::load(base.path());
        assert_eq!(config.staging_dir, base.path().join("staging"));
        assert_eq!(config.catalog_backend, CatalogBackend::Community);
        assert_eq!(config.catalog_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.dism_tool, "dism");
    }

    #[test]
    #[serial]
    fn env_overrides_dotenv() {
        let base = tempfile::tempdir().unwrap();
        fs::write(
            base.path().join(".env"),
            "WIMFORGE_STAGING=from-dotenv\nWIMFORGE_CATALOG=management\n",
        )
        .unwrap();

        std::env::set_var("WIMFORGE_STAGING", "/absolute/override");
        let config = Config::load(base.path());
        std::env::remove_var("WIMFORGE_STAGING");

        assert_eq!(config.staging_dir, PathBuf::from("/absolute/override"));
        // .env still supplies what the environment does not
        assert_eq!(config.catalog_backend, CatalogBackend::Management);
    }

    #[test]
    #[serial]
    fn relative_dotenv_paths_join_base_dir() {
        std::env::remove_var("WIMFORGE_STAGING");
        let base = tempfile::tempdir().unwrap();
        fs::write(base.path().join(".env"), "WIMFORGE_STAGING=scratch\n").unwrap();
        let config = Config::load(base.path());
        assert_eq!(config.staging_dir, base.path().join("scratch"));
    }
}
