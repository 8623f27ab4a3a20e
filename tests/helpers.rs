//! Shared test helpers: a recording servicing double, canned catalog
//! sources, and selection/config builders.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use wimforge::catalog::{CatalogQuery, CatalogRecord, CatalogSource};
use wimforge::config::{CatalogBackend, Config};
use wimforge::pipeline::{PauseDecision, Prompter};
use wimforge::selections::Selections;
use wimforge::servicing::{Dismount, ImageInfo, ImageServicing, MountedImage};

/// Recording servicing double.
///
/// Records every call in order as a readable string, keeps a live mount
/// list, and materializes exports as real file copies so tests can assert
/// on the output tree.
pub struct MockServicing {
    pub calls: RefCell<Vec<String>>,
    pub mounted: RefCell<Vec<MountedImage>>,
    /// Build reported by image_info.
    pub image_build: String,
    pub index_count: u32,
    pub fail_mount: bool,
    pub fail_commit: bool,
    pub fail_export: bool,
}

impl MockServicing {
    pub fn new(image_build: &str) -> Self {
        Self {
            calls: RefCell::new(Vec::new()),
            mounted: RefCell::new(Vec::new()),
            image_build: image_build.to_string(),
            index_count: 1,
            fail_mount: false,
            fail_commit: false,
            fail_export: false,
        }
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    /// Calls matching a prefix, in order.
    pub fn calls_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl ImageServicing for MockServicing {
    fn list_mounted_images(&self) -> Result<Vec<MountedImage>> {
        Ok(self.mounted.borrow().clone())
    }

    fn mount_image(&self, image: &Path, index: u32, mount_dir: &Path) -> Result<()> {
        self.record(format!("mount index={index}"));
        if self.fail_mount {
            bail!("simulated mount failure");
        }
        self.mounted.borrow_mut().push(MountedImage {
            image_path: image.to_path_buf(),
            mount_dir: mount_dir.to_path_buf(),
        });
        Ok(())
    }

    fn dismount_image(&self, mount_dir: &Path, mode: Dismount) -> Result<()> {
        let mode_name = match mode {
            Dismount::Commit => "commit",
            Dismount::Discard => "discard",
        };
        self.record(format!("dismount {mode_name}"));
        if mode == Dismount::Commit && self.fail_commit {
            bail!("simulated commit failure");
        }
        self.mounted
            .borrow_mut()
            .retain(|m| m.mount_dir != mount_dir);
        Ok(())
    }

    fn apply_package(&self, _mount_dir: &Path, package: &Path) -> Result<()> {
        let name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("apply_package {name}"));
        Ok(())
    }

    fn remove_provisioned_package(&self, _mount_dir: &Path, name: &str) -> Result<()> {
        self.record(format!("remove_provisioned {name}"));
        Ok(())
    }

    fn export_image(&self, src: &Path, index: u32, dst: &Path, name: &str) -> Result<()> {
        self.record(format!("export index={index} name={name}"));
        if self.fail_export {
            bail!("simulated export failure");
        }
        fs::copy(src, dst)?;
        Ok(())
    }

    fn image_info(&self, _image: &Path, index: u32) -> Result<ImageInfo> {
        Ok(ImageInfo {
            index,
            name: "Windows Enterprise".to_string(),
            build: self.image_build.clone(),
            architecture: "x64".to_string(),
        })
    }

    fn image_index_count(&self, _image: &Path) -> Result<u32> {
        Ok(self.index_count)
    }

    fn delete_image_index(&self, _image: &Path, index: u32) -> Result<()> {
        self.record(format!("delete_index {index}"));
        Ok(())
    }

    fn add_driver(&self, _mount_dir: &Path, driver_dir: &Path) -> Result<()> {
        self.record(format!("add_driver {}", driver_dir.display()));
        Ok(())
    }

    fn add_provisioning_package(&self, _mount_dir: &Path, package: &Path) -> Result<()> {
        self.record(format!(
            "add_provisioning {}",
            package.file_name().unwrap_or_default().to_string_lossy()
        ));
        Ok(())
    }

    fn enable_feature(
        &self,
        _mount_dir: &Path,
        feature: &str,
        _source: Option<&Path>,
    ) -> Result<()> {
        self.record(format!("enable_feature {feature}"));
        Ok(())
    }

    fn add_capability(
        &self,
        _mount_dir: &Path,
        capability: &str,
        _source: Option<&Path>,
    ) -> Result<()> {
        self.record(format!("add_capability {capability}"));
        Ok(())
    }

    fn import_app_associations(&self, _mount_dir: &Path, _xml: &Path) -> Result<()> {
        self.record("import_app_associations".to_string());
        Ok(())
    }
}

/// Catalog source returning a fixed record list.
pub struct FixedCatalog(pub Vec<CatalogRecord>);

impl CatalogSource for FixedCatalog {
    fn query(&self, _query: &CatalogQuery) -> Result<Vec<CatalogRecord>> {
        Ok(self.0.clone())
    }
}

/// Catalog source with nothing in it.
pub struct EmptyCatalog;

impl CatalogSource for EmptyCatalog {
    fn query(&self, _query: &CatalogQuery) -> Result<Vec<CatalogRecord>> {
        Ok(Vec::new())
    }
}

/// Prompter answering every pause the same way.
pub struct AutoPrompter(pub PauseDecision);

impl Prompter for AutoPrompter {
    fn pause(&self, _point: &str) -> Result<PauseDecision> {
        Ok(self.0)
    }
}

/// Environment rooted in a temp directory: config, a mountable source
/// image, and a minimal selections snapshot.
pub struct TestEnv {
    pub root: tempfile::TempDir,
    pub config: Config,
    pub selections: Selections,
}

impl TestEnv {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();

        let source_image = base.join("imports/install.wim");
        fs::create_dir_all(source_image.parent().unwrap()).unwrap();
        fs::write(&source_image, b"wim-image-bytes").unwrap();

        let config = Config {
            staging_dir: base.join("staging"),
            update_repo: base.join("updates"),
            log_dir: base.join("logs"),
            catalog_backend: CatalogBackend::Community,
            catalog_url: "https://catalog.invalid".to_string(),
            management_export: None,
            dism_tool: "dism".to_string(),
            iso_tool: "oscdimg".to_string(),
            lcu_handling_file: None,
        };

        let mut selections = Selections::new(source_image, 1, base.join("out"));
        selections.mount_dir = base.join("mnt");

        Self {
            root,
            config,
            selections,
        }
    }

    pub fn base(&self) -> &Path {
        self.root.path()
    }

    pub fn output_path(&self) -> PathBuf {
        self.selections.output_dir.join(&self.selections.output_name)
    }
}
