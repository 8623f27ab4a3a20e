//! Image servicing subsystem interface.
//!
//! The pipeline never shells out to dism directly; it goes through this
//! trait so the orchestrator can be exercised against a recording double.
//! `DismServicing` is the production implementation.

pub mod dism;

pub use dism::DismServicing;

use anyhow::Result;
use std::path::{Path, PathBuf};

/// How a mounted image is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dismount {
    /// Save changes back into the image container.
    Commit,
    /// Drop all changes.
    Discard,
}

/// One live mount known to the servicing subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedImage {
    pub image_path: PathBuf,
    pub mount_dir: PathBuf,
}

/// Metadata for one image index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub index: u32,
    pub name: String,
    /// Raw build version as reported (e.g. "10.0.19045.3803").
    pub build: String,
    pub architecture: String,
}

/// Operations the pipeline needs from the offline-servicing layer.
///
/// Implementations are synchronous; each call blocks until the underlying
/// tool finishes.
pub trait ImageServicing {
    /// All images currently mounted on this machine.
    fn list_mounted_images(&self) -> Result<Vec<MountedImage>>;

    fn mount_image(&self, image: &Path, index: u32, mount_dir: &Path) -> Result<()>;

    fn dismount_image(&self, mount_dir: &Path, mode: Dismount) -> Result<()>;

    /// Apply an update package (.msu/.cab) to a mounted image.
    fn apply_package(&self, mount_dir: &Path, package: &Path) -> Result<()>;

    fn remove_provisioned_package(&self, mount_dir: &Path, name: &str) -> Result<()>;

    /// Export one index into a new (or appended) image file.
    fn export_image(&self, src: &Path, index: u32, dst: &Path, name: &str) -> Result<()>;

    fn image_info(&self, image: &Path, index: u32) -> Result<ImageInfo>;

    /// Number of indexes in an image file.
    fn image_index_count(&self, image: &Path) -> Result<u32>;

    /// Remove one index from an image file. Later indexes renumber down.
    fn delete_image_index(&self, image: &Path, index: u32) -> Result<()>;

    /// Inject drivers from a folder, recursively.
    fn add_driver(&self, mount_dir: &Path, driver_dir: &Path) -> Result<()>;

    fn add_provisioning_package(&self, mount_dir: &Path, package: &Path) -> Result<()>;

    /// Enable a Windows feature, optionally from offline payload source.
    fn enable_feature(&self, mount_dir: &Path, feature: &str, source: Option<&Path>)
        -> Result<()>;

    /// Add a capability (language/FoD), optionally from offline source.
    fn add_capability(
        &self,
        mount_dir: &Path,
        capability: &str,
        source: Option<&Path>,
    ) -> Result<()>;

    fn import_app_associations(&self, mount_dir: &Path, xml: &Path) -> Result<()>;
}
