//! Image session: the unit of work for one pipeline run.
//!
//! Owned exclusively by the orchestrator. All mutable run state lives
//! here; there is no ambient state beyond the mount point itself.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::selections::Selections;
use crate::winver::OsFamily;

/// State for one run against one image.
#[derive(Debug, Clone)]
pub struct ImageSession {
    /// Original image, never modified.
    pub source_image: PathBuf,
    /// Staging copy all mutations target.
    pub working_image: PathBuf,
    /// Index selected for customization (renumbered to 1 after trimming).
    pub image_index: u32,
    /// Final export destination.
    pub output_path: PathBuf,
    pub mount_dir: PathBuf,
    /// Detected from image metadata during validation.
    pub family: Option<OsFamily>,
    pub marketing_version: Option<String>,
    pub architecture: Option<String>,
    /// Last stage that started, for logs and error reports.
    pub stage_marker: &'static str,
    /// Set when the run is abandoned at a pause point.
    pub discard_requested: bool,
}

impl ImageSession {
    pub fn new(selections: &Selections, staging_dir: &Path) -> Self {
        let file_name = selections
            .source_image
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "install.wim".into());
        Self {
            source_image: selections.source_image.clone(),
            working_image: staging_dir.join(file_name),
            image_index: selections.image_index,
            output_path: selections.output_dir.join(&selections.output_name),
            mount_dir: selections.mount_dir.clone(),
            family: None,
            marketing_version: None,
            architecture: None,
            stage_marker: "created",
            discard_requested: false,
        }
    }

    /// Family is known once validation has run.
    pub fn family(&self) -> Result<OsFamily> {
        self.family.context("image family not yet detected")
    }

    pub fn marketing_version(&self) -> Result<&str> {
        self.marketing_version
            .as_deref()
            .context("marketing version not yet detected")
    }
}
