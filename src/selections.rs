//! Customization selections: the per-run choice snapshot.
//!
//! Everything a run needs beyond environment configuration lives here, so an
//! unattended caller can drive the whole pipeline from one saved file. The
//! snapshot is read-only once a run starts. Save then load must reproduce an
//! equivalent value.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// When a script hook runs relative to the update stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HookTiming {
    BeforeUpdates,
    AfterUpdates,
    BeforeDismount,
}

/// A user-supplied command run against the mounted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptHook {
    /// Program to run; receives the mount directory as its one argument.
    pub command: String,
    pub timing: HookTiming,
}

/// Which update classes the run applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateToggles {
    #[serde(default)]
    pub ssu: bool,
    #[serde(default)]
    pub lcu: bool,
    #[serde(default)]
    pub adobe: bool,
    #[serde(default)]
    pub dotnet: bool,
    #[serde(default)]
    pub dotnet_cumulative: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub dynamic: bool,
}

impl Default for UpdateToggles {
    fn default() -> Self {
        Self {
            ssu: false,
            lcu: false,
            adobe: false,
            dotnet: false,
            dotnet_cumulative: false,
            optional: false,
            dynamic: false,
        }
    }
}

impl UpdateToggles {
    /// True if any class is enabled.
    pub fn any(&self) -> bool {
        self.ssu
            || self.lcu
            || self.adobe
            || self.dotnet
            || self.dotnet_cumulative
            || self.optional
            || self.dynamic
    }
}

/// Deployment-agent refresh inside the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRefresh {
    /// Directory holding the current agent payload.
    pub source: PathBuf,
    /// Destination inside the mounted image, relative to the mount root.
    pub image_dir: String,
}

/// Optional post-export processing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessing {
    /// Command notifying the systems-management layer that the exported
    /// image changed; receives the exported image path as its one argument.
    #[serde(default)]
    pub package_refresh_command: Option<String>,
    /// Boot image (boot.wim) inside the media tree to patch with SSU/LCU.
    #[serde(default)]
    pub boot_image: Option<PathBuf>,
    /// Installation-media tree to stage the exported image into.
    #[serde(default)]
    pub media_dir: Option<PathBuf>,
    #[serde(default)]
    pub create_iso: bool,
    #[serde(default)]
    pub iso_label: Option<String>,
    #[serde(default)]
    pub iso_output: Option<PathBuf>,
}

/// Full per-run selection snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selections {
    // Source and output
    pub source_image: PathBuf,
    pub image_index: u32,
    pub output_dir: PathBuf,
    /// File name of the exported image (e.g. "install.wim").
    pub output_name: String,
    /// Display name recorded in the exported index.
    pub image_display_name: String,
    pub mount_dir: PathBuf,
    /// Force-clean a busy mount directory instead of halting.
    #[serde(default)]
    pub force_clean_mount: bool,

    // Interactive pause points
    #[serde(default)]
    pub pause_after_mount: bool,
    #[serde(default)]
    pub pause_before_dismount: bool,

    // Injection stages; an empty/None value disables the stage
    #[serde(default)]
    pub language_packs: Vec<PathBuf>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub enable_dotnet35: bool,
    #[serde(default)]
    pub dotnet_source: Option<PathBuf>,
    #[serde(default)]
    pub provisioning_package: Option<PathBuf>,
    #[serde(default)]
    pub driver_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub app_associations: Option<PathBuf>,
    #[serde(default)]
    pub start_layout: Option<PathBuf>,
    #[serde(default)]
    pub registry_scripts: Vec<PathBuf>,
    #[serde(default)]
    pub script_hooks: Vec<ScriptHook>,

    #[serde(default)]
    pub updates: UpdateToggles,

    #[serde(default)]
    pub agent_refresh: Option<AgentRefresh>,

    /// Provisioned packages to remove by name.
    #[serde(default)]
    pub remove_packages: Vec<String>,

    #[serde(default)]
    pub post: PostProcessing,
}

impl Selections {
    /// A minimal snapshot: copy, mount, commit, export, nothing optional.
    pub fn new(source_image: PathBuf, image_index: u32, output_dir: PathBuf) -> Self {
        Self {
            source_image,
            image_index,
            output_dir,
            output_name: "install.wim".to_string(),
            image_display_name: "Customized image".to_string(),
            mount_dir: PathBuf::from("mount"),
            force_clean_mount: false,
            pause_after_mount: false,
            pause_before_dismount: false,
            language_packs: Vec::new(),
            capabilities: Vec::new(),
            enable_dotnet35: false,
            dotnet_source: None,
            provisioning_package: None,
            driver_dirs: Vec::new(),
            app_associations: None,
            start_layout: None,
            registry_scripts: Vec::new(),
            script_hooks: Vec::new(),
            updates: UpdateToggles::default(),
            agent_refresh: None,
            remove_packages: Vec::new(),
            post: PostProcessing::default(),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read selections file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid selections file {}", path.display()))
    }

    /// Save the snapshot as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write selections file {}", path.display()))
    }

    /// Hooks scheduled for a given timing, in declaration order.
    pub fn hooks_at(&self, timing: HookTiming) -> impl Iterator<Item = &ScriptHook> {
        self.script_hooks.iter().filter(move |h| h.timing == timing)
    }
}
