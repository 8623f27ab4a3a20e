//! DISM-backed servicing implementation.
//!
//! Shells out to dism.exe and parses its `Key : Value` report format.
//! All invocations carry a custom error prefix so a failed servicing call
//! names the operation, not just the tool.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::process::Cmd;

use super::{Dismount, ImageInfo, ImageServicing, MountedImage};

/// Production servicing layer driving dism.
pub struct DismServicing {
    tool: String,
}

impl DismServicing {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }

    fn cmd(&self) -> Cmd {
        Cmd::new(&self.tool)
    }
}

impl ImageServicing for DismServicing {
    fn list_mounted_images(&self) -> Result<Vec<MountedImage>> {
        let out = self
            .cmd()
            .switch("Get-MountedImageInfo")
            .error_msg("Querying mounted images failed")
            .run()?;
        Ok(parse_mounted_images(&out.stdout))
    }

    fn mount_image(&self, image: &Path, index: u32, mount_dir: &Path) -> Result<()> {
        self.cmd()
            .switch("Mount-Image")
            .switch_path("ImageFile", image)
            .switch_value("Index", index.to_string())
            .switch_path("MountDir", mount_dir)
            .error_msg(format!("Mounting index {index} of {}", image.display()))
            .run()?;
        Ok(())
    }

    fn dismount_image(&self, mount_dir: &Path, mode: Dismount) -> Result<()> {
        let mode_switch = match mode {
            Dismount::Commit => "Commit",
            Dismount::Discard => "Discard",
        };
        self.cmd()
            .switch("Unmount-Image")
            .switch_path("MountDir", mount_dir)
            .switch(mode_switch)
            .error_msg(format!("Unmounting {} ({mode_switch})", mount_dir.display()))
            .run()?;
        Ok(())
    }

    fn apply_package(&self, mount_dir: &Path, package: &Path) -> Result<()> {
        self.cmd()
            .switch_path("Image", mount_dir)
            .switch("Add-Package")
            .switch_path("PackagePath", package)
            .error_msg(format!("Applying package {}", package.display()))
            .run()?;
        Ok(())
    }

    fn remove_provisioned_package(&self, mount_dir: &Path, name: &str) -> Result<()> {
        self.cmd()
            .switch_path("Image", mount_dir)
            .switch("Remove-ProvisionedAppxPackage")
            .switch_value("PackageName", name)
            .error_msg(format!("Removing provisioned package {name}"))
            .run()?;
        Ok(())
    }

    fn export_image(&self, src: &Path, index: u32, dst: &Path, name: &str) -> Result<()> {
        self.cmd()
            .switch("Export-Image")
            .switch_path("SourceImageFile", src)
            .switch_value("SourceIndex", index.to_string())
            .switch_path("DestinationImageFile", dst)
            .switch_value("DestinationName", name)
            .switch_value("Compress", "max")
            .error_msg(format!("Exporting index {index} to {}", dst.display()))
            .run()?;
        Ok(())
    }

    fn image_info(&self, image: &Path, index: u32) -> Result<ImageInfo> {
        let out = self
            .cmd()
            .switch("Get-ImageInfo")
            .switch_path("ImageFile", image)
            .switch_value("Index", index.to_string())
            .error_msg(format!("Reading metadata of {}", image.display()))
            .run()?;
        match parse_image_info(&out.stdout, index) {
            Some(info) => Ok(info),
            None => bail!(
                "Could not parse image metadata for index {index} of {}",
                image.display()
            ),
        }
    }

    fn image_index_count(&self, image: &Path) -> Result<u32> {
        let out = self
            .cmd()
            .switch("Get-ImageInfo")
            .switch_path("ImageFile", image)
            .error_msg(format!("Listing indexes of {}", image.display()))
            .run()?;
        Ok(count_indexes(&out.stdout))
    }

    fn delete_image_index(&self, image: &Path, index: u32) -> Result<()> {
        self.cmd()
            .switch("Delete-Image")
            .switch_path("ImageFile", image)
            .switch_value("Index", index.to_string())
            .error_msg(format!("Deleting index {index} from {}", image.display()))
            .run()?;
        Ok(())
    }

    fn add_driver(&self, mount_dir: &Path, driver_dir: &Path) -> Result<()> {
        self.cmd()
            .switch_path("Image", mount_dir)
            .switch("Add-Driver")
            .switch_path("Driver", driver_dir)
            .switch("Recurse")
            .error_msg(format!("Injecting drivers from {}", driver_dir.display()))
            .run()?;
        Ok(())
    }

    fn add_provisioning_package(&self, mount_dir: &Path, package: &Path) -> Result<()> {
        self.cmd()
            .switch_path("Image", mount_dir)
            .switch("Add-ProvisioningPackage")
            .switch_path("PackagePath", package)
            .error_msg(format!(
                "Applying provisioning package {}",
                package.display()
            ))
            .run()?;
        Ok(())
    }

    fn enable_feature(
        &self,
        mount_dir: &Path,
        feature: &str,
        source: Option<&Path>,
    ) -> Result<()> {
        let mut cmd = self
            .cmd()
            .switch_path("Image", mount_dir)
            .switch("Enable-Feature")
            .switch_value("FeatureName", feature)
            .switch("All");
        if let Some(src) = source {
            cmd = cmd.switch_path("Source", src).switch("LimitAccess");
        }
        cmd.error_msg(format!("Enabling feature {feature}")).run()?;
        Ok(())
    }

    fn add_capability(
        &self,
        mount_dir: &Path,
        capability: &str,
        source: Option<&Path>,
    ) -> Result<()> {
        let mut cmd = self
            .cmd()
            .switch_path("Image", mount_dir)
            .switch("Add-Capability")
            .switch_value("CapabilityName", capability);
        if let Some(src) = source {
            cmd = cmd.switch_path("Source", src).switch("LimitAccess");
        }
        cmd.error_msg(format!("Adding capability {capability}"))
            .run()?;
        Ok(())
    }

    fn import_app_associations(&self, mount_dir: &Path, xml: &Path) -> Result<()> {
        self.cmd()
            .switch_path("Image", mount_dir)
            .switch_path("Import-DefaultAppAssociations", xml)
            .error_msg("Importing default app associations")
            .run()?;
        Ok(())
    }
}

/// Parse `Key : Value` lines from a dism report block.
fn parse_kv(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    Some((key.trim(), value.trim()))
}

/// Extract mount records from `/Get-MountedImageInfo` output.
fn parse_mounted_images(output: &str) -> Vec<MountedImage> {
    let mut mounts = Vec::new();
    let mut mount_dir: Option<PathBuf> = None;

    for line in output.lines() {
        let Some((key, value)) = parse_kv(line) else {
            continue;
        };
        match key {
            "Mount Dir" => mount_dir = Some(PathBuf::from(value)),
            "Image File" => {
                if let Some(dir) = mount_dir.take() {
                    mounts.push(MountedImage {
                        image_path: PathBuf::from(value),
                        mount_dir: dir,
                    });
                }
            }
            _ => {}
        }
    }
    mounts
}

/// Extract name/version/architecture from `/Get-ImageInfo /Index:n` output.
fn parse_image_info(output: &str, index: u32) -> Option<ImageInfo> {
    let mut name = None;
    let mut build = None;
    let mut architecture = None;

    for line in output.lines() {
        let Some((key, value)) = parse_kv(line) else {
            continue;
        };
        match key {
            "Name" => name = Some(value.to_string()),
            "Version" => build = Some(value.to_string()),
            "Architecture" => architecture = Some(value.to_string()),
            _ => {}
        }
    }

    Some(ImageInfo {
        index,
        name: name?,
        build: build?,
        architecture: architecture.unwrap_or_else(|| "x64".to_string()),
    })
}

/// Count `Index : N` entries in a whole-file `/Get-ImageInfo` report.
fn count_indexes(output: &str) -> u32 {
    output
        .lines()
        .filter_map(parse_kv)
        .filter(|(key, _)| *key == "Index")
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTED: &str = "\
Deployment Image Servicing and Management tool

Mounted images:

Mount Dir : C:\\mnt\\golden
Image File : C:\\staging\\install.wim
Image Index : 1
Mounted Read/Write : Yes
Status : Ok

The operation completed successfully.
";

    const IMAGE_INFO: &str = "\
Details for image : C:\\staging\\install.wim

Index : 3
Name : Windows 11 Enterprise
Description : Windows 11 Enterprise
Version : 10.0.22631
ServicePack Build : 2861
Architecture : x64

The operation completed successfully.
";

    const MULTI_INDEX: &str = "\
Index : 1
Name : Windows 11 Home

Index : 2
Name : Windows 11 Pro

Index : 3
Name : Windows 11 Enterprise
";

    #[test]
    fn parses_mounted_image_records() {
        let mounts = parse_mounted_images(MOUNTED);
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].mount_dir, PathBuf::from("C:\\mnt\\golden"));
        assert_eq!(
            mounts[0].image_path,
            PathBuf::from("C:\\staging\\install.wim")
        );
    }

    #[test]
    fn empty_mount_list_parses_to_nothing() {
        let mounts = parse_mounted_images("Mounted images:\n\nThe operation completed successfully.\n");
        assert!(mounts.is_empty());
    }

    #[test]
    fn parses_image_info_fields() {
        let info = parse_image_info(IMAGE_INFO, 3).unwrap();
        assert_eq!(info.name, "Windows 11 Enterprise");
        assert_eq!(info.build, "10.0.22631");
        assert_eq!(info.architecture, "x64");
        assert_eq!(info.index, 3);
    }

    #[test]
    fn image_info_without_version_is_rejected() {
        assert!(parse_image_info("Name : Foo\n", 1).is_none());
    }

    #[test]
    fn counts_indexes_in_full_report() {
        assert_eq!(count_indexes(MULTI_INDEX), 3);
        assert_eq!(count_indexes(""), 0);
    }
}
