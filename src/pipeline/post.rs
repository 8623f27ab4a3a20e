//! Post-export processing stages.
//!
//! Everything here runs after the customized image has been committed and
//! exported, so failures are recoverable: the orchestrator logs them and
//! the exported image stands.

use anyhow::{bail, Context, Result};
use std::fs;

use crate::catalog::UpdateClass;
use crate::mount::MountGuard;
use crate::patch;
use crate::process::Cmd;
use crate::repo::UpdateRepository;
use crate::session::ImageSession;

use super::Pipeline;

/// Notify the systems-management layer that the exported image changed.
/// The command is the whole interface; anything beyond it is out of scope.
pub(crate) fn package_manager_update(
    p: &mut Pipeline<'_>,
    session: &mut ImageSession,
) -> Result<()> {
    let selections = p.selections;
    let Some(command) = &selections.post.package_refresh_command else {
        return Ok(());
    };
    Cmd::new(command)
        .arg_path(&session.output_path)
        .error_msg(format!("Package refresh command {command}"))
        .run()?;
    p.log.info(&format!("Ran package refresh: {command}"));
    Ok(())
}

/// Patch the boot image's Windows Setup index with the stored servicing
/// stack and cumulative updates, so media boots with current code.
pub(crate) fn boot_image_update(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let config = p.config;
    let selections = p.selections;
    let servicing = p.servicing;
    let Some(boot_image) = &selections.post.boot_image else {
        return Ok(());
    };
    if !boot_image.exists() {
        bail!("Boot image {} not found", boot_image.display());
    }

    let family = session.family()?;
    let version = session.marketing_version()?.to_string();
    let repo = UpdateRepository::new(&config.update_repo);

    let mut packages = Vec::new();
    for class in [UpdateClass::Ssu, UpdateClass::Lcu] {
        for artifact in repo
            .stored_artifacts(family, &version)?
            .into_iter()
            .filter(|a| a.class == class)
        {
            packages.extend(patch::package_files(&artifact.path)?);
        }
    }
    if packages.is_empty() {
        p.log.skip("No stored SSU/LCU artifacts for the boot image");
        return Ok(());
    }

    let mount_dir = config.staging_dir.join("boot-mount");
    fs::create_dir_all(&mount_dir)?;

    // Index 2 is the Windows Setup environment on standard media.
    servicing.mount_image(boot_image, 2, &mount_dir)?;
    let guard = MountGuard::new(servicing);

    let mut result = Ok(());
    for package in &packages {
        if let Err(err) = servicing.apply_package(&mount_dir, package) {
            result = Err(err.context(format!(
                "Boot image rejected {}",
                package.display()
            )));
            break;
        }
    }

    match result {
        Ok(()) => {
            guard.commit(&mount_dir)?;
            p.log.info(&format!(
                "Boot image {} patched with {} package(s)",
                boot_image.display(),
                packages.len()
            ));
            Ok(())
        }
        Err(err) => {
            // A half-patched boot image must not be committed.
            guard
                .discard(&mount_dir)
                .context("Discard of the boot image mount also failed")?;
            Err(err)
        }
    }
}

/// Stage the exported image and any dynamic-update content into the
/// installation-media tree.
pub(crate) fn media_staging(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let config = p.config;
    let selections = p.selections;
    let Some(media_dir) = &selections.post.media_dir else {
        return Ok(());
    };

    let sources = media_dir.join("sources");
    fs::create_dir_all(&sources)?;
    let dest = sources.join("install.wim");
    fs::copy(&session.output_path, &dest).with_context(|| {
        format!(
            "Could not stage {} into the media tree",
            session.output_path.display()
        )
    })?;
    p.log.info(&format!("Staged exported image at {}", dest.display()));

    let family = session.family()?;
    let version = session.marketing_version()?.to_string();
    let repo = UpdateRepository::new(&config.update_repo);
    for artifact in repo
        .stored_artifacts(family, &version)?
        .into_iter()
        .filter(|a| a.class == UpdateClass::Dynamic)
    {
        match patch::stage_dynamic_content(&artifact.path, media_dir) {
            Ok(()) => p
                .log
                .info(&format!("  Staged dynamic content {}", artifact.name)),
            Err(err) => p
                .log
                .warn(&format!("Dynamic content {} failed", artifact.name), &err),
        }
    }
    Ok(())
}

/// Master a bootable ISO from the staged media tree.
pub(crate) fn iso_creation(p: &mut Pipeline<'_>, _session: &mut ImageSession) -> Result<()> {
    let config = p.config;
    let selections = p.selections;
    let Some(media_dir) = &selections.post.media_dir else {
        bail!("ISO creation requires a staged media tree (post.media_dir)");
    };

    let iso_output = selections
        .post
        .iso_output
        .clone()
        .unwrap_or_else(|| selections.output_dir.join("wimforge.iso"));
    let label = selections.post.iso_label.as_deref().unwrap_or("WIMFORGE");

    let bios_boot = media_dir.join("boot/etfsboot.com");
    let efi_boot = media_dir.join("efi/microsoft/boot/efisys.bin");
    let bootdata = format!(
        "-bootdata:2#p0,e,b{}#pEF,e,b{}",
        bios_boot.display(),
        efi_boot.display()
    );

    Cmd::new(&config.iso_tool)
        .arg("-m")
        .arg("-o")
        .arg("-u2")
        .arg("-udfver102")
        .arg(format!("-l{label}"))
        .arg(bootdata)
        .arg_path(media_dir)
        .arg_path(&iso_output)
        .error_msg("ISO mastering failed")
        .run()?;

    p.log.info(&format!("Created ISO {}", iso_output.display()));
    Ok(())
}
