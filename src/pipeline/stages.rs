//! Stage implementations for the main pipeline pass.
//!
//! Structural stages (validate, copy, trim, mount, dismount, export)
//! propagate their errors to the orchestrator, which maps them to a
//! terminal state. Injection stages degrade per unit of work: one failed
//! pack, driver folder, or artifact is logged and the rest continue.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::catalog::{self, download, UpdateClass};
use crate::mount::MountGuard;
use crate::patch::{self, LcuHandling};
use crate::process::Cmd;
use crate::repo::UpdateRepository;
use crate::selections::{HookTiming, UpdateToggles};
use crate::session::ImageSession;
use crate::winver::{self, Resolution};

use super::{ensure_mount_target, Pipeline};

/// Validate inputs, detect the image version, and clear the mount target.
pub(crate) fn validate(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    if !session.source_image.exists() {
        bail!("Source image {} not found", session.source_image.display());
    }

    let info = p
        .servicing
        .image_info(&session.source_image, session.image_index)?;
    match winver::resolve(&info.build) {
        Resolution::Supported { family, tag } => {
            session.family = Some(family);
            session.marketing_version = Some(tag.to_string());
            session.architecture = Some(info.architecture.clone());
            p.log.info(&format!(
                "Detected {} {} (build {}, {})",
                family, tag, info.build, info.architecture
            ));
        }
        Resolution::Unsupported => {
            bail!(
                "Build {} belongs to a deprecated OS family and cannot be serviced",
                info.build
            );
        }
        Resolution::Unknown => {
            bail!("Build {} is not in the supported build table", info.build);
        }
    }

    fs::create_dir_all(&p.selections.output_dir).with_context(|| {
        format!(
            "Output directory {} is not writable",
            p.selections.output_dir.display()
        )
    })?;

    let guard = MountGuard::new(p.servicing);
    ensure_mount_target(&guard, session, p.selections.force_clean_mount)?;
    p.log.info("Mount target ready");
    Ok(())
}

/// Copy the source image into staging; the original is never modified.
pub(crate) fn copy_source(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    fs::create_dir_all(&p.config.staging_dir)?;
    if session.working_image.exists() {
        fs::remove_file(&session.working_image)?;
    }
    fs::copy(&session.source_image, &session.working_image).with_context(|| {
        format!(
            "Could not copy {} into staging",
            session.source_image.display()
        )
    })?;
    p.log.info(&format!(
        "Staged working copy at {}",
        session.working_image.display()
    ));
    Ok(())
}

/// Drop every index except the chosen one. Deleting renumbers later
/// indexes, so removal runs top-down and the survivor becomes index 1.
pub(crate) fn trim_indexes(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let count = p.servicing.image_index_count(&session.working_image)?;
    if session.image_index == 0 || session.image_index > count {
        bail!(
            "Index {} out of range; image has {count} index(es)",
            session.image_index
        );
    }
    if count == 1 {
        p.log.info("Image has a single index, nothing to trim");
        return Ok(());
    }

    for index in ((session.image_index + 1)..=count).rev() {
        p.servicing
            .delete_image_index(&session.working_image, index)?;
        p.log.info(&format!("  Removed index {index}"));
    }
    for index in (1..session.image_index).rev() {
        p.servicing
            .delete_image_index(&session.working_image, index)?;
        p.log.info(&format!("  Removed index {index}"));
    }

    session.image_index = 1;
    p.log.info("Remaining index renumbered to 1");
    Ok(())
}

pub(crate) fn mount(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    fs::create_dir_all(&session.mount_dir)?;
    p.servicing
        .mount_image(&session.working_image, session.image_index, &session.mount_dir)?;
    p.log.info(&format!(
        "Mounted index {} at {}",
        session.image_index,
        session.mount_dir.display()
    ));
    Ok(())
}

/// Apply language packs and capability selections. Per-item failures are
/// recoverable.
pub(crate) fn language_resources(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let selections = p.selections;
    for pack in &selections.language_packs {
        match p.servicing.apply_package(&session.mount_dir, pack) {
            Ok(()) => p.log.info(&format!("  Applied language pack {}", pack.display())),
            Err(err) => p
                .log
                .warn(&format!("Language pack {} failed", pack.display()), &err),
        }
    }
    for capability in &selections.capabilities {
        match p
            .servicing
            .add_capability(&session.mount_dir, capability, None)
        {
            Ok(()) => p.log.info(&format!("  Added capability {capability}")),
            Err(err) => p
                .log
                .warn(&format!("Capability {capability} failed"), &err),
        }
    }
    Ok(())
}

pub(crate) fn dotnet(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    p.servicing.enable_feature(
        &session.mount_dir,
        "NetFx3",
        p.selections.dotnet_source.as_deref(),
    )?;
    p.log.info("Enabled .NET Framework 3.5");
    Ok(())
}

pub(crate) fn provisioning(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let selections = p.selections;
    if let Some(package) = &selections.provisioning_package {
        p.servicing
            .add_provisioning_package(&session.mount_dir, package)?;
        p.log
            .info(&format!("Applied provisioning package {}", package.display()));
    }
    Ok(())
}

pub(crate) fn drivers(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let selections = p.selections;
    for dir in &selections.driver_dirs {
        match p.servicing.add_driver(&session.mount_dir, dir) {
            Ok(()) => p.log.info(&format!("  Injected drivers from {}", dir.display())),
            Err(err) => p
                .log
                .warn(&format!("Driver folder {} failed", dir.display()), &err),
        }
    }
    Ok(())
}

pub(crate) fn app_associations(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let selections = p.selections;
    if let Some(xml) = &selections.app_associations {
        p.servicing
            .import_app_associations(&session.mount_dir, xml)?;
        p.log
            .info(&format!("Imported app associations from {}", xml.display()));
    }
    Ok(())
}

/// Start layout is a plain file drop into the default user profile.
pub(crate) fn start_layout(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let Some(layout) = &p.selections.start_layout else {
        return Ok(());
    };
    let dest = session
        .mount_dir
        .join("Users/Default/AppData/Local/Microsoft/Windows/Shell/LayoutModification.xml");
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(layout, &dest)
        .with_context(|| format!("Could not place start layout {}", layout.display()))?;
    p.log.info("Placed start layout");
    Ok(())
}

/// Offline registry edits: load the image's SOFTWARE hive under a
/// well-known key, import the scripts, then always unload. Scripts must
/// address `HKLM\WIMFORGE_OFFLINE`.
pub(crate) fn registry(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    const HIVE_KEY: &str = "HKLM\\WIMFORGE_OFFLINE";
    let selections = p.selections;
    let hive = session.mount_dir.join("Windows/System32/config/SOFTWARE");

    Cmd::new("reg")
        .arg("load")
        .arg(HIVE_KEY)
        .arg_path(&hive)
        .error_msg("Loading offline SOFTWARE hive")
        .run()?;

    for script in &selections.registry_scripts {
        let result = Cmd::new("reg")
            .arg("import")
            .arg_path(script)
            .error_msg(format!("Importing {}", script.display()))
            .run();
        match result {
            Ok(_) => p.log.info(&format!("  Imported {}", script.display())),
            Err(err) => p
                .log
                .warn(&format!("Registry script {} failed", script.display()), &err),
        }
    }

    // The hive must never stay loaded, even after import failures.
    Cmd::new("reg")
        .arg("unload")
        .arg(HIVE_KEY)
        .error_msg("Unloading offline SOFTWARE hive")
        .run()?;
    Ok(())
}

fn class_enabled(toggles: &UpdateToggles, class: UpdateClass) -> bool {
    match class {
        UpdateClass::Ssu => toggles.ssu,
        UpdateClass::Lcu => toggles.lcu,
        UpdateClass::AdobeUpdate => toggles.adobe,
        UpdateClass::DotNet => toggles.dotnet,
        UpdateClass::DotNetCumulative => toggles.dotnet_cumulative,
        UpdateClass::Optional => toggles.optional,
        UpdateClass::Dynamic => toggles.dynamic,
    }
}

fn run_hooks(p: &mut Pipeline<'_>, session: &ImageSession, timing: HookTiming) {
    let hooks: Vec<_> = p.selections.hooks_at(timing).cloned().collect();
    for hook in hooks {
        let result = Cmd::new(&hook.command)
            .arg_path(&session.mount_dir)
            .error_msg(format!("Script hook {}", hook.command))
            .run();
        match result {
            Ok(_) => p.log.info(&format!("  Ran hook {}", hook.command)),
            Err(err) => p.log.warn(&format!("Hook {} failed", hook.command), &err),
        }
    }
}

/// Prune, resolve, download, then apply each enabled class in the
/// mandatory order. The pruner runs to completion before resolution.
pub(crate) fn updates(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    run_hooks(p, session, HookTiming::BeforeUpdates);

    let toggles = p.selections.updates.clone();
    if toggles.any() {
        let family = session.family()?;
        let version = session.marketing_version()?.to_string();
        let architecture = session
            .architecture
            .clone()
            .context("architecture not detected")?;

        // Shared collaborator refs, copied out before the log reborrow.
        let config = p.config;
        let selections = p.selections;
        let servicing = p.servicing;
        let catalog_source = p.catalog;
        let repo = UpdateRepository::new(&config.update_repo);
        let log = &mut *p.log;

        let removed = catalog::prune(&repo, catalog_source, family, &version, log)?;
        log.info(&format!("Pruned {removed} superseded artifact(s)"));

        let artifacts = catalog::resolve(
            catalog_source,
            family,
            &version,
            &architecture,
            toggles.optional,
            toggles.dynamic,
            log,
        )?;
        log.info(&format!("Catalog resolved {} artifact(s)", artifacts.len()));

        let client = reqwest::blocking::Client::builder()
            .build()
            .context("Could not build download client")?;
        for artifact in &artifacts {
            if let Err(err) = download::fetch_artifact(&client, artifact, &repo, log) {
                log.warn(&format!("Download of {} failed", artifact.title), &err);
            }
        }

        let lcu_handling = LcuHandling::load(config.lcu_handling_file.as_deref())?;
        let work_dir = config.staging_dir.join("work");
        for class in UpdateClass::APPLY_ORDER {
            if !class_enabled(&toggles, *class) {
                log.skip(&format!("Update class {} disabled", class.key()));
                continue;
            }
            let summary = patch::apply_class(
                servicing,
                session,
                &repo,
                *class,
                &lcu_handling,
                &work_dir,
                selections.post.media_dir.as_deref(),
                log,
            )?;
            log.info(&format!(
                "Class {}: {} applied, {} skipped, {} failed",
                class.key(),
                summary.applied,
                summary.skipped,
                summary.failed
            ));
        }
    } else {
        p.log.skip("No update classes enabled");
    }

    run_hooks(p, session, HookTiming::AfterUpdates);
    Ok(())
}

/// Refresh the deployment agent payload inside the image.
pub(crate) fn agent_refresh(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let selections = p.selections;
    let Some(agent) = &selections.agent_refresh else {
        return Ok(());
    };
    let dest = session.mount_dir.join(&agent.image_dir);
    copy_tree(&agent.source, &dest)?;
    p.log.info(&format!(
        "Refreshed agent payload into {}",
        agent.image_dir
    ));
    Ok(())
}

pub(crate) fn package_removal(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    let selections = p.selections;
    for name in &selections.remove_packages {
        match p
            .servicing
            .remove_provisioned_package(&session.mount_dir, name)
        {
            Ok(()) => p.log.info(&format!("  Removed {name}")),
            Err(err) => p.log.warn(&format!("Removal of {name} failed"), &err),
        }
    }
    Ok(())
}

/// Run pre-dismount hooks, then commit and release the mount.
pub(crate) fn dismount_commit(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    run_hooks(p, session, HookTiming::BeforeDismount);
    let guard = MountGuard::new(p.servicing);
    guard.commit(&session.mount_dir)?;
    p.log.info("Committed and released the mount");
    Ok(())
}

/// Export the customized index to the configured output. A stale output
/// file would make dism append a second index, so it is removed first.
pub(crate) fn export(p: &mut Pipeline<'_>, session: &mut ImageSession) -> Result<()> {
    if session.output_path.exists() {
        fs::remove_file(&session.output_path)?;
    }
    p.servicing.export_image(
        &session.working_image,
        session.image_index,
        &session.output_path,
        &p.selections.image_display_name,
    )?;
    p.log.info(&format!(
        "Exported to {}",
        session.output_path.display()
    ));
    Ok(())
}

/// Copy a directory tree into the image.
pub(crate) fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .context("walked outside the source tree")?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Could not copy {} into the image", entry.path().display())
            })?;
        }
    }
    Ok(())
}
