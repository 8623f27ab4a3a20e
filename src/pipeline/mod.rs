//! Build pipeline orchestrator.
//!
//! One run is a single pass over a fixed, ordered stage list. Every stage
//! is a tagged variant carrying its own enabled state, so the loop below
//! is the only sequencing logic in the crate: no scattered conditionals,
//! and a disabled stage always leaves an explicit skipped entry in the
//! log.
//!
//! Failure semantics, in one place:
//! - optional-stage errors are recoverable: logged, run continues;
//! - pre-mount structural failures discard the run with nothing mounted;
//! - post-mount structural failures attempt an explicit discard before
//!   surfacing;
//! - a failure of the dismount/export step itself (or of that discard
//!   attempt) aborts the run with the mount deliberately left intact;
//!   silently losing servicing state is worse than operator cleanup.

pub mod post;
pub mod stages;

use anyhow::{bail, Result};
use std::fs;
use std::io::{self, BufRead, Write};

use crate::config::Config;
use crate::catalog::CatalogSource;
use crate::logging::RunLog;
use crate::mount::{MountGuard, Prepare};
use crate::selections::{HookTiming, Selections};
use crate::servicing::ImageServicing;
use crate::session::ImageSession;

/// Every pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    CopySource,
    TrimIndexes,
    Mount,
    PauseAfterMount,
    LanguageResources,
    DotNet,
    Provisioning,
    Drivers,
    AppAssociations,
    StartLayout,
    Registry,
    Updates,
    AgentRefresh,
    PackageRemoval,
    PauseBeforeDismount,
    Dismount,
    Export,
    PackageManagerUpdate,
    BootImageUpdate,
    MediaStaging,
    IsoCreation,
}

/// The fixed stage order. All injection stages run before Updates.
pub const STAGE_ORDER: &[Stage] = &[
    Stage::Validate,
    Stage::CopySource,
    Stage::TrimIndexes,
    Stage::Mount,
    Stage::PauseAfterMount,
    Stage::LanguageResources,
    Stage::DotNet,
    Stage::Provisioning,
    Stage::Drivers,
    Stage::AppAssociations,
    Stage::StartLayout,
    Stage::Registry,
    Stage::Updates,
    Stage::AgentRefresh,
    Stage::PackageRemoval,
    Stage::PauseBeforeDismount,
    Stage::Dismount,
    Stage::Export,
    Stage::PackageManagerUpdate,
    Stage::BootImageUpdate,
    Stage::MediaStaging,
    Stage::IsoCreation,
];

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Validate => "Validate",
            Stage::CopySource => "CopySource",
            Stage::TrimIndexes => "TrimIndexes",
            Stage::Mount => "Mount",
            Stage::PauseAfterMount => "PauseAfterMount",
            Stage::LanguageResources => "LanguageResources",
            Stage::DotNet => "DotNet",
            Stage::Provisioning => "Provisioning",
            Stage::Drivers => "Drivers",
            Stage::AppAssociations => "AppAssociations",
            Stage::StartLayout => "StartLayout",
            Stage::Registry => "Registry",
            Stage::Updates => "Updates",
            Stage::AgentRefresh => "AgentRefresh",
            Stage::PackageRemoval => "PackageRemoval",
            Stage::PauseBeforeDismount => "PauseBeforeDismount",
            Stage::Dismount => "Dismount",
            Stage::Export => "Export",
            Stage::PackageManagerUpdate => "PackageManagerUpdate",
            Stage::BootImageUpdate => "BootImageUpdate",
            Stage::MediaStaging => "MediaStaging",
            Stage::IsoCreation => "IsoCreation",
        }
    }

    /// Whether the selections enable this stage. Structural stages always
    /// run.
    pub fn enabled(&self, sel: &Selections) -> bool {
        match self {
            Stage::Validate
            | Stage::CopySource
            | Stage::TrimIndexes
            | Stage::Mount
            | Stage::Dismount
            | Stage::Export => true,
            Stage::PauseAfterMount => sel.pause_after_mount,
            Stage::PauseBeforeDismount => sel.pause_before_dismount,
            Stage::LanguageResources => {
                !sel.language_packs.is_empty() || !sel.capabilities.is_empty()
            }
            Stage::DotNet => sel.enable_dotnet35,
            Stage::Provisioning => sel.provisioning_package.is_some(),
            Stage::Drivers => !sel.driver_dirs.is_empty(),
            Stage::AppAssociations => sel.app_associations.is_some(),
            Stage::StartLayout => sel.start_layout.is_some(),
            Stage::Registry => !sel.registry_scripts.is_empty(),
            Stage::Updates => {
                sel.updates.any()
                    || sel.hooks_at(HookTiming::BeforeUpdates).next().is_some()
                    || sel.hooks_at(HookTiming::AfterUpdates).next().is_some()
            }
            Stage::AgentRefresh => sel.agent_refresh.is_some(),
            Stage::PackageRemoval => !sel.remove_packages.is_empty(),
            Stage::PackageManagerUpdate => sel.post.package_refresh_command.is_some(),
            Stage::BootImageUpdate => sel.post.boot_image.is_some(),
            Stage::MediaStaging => sel.post.media_dir.is_some(),
            Stage::IsoCreation => sel.post.create_iso,
        }
    }

    /// Stages whose failure halts the run instead of degrading it.
    fn fatal(&self) -> bool {
        matches!(
            self,
            Stage::Validate
                | Stage::CopySource
                | Stage::TrimIndexes
                | Stage::Mount
                | Stage::PauseAfterMount
                | Stage::PauseBeforeDismount
                | Stage::Dismount
                | Stage::Export
        )
    }

    /// True once a failing stage may have a live mount behind it.
    fn post_mount(&self) -> bool {
        !matches!(
            self,
            Stage::Validate | Stage::CopySource | Stage::TrimIndexes | Stage::Mount
        )
    }
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Image exported, session destroyed.
    Completed,
    /// Partial image dropped; nothing was exported.
    Discarded { reason: String },
    /// Hard failure with the mount left intact for manual cleanup.
    Aborted { reason: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Answer at an interactive pause point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    Continue,
    Discard,
}

/// The only suspension mechanism the pipeline has: continue or discard.
pub trait Prompter {
    fn pause(&self, point: &str) -> Result<PauseDecision>;
}

/// Interactive prompter reading stdin.
pub struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn pause(&self, point: &str) -> Result<PauseDecision> {
        print!("Paused {point}. Continue or discard the run? [C/d] ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        if line.trim().eq_ignore_ascii_case("d") || line.trim().eq_ignore_ascii_case("discard") {
            Ok(PauseDecision::Discard)
        } else {
            Ok(PauseDecision::Continue)
        }
    }
}

/// Stage result feeding the orchestrator loop.
enum Flow {
    Continue,
    DiscardRequested,
}

/// One pipeline run over one image session.
pub struct Pipeline<'a> {
    pub config: &'a Config,
    pub selections: &'a Selections,
    pub servicing: &'a dyn ImageServicing,
    pub catalog: &'a dyn CatalogSource,
    pub prompter: &'a dyn Prompter,
    pub log: &'a mut RunLog,
}

impl Pipeline<'_> {
    /// Drive the full stage list to a terminal state.
    pub fn run(mut self) -> RunOutcome {
        let mut session = ImageSession::new(self.selections, &self.config.staging_dir);
        self.log.banner("Pipeline run");
        self.log
            .info(&format!("Source: {}", session.source_image.display()));
        self.log
            .info(&format!("Output: {}", session.output_path.display()));

        for stage in STAGE_ORDER {
            session.stage_marker = stage.name();
            if !stage.enabled(self.selections) {
                self.log.skip(&format!("Stage {} disabled", stage.name()));
                continue;
            }
            self.log.banner(stage.name());

            match self.execute(*stage, &mut session) {
                Ok(Flow::Continue) => {}
                Ok(Flow::DiscardRequested) => {
                    session.discard_requested = true;
                    return self.discard_run(
                        &session,
                        format!("Run discarded at {}", stage.name()),
                    );
                }
                Err(err) if stage.fatal() => {
                    self.log
                        .fail(&format!("Stage {} failed: {err:#}", stage.name()));
                    return self.fatal_outcome(*stage, err, &session);
                }
                Err(err) => {
                    // Recoverable: the stage degrades, the run goes on.
                    self.log
                        .warn(&format!("Stage {} degraded", stage.name()), &err);
                }
            }
        }

        self.cleanup_staging(&session);
        self.log.banner("Run complete");
        self.log
            .info(&format!("Exported image: {}", session.output_path.display()));
        RunOutcome::Completed
    }

    fn execute(&mut self, stage: Stage, session: &mut ImageSession) -> Result<Flow> {
        match stage {
            Stage::Validate => stages::validate(self, session)?,
            Stage::CopySource => stages::copy_source(self, session)?,
            Stage::TrimIndexes => stages::trim_indexes(self, session)?,
            Stage::Mount => stages::mount(self, session)?,
            Stage::PauseAfterMount => {
                if self.prompter.pause("after mount")? == PauseDecision::Discard {
                    return Ok(Flow::DiscardRequested);
                }
            }
            Stage::LanguageResources => stages::language_resources(self, session)?,
            Stage::DotNet => stages::dotnet(self, session)?,
            Stage::Provisioning => stages::provisioning(self, session)?,
            Stage::Drivers => stages::drivers(self, session)?,
            Stage::AppAssociations => stages::app_associations(self, session)?,
            Stage::StartLayout => stages::start_layout(self, session)?,
            Stage::Registry => stages::registry(self, session)?,
            Stage::Updates => stages::updates(self, session)?,
            Stage::AgentRefresh => stages::agent_refresh(self, session)?,
            Stage::PackageRemoval => stages::package_removal(self, session)?,
            Stage::PauseBeforeDismount => {
                if self.prompter.pause("before dismount")? == PauseDecision::Discard {
                    return Ok(Flow::DiscardRequested);
                }
            }
            Stage::Dismount => stages::dismount_commit(self, session)?,
            Stage::Export => stages::export(self, session)?,
            Stage::PackageManagerUpdate => post::package_manager_update(self, session)?,
            Stage::BootImageUpdate => post::boot_image_update(self, session)?,
            Stage::MediaStaging => post::media_staging(self, session)?,
            Stage::IsoCreation => post::iso_creation(self, session)?,
        }
        Ok(Flow::Continue)
    }

    /// Map a fatal stage failure to its terminal state.
    fn fatal_outcome(&mut self, stage: Stage, err: anyhow::Error, session: &ImageSession) -> RunOutcome {
        // The dismount/export step failing IS the case where we must not
        // touch the mount again.
        if matches!(stage, Stage::Dismount | Stage::Export) {
            return self.abort_run(
                session,
                format!("{} failed: {err:#}", stage.name()),
            );
        }

        if stage.post_mount() {
            // Something broke while the image was mounted: try to discard
            // before surfacing the failure.
            return self.discard_run(session, format!("{} failed: {err:#}", stage.name()));
        }

        // Nothing mounted yet.
        self.cleanup_staging(session);
        RunOutcome::Discarded {
            reason: format!("{} failed: {err:#}", stage.name()),
        }
    }

    /// Explicitly discard the mount, then destroy the session.
    fn discard_run(&mut self, session: &ImageSession, reason: String) -> RunOutcome {
        let guard = MountGuard::new(self.servicing);
        if let Err(discard_err) = guard.discard(&session.mount_dir) {
            self.log.fail(&format!(
                "Discard of mount {} failed; leaving it intact for manual cleanup",
                session.mount_dir.display()
            ));
            return RunOutcome::Aborted {
                reason: format!("{reason}; discard also failed: {discard_err:#}"),
            };
        }
        self.cleanup_staging(session);
        self.log.info(&format!("[DISCARDED] {reason}"));
        RunOutcome::Discarded { reason }
    }

    fn abort_run(&mut self, session: &ImageSession, reason: String) -> RunOutcome {
        self.log.fail(&format!(
            "Mount {} left intact for manual cleanup",
            session.mount_dir.display()
        ));
        RunOutcome::Aborted { reason }
    }

    /// Drop the staging copy. Aborted runs never reach this.
    fn cleanup_staging(&mut self, session: &ImageSession) {
        if session.working_image.exists() {
            if let Err(err) = fs::remove_file(&session.working_image) {
                self.log.warn_msg(&format!(
                    "Could not remove staging copy {}: {err}",
                    session.working_image.display()
                ));
            }
        }
        let work_dir = self.config.staging_dir.join("work");
        if work_dir.exists() {
            let _ = fs::remove_dir_all(&work_dir);
        }
    }
}

/// Pre-flight check shared by `validate`: a busy mount target is a hard
/// stop unless the selections force a clean.
pub(crate) fn ensure_mount_target(
    guard: &MountGuard<'_>,
    session: &ImageSession,
    clean: bool,
) -> Result<()> {
    match guard.prepare(&session.mount_dir, clean)? {
        Prepare::Ready => Ok(()),
        Prepare::Busy => bail!(
            "Mount directory {} is busy (live binding or leftover content); \
             enable force_clean_mount or clean it manually",
            session.mount_dir.display()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_places_injection_before_updates() {
        let updates = STAGE_ORDER
            .iter()
            .position(|s| *s == Stage::Updates)
            .unwrap();
        for stage in [
            Stage::LanguageResources,
            Stage::DotNet,
            Stage::Provisioning,
            Stage::Drivers,
            Stage::AppAssociations,
            Stage::StartLayout,
            Stage::Registry,
        ] {
            let pos = STAGE_ORDER.iter().position(|s| *s == stage).unwrap();
            assert!(pos < updates, "{} must run before Updates", stage.name());
        }
    }

    #[test]
    fn export_follows_dismount() {
        let dismount = STAGE_ORDER
            .iter()
            .position(|s| *s == Stage::Dismount)
            .unwrap();
        let export = STAGE_ORDER.iter().position(|s| *s == Stage::Export).unwrap();
        assert!(dismount < export);
    }

    #[test]
    fn structural_stages_are_always_enabled() {
        let sel = crate::selections::Selections::new(
            "in.wim".into(),
            1,
            "out".into(),
        );
        for stage in [
            Stage::Validate,
            Stage::CopySource,
            Stage::TrimIndexes,
            Stage::Mount,
            Stage::Dismount,
            Stage::Export,
        ] {
            assert!(stage.enabled(&sel), "{}", stage.name());
        }
        // and everything optional is off in a minimal selection
        for stage in [
            Stage::PauseAfterMount,
            Stage::LanguageResources,
            Stage::DotNet,
            Stage::Provisioning,
            Stage::Drivers,
            Stage::AppAssociations,
            Stage::StartLayout,
            Stage::Registry,
            Stage::Updates,
            Stage::AgentRefresh,
            Stage::PackageRemoval,
            Stage::PauseBeforeDismount,
            Stage::PackageManagerUpdate,
            Stage::BootImageUpdate,
            Stage::MediaStaging,
            Stage::IsoCreation,
        ] {
            assert!(!stage.enabled(&sel), "{}", stage.name());
        }
    }
}
