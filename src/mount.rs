//! Mount-point guard.
//!
//! A mount directory may be bound to at most one image at a time. Every
//! mount is preceded by `prepare`, which checks the servicing subsystem's
//! active-mount list and leftover file content. Cleaning only happens when
//! explicitly requested, and leftovers are never deleted while a live
//! binding could still own them.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::servicing::{Dismount, ImageServicing};

/// Outcome of a pre-mount check. Hard failures surface as `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prepare {
    /// Directory is free of bindings and content; safe to mount into.
    Ready,
    /// A live binding or leftover files are present and `clean` was not set.
    Busy,
}

/// Guards a mount directory against double-binding and stale content.
pub struct MountGuard<'a> {
    servicing: &'a dyn ImageServicing,
}

impl<'a> MountGuard<'a> {
    pub fn new(servicing: &'a dyn ImageServicing) -> Self {
        Self { servicing }
    }

    /// Check (and optionally clean) a directory before use as a mount target.
    ///
    /// With `clean=false` the path is never mutated. With `clean=true`, a
    /// live binding is discarded first; leftover content is deleted only
    /// after that succeeds, so a failed discard leaves the path untouched.
    pub fn prepare(&self, path: &Path, clean: bool) -> Result<Prepare> {
        let bound = self.find_binding(path)?;
        let leftovers = has_content(path)?;

        if !bound && !leftovers {
            return Ok(Prepare::Ready);
        }

        if !clean {
            return Ok(Prepare::Busy);
        }

        if bound {
            self.servicing
                .dismount_image(path, Dismount::Discard)
                .with_context(|| {
                    format!("Could not discard live mount at {}", path.display())
                })?;
        }

        if has_content(path)? {
            fs::remove_dir_all(path).with_context(|| {
                format!("Could not remove leftover content at {}", path.display())
            })?;
            fs::create_dir_all(path)?;
        }

        Ok(Prepare::Ready)
    }

    /// Commit and release the binding. No-op when nothing is mounted there.
    pub fn commit(&self, path: &Path) -> Result<()> {
        if self.find_binding(path)? {
            self.servicing.dismount_image(path, Dismount::Commit)?;
        }
        Ok(())
    }

    /// Discard and release the binding. No-op when nothing is mounted there.
    pub fn discard(&self, path: &Path) -> Result<()> {
        if self.find_binding(path)? {
            self.servicing.dismount_image(path, Dismount::Discard)?;
        }
        Ok(())
    }

    fn find_binding(&self, path: &Path) -> Result<bool> {
        let mounts = self.servicing.list_mounted_images()?;
        Ok(mounts.iter().any(|m| m.mount_dir == path))
    }
}

/// True if the directory exists and contains anything.
fn has_content(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    let mut entries = fs::read_dir(path)
        .with_context(|| format!("Could not inspect {}", path.display()))?;
    Ok(entries.next().is_some())
}
