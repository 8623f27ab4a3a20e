//! Preflight checks.
//!
//! Validates host tools and writable directories before a build, so a run
//! fails in seconds instead of half-way through a mounted image.

use anyhow::{bail, Result};
use std::fs;
use std::path::Path;

use crate::config::Config;

/// One preflight check result.
pub struct Check {
    pub name: String,
    pub passed: bool,
    /// Tools only some stages need fail soft.
    pub required: bool,
    pub detail: String,
}

/// All check results for one preflight pass.
pub struct PreflightReport {
    pub checks: Vec<Check>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed || !c.required)
    }

    pub fn fail_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|c| !c.passed && c.required)
            .count()
    }

    pub fn print(&self) {
        for check in &self.checks {
            let mark = if check.passed {
                "PASS"
            } else if check.required {
                "FAIL"
            } else {
                "WARN"
            };
            println!("  [{mark}] {}: {}", check.name, check.detail);
        }
    }
}

fn tool_check(name: &str, tool: &str, required: bool) -> Check {
    match which::which(tool) {
        Ok(path) => Check {
            name: name.to_string(),
            passed: true,
            required,
            detail: path.display().to_string(),
        },
        Err(_) => Check {
            name: name.to_string(),
            passed: false,
            required,
            detail: format!("'{tool}' not found in PATH"),
        },
    }
}

fn writable_check(name: &str, dir: &Path) -> Check {
    let probe = || -> Result<()> {
        fs::create_dir_all(dir)?;
        let marker = dir.join(".wimforge-write-check");
        fs::write(&marker, b"ok")?;
        fs::remove_file(&marker)?;
        Ok(())
    };
    match probe() {
        Ok(()) => Check {
            name: name.to_string(),
            passed: true,
            required: true,
            detail: dir.display().to_string(),
        },
        Err(err) => Check {
            name: name.to_string(),
            passed: false,
            required: true,
            detail: format!("{} not writable: {err}", dir.display()),
        },
    }
}

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    println!("Running preflight checks...\n");

    let checks = vec![
        tool_check("Servicing tool", &config.dism_tool, true),
        tool_check("Package expander", "expand", true),
        // Only the ISO stage needs the mastering tool.
        tool_check("ISO mastering tool", &config.iso_tool, false),
        writable_check("Staging directory", &config.staging_dir),
        writable_check("Update repository", &config.update_repo),
        writable_check("Log directory", &config.log_dir),
    ];

    PreflightReport { checks }
}

/// Run preflight and bail if any required check fails.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    report.print();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed. Fix the issues above before building.",
            report.fail_count()
        );
    }
    println!("\nAll preflight checks passed.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_check_passes_on_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let check = writable_check("Staging", dir.path());
        assert!(check.passed);
        // probe file cleaned up
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn missing_tool_fails_its_check() {
        let check = tool_check("Servicing tool", "definitely_not_a_tool_12345", true);
        assert!(!check.passed);
        assert!(check.required);
    }

    #[test]
    fn optional_tool_does_not_block_the_report() {
        let report = PreflightReport {
            checks: vec![Check {
                name: "ISO mastering tool".to_string(),
                passed: false,
                required: false,
                detail: "missing".to_string(),
            }],
        };
        assert!(report.all_passed());
        assert_eq!(report.fail_count(), 0);
    }
}
