//! Preflight command - verify the host before building.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(base_dir: &Path, strict: bool) -> Result<()> {
    let config = Config::load(base_dir);
    if strict {
        preflight::run_preflight_or_fail(&config)
    } else {
        let report = preflight::run_preflight(&config);
        report.print();
        if !report.all_passed() {
            println!(
                "\n{} required check(s) failed. Run with --strict to fail the command.",
                report.fail_count()
            );
        }
        Ok(())
    }
}
