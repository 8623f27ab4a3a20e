//! Run logging.
//!
//! Every pipeline transition is written both to stdout and to a per-run log
//! file, so unattended runs leave a reviewable record. The log is a plain
//! value threaded through the run; there is no global logger state.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Tagged log sink for one pipeline run.
pub struct RunLog {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl RunLog {
    /// Log to stdout only (maintenance commands, tests).
    pub fn stdout_only() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    /// Log to stdout and a file, created fresh.
    pub fn to_file(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
        })
    }

    /// Path of the log file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn write_line(&mut self, line: &str) {
        println!("{line}");
        if let Some(file) = &mut self.file {
            // A failed log write must not abort the run itself.
            let _ = writeln!(file, "{line}");
        }
    }

    /// Section banner: `=== Title ===`.
    pub fn banner(&mut self, title: &str) {
        self.write_line("");
        self.write_line(&format!("=== {title} ==="));
    }

    /// Informational progress line.
    pub fn info(&mut self, msg: &str) {
        self.write_line(msg);
    }

    /// A disabled stage or skipped unit of work.
    pub fn skip(&mut self, msg: &str) {
        self.write_line(&format!("[SKIP] {msg}"));
    }

    /// Recoverable failure: human message plus the underlying error.
    pub fn warn(&mut self, msg: &str, err: &anyhow::Error) {
        self.write_line(&format!("[WARN] {msg}: {err:#}"));
    }

    /// Recoverable condition with no underlying error.
    pub fn warn_msg(&mut self, msg: &str) {
        self.write_line(&format!("[WARN] {msg}"));
    }

    /// Fatal failure, about to halt the pipeline.
    pub fn fail(&mut self, msg: &str) {
        self.write_line(&format!("[FAIL] {msg}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_log_records_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut log = RunLog::to_file(&path).unwrap();
        log.banner("Mount");
        log.info("Mounting index 1");
        log.skip("Drivers stage disabled");
        drop(log);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("=== Mount ==="));
        assert!(content.contains("Mounting index 1"));
        assert!(content.contains("[SKIP] Drivers stage disabled"));
    }

    #[test]
    fn stdout_only_has_no_path() {
        let log = RunLog::stdout_only();
        assert!(log.path().is_none());
    }
}
