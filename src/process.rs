//! External tool execution with consistent error handling.
//!
//! Every servicing-tool invocation (dism, expand, oscdimg, script hooks)
//! goes through this module so output is always captured and failures carry
//! a useful message.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

/// Captured result of a tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for a single tool invocation.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    allow_fail: bool,
    error_prefix: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            current_dir: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Add a servicing-style switch: `/Name`.
    pub fn switch(self, name: &str) -> Self {
        self.arg(format!("/{name}"))
    }

    /// Add a servicing-style valued switch: `/Name:value`.
    pub fn switch_value(self, name: &str, value: impl AsRef<str>) -> Self {
        self.arg(format!("/{name}:{}", value.as_ref()))
    }

    /// Add a servicing-style path switch: `/Name:path`.
    pub fn switch_path(self, name: &str, path: &Path) -> Self {
        self.arg(format!("/{name}:{}", path.display()))
    }

    pub fn dir(mut self, dir: &Path) -> Self {
        self.current_dir = Some(dir.to_path_buf());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Run the tool and capture output.
    pub fn run(self) -> Result<ToolOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.current_dir {
            cmd.current_dir(dir);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            // dism reports most errors on stdout, not stderr
            let detail = if result.stderr_trimmed().is_empty() {
                result.stdout_trimmed().to_string()
            } else {
                result.stderr_trimmed().to_string()
            };
            if detail.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), detail);
            }
        }

        Ok(result)
    }
}

/// Run a program with arguments. Fails with captured output on error.
pub fn run<I, S>(program: &str, args: I) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Cmd::new(program).args(args).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let result = run("echo", ["hello"]).unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_trimmed(), "hello");
    }

    #[test]
    fn failure_includes_detail() {
        let err = run("ls", ["/nonexistent_path_12345"]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("No such file") || msg.contains("cannot access"));
    }

    #[test]
    fn allow_fail_returns_result() {
        let result = Cmd::new("false").allow_fail().run().unwrap();
        assert!(!result.success());
        assert_eq!(result.code(), 1);
    }

    #[test]
    fn custom_error_prefix() {
        let err = Cmd::new("false")
            .error_msg("Package apply failed")
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("Package apply failed"));
    }

    #[test]
    fn switch_formatting() {
        let result = Cmd::new("echo")
            .switch("Commit")
            .switch_value("Index", "1")
            .switch_path("MountDir", Path::new("/mnt/image"))
            .run()
            .unwrap();
        assert_eq!(
            result.stdout_trimmed(),
            "/Commit /Index:1 /MountDir:/mnt/image"
        );
    }
}
