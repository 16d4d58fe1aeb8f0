//! Interpreter environment hosting candidate scripts.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::deps::LocalProbe;
use crate::process::run_captured;

const ENV_SETUP_TIMEOUT: Duration = Duration::from_secs(300);
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const SETUP_OUTPUT_LIMIT: usize = 64 * 1024;

/// Handle to the interpreter that runs candidate scripts, probes imports, and
/// installs packages. All three concerns deliberately share one binary so a
/// package installed during validation is visible to the execution that
/// follows.
#[derive(Debug, Clone)]
pub struct Interpreter {
    program: PathBuf,
}

impl Interpreter {
    /// Use `program` as-is (e.g. `python3` from `PATH`, or a test shell).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Provision an isolated environment for one run: create a virtual
    /// environment under `workspace_root` with `base` and return the
    /// interpreter inside it. Installations then mutate only this run's
    /// environment, never the host interpreter.
    #[instrument(skip_all, fields(base = %base, root = %workspace_root.display()))]
    pub fn provision(base: &str, workspace_root: &Path) -> Result<Self> {
        let env_dir = workspace_root.join(".venv");
        let mut cmd = Command::new(base);
        cmd.arg("-m").arg("venv").arg(&env_dir);

        let capture = run_captured(cmd, None, ENV_SETUP_TIMEOUT, SETUP_OUTPUT_LIMIT)
            .context("create virtual environment")?;
        if !capture.success() {
            return Err(anyhow!(
                "venv creation failed (exit {:?}): {}",
                capture.exit_code,
                capture.stderr_lossy().trim()
            ));
        }

        let program = if cfg!(windows) {
            env_dir.join("Scripts").join("python.exe")
        } else {
            env_dir.join("bin").join("python")
        };
        info!(program = %program.display(), "isolated interpreter provisioned");
        Ok(Self { program })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Base command invoking this interpreter.
    pub(crate) fn command(&self) -> Command {
        Command::new(&self.program)
    }
}

impl LocalProbe for Interpreter {
    fn parses(&self, source: &str) -> Result<bool> {
        let mut cmd = self.command();
        cmd.arg("-c").arg("import ast, sys; ast.parse(sys.stdin.read())");
        let capture = run_captured(cmd, Some(source.as_bytes()), PROBE_TIMEOUT, SETUP_OUTPUT_LIMIT)
            .context("syntax-check candidate source")?;
        debug!(ok = capture.success(), "syntax check");
        Ok(capture.success())
    }

    fn has_module(&self, name: &str) -> Result<bool> {
        let mut cmd = self.command();
        cmd.arg("-c").arg(format!("import {name}"));
        let capture = run_captured(cmd, None, PROBE_TIMEOUT, SETUP_OUTPUT_LIMIT)
            .with_context(|| format!("probe import of '{name}'"))?;
        debug!(package = name, present = capture.success(), "import probe");
        Ok(capture.success())
    }

    fn install(&self, name: &str) -> Result<()> {
        info!(package = name, "installing package");
        let mut cmd = self.command();
        cmd.arg("-m").arg("pip").arg("install").arg(name);
        let capture = run_captured(cmd, None, ENV_SETUP_TIMEOUT, SETUP_OUTPUT_LIMIT)
            .with_context(|| format!("install '{name}'"))?;
        if !capture.success() {
            return Err(anyhow!(
                "pip install '{}' failed (exit {:?}): {}",
                name,
                capture.exit_code,
                capture.stderr_lossy().trim()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reports_missing_module_through_a_shell() {
        // `sh -c "import os"` exits nonzero, which the probe reads as absent.
        let interp = Interpreter::new("sh");
        assert!(!interp.has_module("os").expect("probe"));
    }

    #[test]
    fn command_uses_configured_program() {
        let interp = Interpreter::new("python3");
        assert_eq!(interp.program(), Path::new("python3"));
    }
}
