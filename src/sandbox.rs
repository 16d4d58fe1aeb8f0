//! Execution sandbox for candidate scripts.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::interp::Interpreter;
use crate::process::run_captured;

/// Result of one candidate execution.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Error text for a failed attempt. A timeout is its own failure kind and
    /// is named as such rather than hidden behind an empty stderr.
    pub fn failure_text(&self, timeout: Duration) -> String {
        if self.timed_out {
            format!("script timed out after {}s and was killed", timeout.as_secs())
        } else if self.stderr.trim().is_empty() {
            format!("script exited with status {:?}", self.exit_code)
        } else {
            self.stderr.clone()
        }
    }
}

/// Run `script` as a child of `interp` with the workspace as its working
/// directory, blocking until exit or timeout. Artifact paths inside the
/// script stay relative to the workspace.
#[instrument(skip_all, fields(script = %script.display(), timeout_secs = timeout.as_secs()))]
pub fn run_candidate(
    interp: &Interpreter,
    script: &Path,
    workdir: &Path,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ExecOutcome> {
    let mut cmd = interp.command();
    cmd.arg(script).current_dir(workdir);

    let capture = run_captured(cmd, None, timeout, output_limit_bytes)
        .with_context(|| format!("execute candidate {}", script.display()))?;

    let outcome = ExecOutcome {
        exit_code: capture.exit_code,
        stdout: capture.stdout_lossy(),
        stderr: capture.stderr_lossy(),
        timed_out: capture.timed_out,
    };
    debug!(exit_code = ?outcome.exit_code, timed_out = outcome.timed_out, "candidate finished");
    Ok(outcome)
}
