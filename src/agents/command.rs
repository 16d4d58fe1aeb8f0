//! Command-backed collaborators.
//!
//! Each collaborator spawns a configured external command, feeds the rendered
//! prompt on stdin, and takes trimmed stdout as the response. This keeps the
//! engine agnostic about which model (or wrapper script) sits behind each
//! role.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::agents::{CodeDebugger, CodeGenerator, VisionAnalyzer};
use crate::plan::TaskSpec;
use crate::process::run_captured;
use crate::prompt::PromptSet;

/// One configured collaborator command: argv, timeout, capture limit.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl AgentCommand {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Result<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(anyhow!("collaborator command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }

    /// Run the command with `prompt` on stdin plus optional trailing
    /// arguments (used by the vision role for file paths).
    #[instrument(skip_all, fields(program = %self.argv[0]))]
    fn invoke(&self, prompt: &str, extra_args: &[PathBuf]) -> Result<String> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]).args(extra_args);

        let capture = run_captured(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run collaborator command '{}'", self.argv[0]))?;

        if capture.timed_out {
            return Err(anyhow!(
                "collaborator '{}' timed out after {}s",
                self.argv[0],
                self.timeout.as_secs()
            ));
        }
        if !capture.success() {
            return Err(anyhow!(
                "collaborator '{}' failed (exit {:?}): {}",
                self.argv[0],
                capture.exit_code,
                capture.stderr_lossy().trim()
            ));
        }
        let response = capture.stdout_lossy();
        debug!(bytes = response.len(), "collaborator responded");
        Ok(response)
    }
}

/// Code generation backed by an external command.
pub struct CommandGenerator {
    command: AgentCommand,
    prompts: PromptSet,
}

impl CommandGenerator {
    pub fn new(command: AgentCommand) -> Self {
        Self {
            command,
            prompts: PromptSet::new(),
        }
    }
}

impl CodeGenerator for CommandGenerator {
    fn generate(&self, task: &TaskSpec, running_context: &str) -> Result<String> {
        let prompt = self.prompts.render_generator(task, running_context)?;
        self.command.invoke(&prompt, &[])
    }
}

/// Repair backed by an external command.
pub struct CommandDebugger {
    command: AgentCommand,
    prompts: PromptSet,
}

impl CommandDebugger {
    pub fn new(command: AgentCommand) -> Self {
        Self {
            command,
            prompts: PromptSet::new(),
        }
    }
}

impl CodeDebugger for CommandDebugger {
    fn repair(
        &self,
        task: &TaskSpec,
        running_context: &str,
        failing_source: &str,
        stderr: &str,
    ) -> Result<String> {
        let prompt = self
            .prompts
            .render_debugger(task, running_context, failing_source, stderr)?;
        self.command.invoke(&prompt, &[])
    }
}

/// Vision analysis backed by an external command; resolved image paths are
/// appended as trailing arguments.
pub struct CommandVision {
    command: AgentCommand,
    prompts: PromptSet,
}

impl CommandVision {
    pub fn new(command: AgentCommand) -> Self {
        Self {
            command,
            prompts: PromptSet::new(),
        }
    }
}

impl VisionAnalyzer for CommandVision {
    fn analyze(&self, inputs: &[PathBuf], description: &str) -> Result<String> {
        let prompt = self.prompts.render_vision(description)?;
        self.command.invoke(&prompt, inputs)
    }
}
