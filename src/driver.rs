//! Workflow driver: ordered dispatch, running context, terminal report.

use std::fs;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::agents::{CodeDebugger, CodeGenerator, VisionAnalyzer};
use crate::config::EngineConfig;
use crate::deps::{LocalProbe, PackageRegistry};
use crate::interp::Interpreter;
use crate::plan::{Plan, ToolKind};
use crate::retry::{PythonTaskResult, TaskRuntime, run_python_task};
use crate::vision::{VisionTaskResult, run_vision_task};
use crate::workspace::Workspace;

/// Terminal outcome of one workflow run. Partial artifacts are left in the
/// workspace on failure; nothing is rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    /// Every task resolved and the designated final artifact held valid JSON.
    Completed { output: Value },
    /// Every task resolved but no final artifact was produced. Ambiguous by
    /// contract, still reported as success.
    CompletedWithoutArtifact,
    /// A task exhausted its attempt budget.
    TaskFailed { failed_task_id: u64, last_error: String },
    /// A candidate imported a package the registry does not know.
    DependencyRejected { failed_task_id: u64, package: String },
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunReport::Completed { .. } | RunReport::CompletedWithoutArtifact
        )
    }

    /// Stable JSON shape consumed by callers of the CLI.
    pub fn to_json(&self) -> Value {
        match self {
            RunReport::Completed { output } => output.clone(),
            RunReport::CompletedWithoutArtifact => json!({
                "status": "success",
                "reason": "workflow finished but no final artifact was produced",
            }),
            RunReport::TaskFailed {
                failed_task_id,
                last_error,
            } => json!({
                "status": "failed",
                "failed_task_id": failed_task_id,
                "last_error": last_error,
            }),
            RunReport::DependencyRejected {
                failed_task_id,
                package,
            } => json!({
                "status": "failed",
                "failed_task_id": failed_task_id,
                "reason": format!(
                    "generated code imports a package the registry does not know: '{package}'"
                ),
            }),
        }
    }
}

/// Accumulated stdout of completed python tasks, replayed verbatim into every
/// later generation prompt. Vision results stay out of it.
#[derive(Debug, Default)]
struct RunningContext {
    text: String,
}

impl RunningContext {
    fn append(&mut self, task_id: u64, stdout: &str) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text
            .push_str(&format!("{task_id} output:\n{}\n", stdout.trim()));
    }

    fn as_str(&self) -> &str {
        &self.text
    }
}

/// Ties the collaborators, interpreter, and configuration together for one
/// run. Borrows everything; the binary owns the concrete pieces.
pub struct Driver<'a> {
    pub generator: &'a dyn CodeGenerator,
    pub debugger: &'a dyn CodeDebugger,
    pub vision: &'a dyn VisionAnalyzer,
    pub probe: &'a dyn LocalProbe,
    pub registry: &'a dyn PackageRegistry,
    pub interp: &'a Interpreter,
    pub config: &'a EngineConfig,
}

impl Driver<'_> {
    /// Execute every task strictly in list order, aborting on the first task
    /// that cannot be brought to success.
    #[instrument(skip_all, fields(tasks = plan.len()))]
    pub fn run(&self, plan: &Plan, workspace: &Workspace) -> Result<RunReport> {
        let mut context = RunningContext::default();

        for task in plan.tasks() {
            info!(task_id = task.task_id, tool = ?task.tool, "starting task");
            for input in &task.input_artifacts {
                if !workspace.resolve(input).exists() {
                    warn!(
                        task_id = task.task_id,
                        input, "declared input artifact is not in the workspace yet"
                    );
                }
            }

            match task.tool {
                ToolKind::Python => {
                    let rt = TaskRuntime {
                        generator: self.generator,
                        debugger: self.debugger,
                        probe: self.probe,
                        registry: self.registry,
                        interp: self.interp,
                        workspace,
                        config: self.config,
                    };
                    match run_python_task(&rt, task, context.as_str())? {
                        PythonTaskResult::Succeeded { stdout } => {
                            context.append(task.task_id, &stdout);
                        }
                        PythonTaskResult::Exhausted { last_error } => {
                            warn!(task_id = task.task_id, "task exhausted its attempts");
                            return Ok(RunReport::TaskFailed {
                                failed_task_id: task.task_id,
                                last_error,
                            });
                        }
                        PythonTaskResult::RegistryRejected { package } => {
                            warn!(task_id = task.task_id, package, "unknown package import");
                            return Ok(RunReport::DependencyRejected {
                                failed_task_id: task.task_id,
                                package,
                            });
                        }
                    }
                }
                ToolKind::Vision => {
                    match run_vision_task(self.vision, workspace, self.config, task)? {
                        // Vision output lands in its artifact only; later
                        // tasks read the file, not the context.
                        VisionTaskResult::Succeeded => {}
                        VisionTaskResult::Exhausted { last_error } => {
                            warn!(task_id = task.task_id, "task exhausted its attempts");
                            return Ok(RunReport::TaskFailed {
                                failed_task_id: task.task_id,
                                last_error,
                            });
                        }
                    }
                }
                ToolKind::Unknown => {
                    warn!(task_id = task.task_id, "unsupported tool, skipping task");
                }
            }
        }

        self.collect_final_artifact(workspace)
    }

    fn collect_final_artifact(&self, workspace: &Workspace) -> Result<RunReport> {
        let path = workspace.resolve(&self.config.final_artifact);
        if !path.exists() {
            warn!(artifact = %self.config.final_artifact, "no final artifact, reporting ambiguous success");
            return Ok(RunReport::CompletedWithoutArtifact);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let output: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse final artifact {}", path.display()))?;
        info!("workflow completed with final artifact");
        Ok(RunReport::Completed { output })
    }
}
