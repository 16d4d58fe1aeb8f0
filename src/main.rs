//! Workflow engine CLI.
//!
//! `run` executes a plan end to end and prints the run report as JSON on
//! stdout; `validate` checks a plan without executing anything.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use flowrunner::agents::command::AgentCommand;
use flowrunner::agents::{
    CodeDebugger, CodeGenerator, CommandDebugger, CommandGenerator, CommandVision, VisionAnalyzer,
};
use flowrunner::config::{CollaboratorConfig, EngineConfig, load_config};
use flowrunner::deps::PypiRegistry;
use flowrunner::driver::{Driver, RunReport};
use flowrunner::interp::Interpreter;
use flowrunner::logging;
use flowrunner::plan::{Plan, TaskSpec, ToolKind};
use flowrunner::workspace::Workspace;

#[derive(Parser)]
#[command(name = "flowrunner", version, about = "Plan-driven workflow engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a plan and print the run report as JSON.
    Run {
        /// Plan file (JSON array of task descriptors).
        #[arg(long)]
        plan: PathBuf,
        /// Engine config (TOML). Missing file means defaults.
        #[arg(long, default_value = "flowrunner.toml")]
        config: PathBuf,
        /// Override the configured workspace directory.
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Leave the workspace in place after the run.
        #[arg(long)]
        keep_workspace: bool,
    },
    /// Parse and validate a plan without executing it.
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            plan,
            config,
            workspace,
            keep_workspace,
        } => {
            let report = cmd_run(&plan, &config, workspace, keep_workspace)?;
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Validate { plan } => cmd_validate(&plan),
    }
}

fn cmd_validate(plan_path: &Path) -> Result<ExitCode> {
    let text = fs::read_to_string(plan_path)
        .with_context(|| format!("read {}", plan_path.display()))?;
    let plan = Plan::from_json(&text)?;
    println!("plan ok: {} task(s)", plan.len());
    Ok(ExitCode::SUCCESS)
}

fn cmd_run(
    plan_path: &Path,
    config_path: &Path,
    workspace_override: Option<PathBuf>,
    keep_workspace: bool,
) -> Result<RunReport> {
    let config = load_config(config_path)?;
    let text = fs::read_to_string(plan_path)
        .with_context(|| format!("read {}", plan_path.display()))?;
    let plan = Plan::from_json(&text)?;

    // Only the roles the plan actually dispatches need a configured command;
    // a python-only plan must not demand a vision command it will never use.
    let generator: Box<dyn CodeGenerator> = if role_is_used(&plan, ToolKind::Python) {
        Box::new(CommandGenerator::new(collaborator(
            &config.generator,
            &config,
            "generator",
        )?))
    } else {
        Box::new(Unconfigured("generator"))
    };
    let debugger: Box<dyn CodeDebugger> = if role_is_used(&plan, ToolKind::Python) {
        Box::new(CommandDebugger::new(collaborator(
            &config.debugger,
            &config,
            "debugger",
        )?))
    } else {
        Box::new(Unconfigured("debugger"))
    };
    let vision: Box<dyn VisionAnalyzer> = if role_is_used(&plan, ToolKind::Vision) {
        Box::new(CommandVision::new(collaborator(
            &config.vision,
            &config,
            "vision",
        )?))
    } else {
        Box::new(Unconfigured("vision"))
    };
    let registry = PypiRegistry::new(config.registry_base_url.clone())?;

    let workspace_dir =
        workspace_override.unwrap_or_else(|| PathBuf::from(&config.workspace_dir));
    let workspace = Workspace::acquire(workspace_dir)?;

    // Everything after the workspace exists must funnel through one exit so
    // the directory is released on failure paths too.
    let outcome = (|| -> Result<RunReport> {
        let interp = if config.isolate_env {
            Interpreter::provision(&config.interpreter, workspace.root())?
        } else {
            Interpreter::new(&config.interpreter)
        };
        let driver = Driver {
            generator: generator.as_ref(),
            debugger: debugger.as_ref(),
            vision: vision.as_ref(),
            probe: &interp,
            registry: &registry,
            interp: &interp,
            config: &config,
        };
        driver.run(&plan, &workspace)
    })();

    if keep_workspace {
        eprintln!("workspace kept at {}", workspace.root().display());
    } else {
        workspace.release();
    }

    let report = outcome?;
    println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    Ok(report)
}

fn role_is_used(plan: &Plan, kind: ToolKind) -> bool {
    plan.tasks().iter().any(|task| task.tool == kind)
}

/// Stand-in for a collaborator role the current plan never dispatches.
struct Unconfigured(&'static str);

impl CodeGenerator for Unconfigured {
    fn generate(&self, _task: &TaskSpec, _running_context: &str) -> Result<String> {
        Err(anyhow!("no {} command configured", self.0))
    }
}

impl CodeDebugger for Unconfigured {
    fn repair(
        &self,
        _task: &TaskSpec,
        _running_context: &str,
        _failing_source: &str,
        _stderr: &str,
    ) -> Result<String> {
        Err(anyhow!("no {} command configured", self.0))
    }
}

impl VisionAnalyzer for Unconfigured {
    fn analyze(&self, _inputs: &[std::path::PathBuf], _description: &str) -> Result<String> {
        Err(anyhow!("no {} command configured", self.0))
    }
}

fn collaborator(
    role: &CollaboratorConfig,
    config: &EngineConfig,
    name: &str,
) -> Result<AgentCommand> {
    if role.command.is_empty() {
        return Err(anyhow!(
            "no {name} command configured; set [{name}] command in the config file"
        ));
    }
    AgentCommand::new(
        role.command.clone(),
        config.agent_timeout(),
        config.output_limit_bytes,
    )
}
