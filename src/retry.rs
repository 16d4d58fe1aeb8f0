//! Retry-repair loop for python-tool tasks.
//!
//! Per-task state machine: GENERATE → VALIDATE → EXECUTE → SUCCEEDED, or
//! EXECUTE → DEBUG → VALIDATE → EXECUTE → …, bounded by one generation plus
//! `max_repair_attempts` repairs. Errors are attempt-scoped: nothing leaks
//! into another task's failure report.

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::agents::{CodeDebugger, CodeGenerator};
use crate::config::EngineConfig;
use crate::deps::{DepsVerdict, LocalProbe, PackageRegistry, reconcile};
use crate::fence::extract_source;
use crate::interp::Interpreter;
use crate::plan::TaskSpec;
use crate::sandbox::run_candidate;
use crate::workspace::Workspace;

/// Everything one task execution needs; owned by the driver, borrowed per
/// task.
pub struct TaskRuntime<'a> {
    pub generator: &'a dyn CodeGenerator,
    pub debugger: &'a dyn CodeDebugger,
    pub probe: &'a dyn LocalProbe,
    pub registry: &'a dyn PackageRegistry,
    pub interp: &'a Interpreter,
    pub workspace: &'a Workspace,
    pub config: &'a EngineConfig,
}

/// How a python task resolved. Only this (plus stdout) escapes the loop;
/// individual attempts are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PythonTaskResult {
    /// A candidate exited 0; its stdout feeds the running context.
    Succeeded { stdout: String },
    /// Every candidate failed; carries the final attempt's error.
    Exhausted { last_error: String },
    /// A candidate imported a package the registry does not know. Fatal to
    /// the whole workflow, not just this task.
    RegistryRejected { package: String },
}

/// Run one python task to resolution within the attempt budget.
#[instrument(skip_all, fields(task_id = task.task_id))]
pub fn run_python_task(
    rt: &TaskRuntime<'_>,
    task: &TaskSpec,
    running_context: &str,
) -> Result<PythonTaskResult> {
    let total_attempts = 1 + rt.config.max_repair_attempts;
    let mut prev_source = String::new();
    let mut last_error = String::new();

    for attempt in 0..total_attempts {
        debug!(attempt = attempt + 1, total_attempts, "starting attempt");

        let source = if attempt == 0 {
            let raw = rt.generator.generate(task, running_context)?;
            let source = extract_source(&raw);
            if source.is_empty() {
                // Consume this attempt and fall through to the repair path
                // instead of re-issuing an identical generation request.
                warn!("generation produced no code, consuming attempt");
                last_error = "code generation returned no code".to_string();
                continue;
            }
            source
        } else {
            let raw = rt
                .debugger
                .repair(task, running_context, &prev_source, &last_error)?;
            extract_source(&raw)
        };

        // A hallucinated dependency aborts the whole workflow; this is more
        // severe than an ordinary failed execution of this one task.
        match reconcile(&source, rt.probe, rt.registry)? {
            DepsVerdict::Rejected { package } => {
                return Ok(PythonTaskResult::RegistryRejected { package });
            }
            DepsVerdict::Satisfied => {}
        }

        let script = rt
            .workspace
            .write_script(&rt.config.script_filename, &source)?;
        let outcome = run_candidate(
            rt.interp,
            &script,
            rt.workspace.root(),
            rt.config.script_timeout(),
            rt.config.output_limit_bytes,
        )?;

        if outcome.success() {
            info!(attempt = attempt + 1, "task succeeded");
            return Ok(PythonTaskResult::Succeeded {
                stdout: outcome.stdout,
            });
        }

        last_error = outcome.failure_text(rt.config.script_timeout());
        prev_source = source;
        warn!(attempt = attempt + 1, "candidate failed");
    }

    Ok(PythonTaskResult::Exhausted { last_error })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        ScriptedDebugger, ScriptedGenerator, StaticProbe, StaticRegistry, python_task,
    };

    fn test_config() -> EngineConfig {
        EngineConfig {
            interpreter: "sh".to_string(),
            isolate_env: false,
            script_timeout_secs: 5,
            ..EngineConfig::default()
        }
    }

    struct Fixture {
        interp: Interpreter,
        workspace: Workspace,
        config: EngineConfig,
        probe: StaticProbe,
        registry: StaticRegistry,
        _temp: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().expect("tempdir");
            let workspace = Workspace::acquire(temp.path().join("ws")).expect("workspace");
            Self {
                interp: Interpreter::new("sh"),
                workspace,
                config: test_config(),
                probe: StaticProbe::all_present(),
                registry: StaticRegistry::knows_everything(),
                _temp: temp,
            }
        }

        fn runtime<'a>(
            &'a self,
            generator: &'a ScriptedGenerator,
            debugger: &'a ScriptedDebugger,
        ) -> TaskRuntime<'a> {
            TaskRuntime {
                generator,
                debugger,
                probe: &self.probe,
                registry: &self.registry,
                interp: &self.interp,
                workspace: &self.workspace,
                config: &self.config,
            }
        }
    }

    #[test]
    fn first_candidate_success_skips_the_debugger() {
        let fx = Fixture::new();
        let generator = ScriptedGenerator::new(vec!["echo hello"]);
        let debugger = ScriptedDebugger::new(vec![]);
        let task = python_task(1, &[], &[]);

        let result =
            run_python_task(&fx.runtime(&generator, &debugger), &task, "").expect("run");

        assert_eq!(
            result,
            PythonTaskResult::Succeeded {
                stdout: "hello\n".to_string()
            }
        );
        assert!(debugger.seen.borrow().is_empty());
    }

    #[test]
    fn fenced_response_is_unwrapped_before_execution() {
        let fx = Fixture::new();
        let generator = ScriptedGenerator::new(vec!["```python\necho fenced\n```"]);
        let debugger = ScriptedDebugger::new(vec![]);
        let task = python_task(1, &[], &[]);

        let result =
            run_python_task(&fx.runtime(&generator, &debugger), &task, "").expect("run");

        assert_eq!(
            result,
            PythonTaskResult::Succeeded {
                stdout: "fenced\n".to_string()
            }
        );
    }

    #[test]
    fn fourth_candidate_can_still_succeed() {
        let fx = Fixture::new();
        let generator = ScriptedGenerator::new(vec!["echo a >&2; exit 1"]);
        let debugger = ScriptedDebugger::new(vec![
            "echo b >&2; exit 1",
            "echo c >&2; exit 1",
            "echo finally",
        ]);
        let task = python_task(7, &[], &[]);

        let result =
            run_python_task(&fx.runtime(&generator, &debugger), &task, "").expect("run");

        assert_eq!(
            result,
            PythonTaskResult::Succeeded {
                stdout: "finally\n".to_string()
            }
        );
        // Each repair saw the stderr of the candidate before it.
        let seen = debugger.seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].1.trim(), "a");
        assert_eq!(seen[1].1.trim(), "b");
        assert_eq!(seen[2].1.trim(), "c");
    }

    #[test]
    fn budget_exhaustion_reports_final_stderr() {
        let fx = Fixture::new();
        let generator = ScriptedGenerator::new(vec!["echo a >&2; exit 1"]);
        let debugger = ScriptedDebugger::new(vec![
            "echo b >&2; exit 1",
            "echo c >&2; exit 1",
            "echo d >&2; exit 1",
        ]);
        let task = python_task(7, &[], &[]);

        let result =
            run_python_task(&fx.runtime(&generator, &debugger), &task, "").expect("run");

        match result {
            PythonTaskResult::Exhausted { last_error } => assert_eq!(last_error.trim(), "d"),
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn empty_generation_consumes_attempt_and_moves_to_repair() {
        let fx = Fixture::new();
        let generator = ScriptedGenerator::new(vec!["   \n"]);
        let debugger = ScriptedDebugger::new(vec!["echo recovered"]);
        let task = python_task(2, &[], &[]);

        let result =
            run_python_task(&fx.runtime(&generator, &debugger), &task, "").expect("run");

        assert_eq!(
            result,
            PythonTaskResult::Succeeded {
                stdout: "recovered\n".to_string()
            }
        );
        // The repair saw the empty-generation marker, not a stale error.
        let seen = debugger.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].1.contains("no code"));
    }

    #[test]
    fn hallucinated_import_rejects_without_executing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::acquire(temp.path().join("ws")).expect("workspace");
        let probe = StaticProbe::none_present();
        let registry = StaticRegistry::knows_nothing();
        let interp = Interpreter::new("sh");
        let config = test_config();
        let generator = ScriptedGenerator::new(vec!["import not_a_real_package\n"]);
        let debugger = ScriptedDebugger::new(vec![]);
        let rt = TaskRuntime {
            generator: &generator,
            debugger: &debugger,
            probe: &probe,
            registry: &registry,
            interp: &interp,
            workspace: &workspace,
            config: &config,
        };
        let task = python_task(3, &[], &[]);

        let result = run_python_task(&rt, &task, "").expect("run");

        assert_eq!(
            result,
            PythonTaskResult::RegistryRejected {
                package: "not_a_real_package".to_string()
            }
        );
        // The candidate never reached the sandbox.
        assert!(!workspace.resolve(&config.script_filename).exists());
    }

    #[test]
    fn syntax_broken_candidate_fails_execution_instead_of_rejecting() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::acquire(temp.path().join("ws")).expect("workspace");
        // Registry knows nothing, so treating the broken candidate's import
        // as a real dependency would kill the whole workflow.
        let probe = StaticProbe::rejecting_syntax();
        let registry = StaticRegistry::knows_nothing();
        let interp = Interpreter::new("sh");
        let config = test_config();
        let generator = ScriptedGenerator::new(vec!["import ghost_pkg\ndef f(:"]);
        let debugger = ScriptedDebugger::new(vec!["echo fixed"]);
        let rt = TaskRuntime {
            generator: &generator,
            debugger: &debugger,
            probe: &probe,
            registry: &registry,
            interp: &interp,
            workspace: &workspace,
            config: &config,
        };
        let task = python_task(5, &[], &[]);

        let result = run_python_task(&rt, &task, "").expect("run");

        assert_eq!(
            result,
            PythonTaskResult::Succeeded {
                stdout: "fixed\n".to_string()
            }
        );
        // The broken candidate was executed and repaired, never escalated.
        let seen = debugger.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(probe.installed.borrow().is_empty());
    }

    #[test]
    fn registered_missing_import_installs_then_executes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workspace = Workspace::acquire(temp.path().join("ws")).expect("workspace");
        let probe = StaticProbe::none_present();
        let registry = StaticRegistry::knows_everything();
        let interp = Interpreter::new("sh");
        let config = test_config();
        // Shell comment keeps the line inert at execution time while the
        // scanner still sees a python import.
        let generator = ScriptedGenerator::new(vec!["true # import pandas\nimport pandas"]);
        let debugger = ScriptedDebugger::new(vec!["echo ok"]);
        let rt = TaskRuntime {
            generator: &generator,
            debugger: &debugger,
            probe: &probe,
            registry: &registry,
            interp: &interp,
            workspace: &workspace,
            config: &config,
        };
        let task = python_task(4, &[], &[]);

        let _ = run_python_task(&rt, &task, "").expect("run");
        assert_eq!(*probe.installed.borrow(), vec!["pandas".to_string()]);
    }
}
