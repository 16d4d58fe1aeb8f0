//! Test-only scripted collaborators and plan builders.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{Result, anyhow};

use crate::agents::{CodeDebugger, CodeGenerator, VisionAnalyzer};
use crate::deps::{LocalProbe, PackageRegistry};
use crate::plan::{TaskSpec, ToolKind};

/// Build a python task with the given artifacts.
pub fn python_task(id: u64, inputs: &[&str], outputs: &[&str]) -> TaskSpec {
    TaskSpec {
        task_id: id,
        description: format!("task {id}"),
        tool: ToolKind::Python,
        dependencies: Vec::new(),
        input_artifacts: inputs.iter().map(|s| s.to_string()).collect(),
        output_artifacts: outputs.iter().map(|s| s.to_string()).collect(),
    }
}

/// Build a vision task reading `input` and writing `output`.
pub fn vision_task(id: u64, input: &str, output: &str) -> TaskSpec {
    TaskSpec {
        task_id: id,
        description: format!("analyze {input}"),
        tool: ToolKind::Vision,
        dependencies: Vec::new(),
        input_artifacts: vec![input.to_string()],
        output_artifacts: vec![output.to_string()],
    }
}

/// Generator that returns predetermined responses in order and records the
/// running context it was given.
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<String>>,
    pub contexts: RefCell<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().map(String::from).collect()),
            contexts: RefCell::new(Vec::new()),
        }
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self, _task: &TaskSpec, running_context: &str) -> Result<String> {
        self.contexts.borrow_mut().push(running_context.to_string());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected generation call"))
    }
}

/// Debugger that returns predetermined fixes in order and records the
/// failing source and stderr it was shown.
pub struct ScriptedDebugger {
    responses: RefCell<VecDeque<String>>,
    pub seen: RefCell<Vec<(String, String)>>,
}

impl ScriptedDebugger {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().map(String::from).collect()),
            seen: RefCell::new(Vec::new()),
        }
    }
}

impl CodeDebugger for ScriptedDebugger {
    fn repair(
        &self,
        _task: &TaskSpec,
        _running_context: &str,
        failing_source: &str,
        stderr: &str,
    ) -> Result<String> {
        self.seen
            .borrow_mut()
            .push((failing_source.to_string(), stderr.to_string()));
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected repair call"))
    }
}

/// Vision analyzer that returns predetermined responses in order and records
/// the resolved input paths.
pub struct ScriptedVision {
    responses: RefCell<VecDeque<String>>,
    pub seen_inputs: RefCell<Vec<Vec<PathBuf>>>,
}

impl ScriptedVision {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().map(String::from).collect()),
            seen_inputs: RefCell::new(Vec::new()),
        }
    }
}

impl VisionAnalyzer for ScriptedVision {
    fn analyze(&self, inputs: &[PathBuf], _description: &str) -> Result<String> {
        self.seen_inputs.borrow_mut().push(inputs.to_vec());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("unexpected vision call"))
    }
}

/// Probe with a fixed answer for every module and syntax check; records
/// installations.
pub struct StaticProbe {
    present: bool,
    syntax_ok: bool,
    pub installed: RefCell<Vec<String>>,
}

impl StaticProbe {
    pub fn all_present() -> Self {
        Self {
            present: true,
            syntax_ok: true,
            installed: RefCell::new(Vec::new()),
        }
    }

    pub fn none_present() -> Self {
        Self {
            present: false,
            ..Self::all_present()
        }
    }

    pub fn rejecting_syntax() -> Self {
        Self {
            present: false,
            syntax_ok: false,
            ..Self::all_present()
        }
    }
}

impl LocalProbe for StaticProbe {
    fn parses(&self, _source: &str) -> Result<bool> {
        Ok(self.syntax_ok)
    }

    fn has_module(&self, _name: &str) -> Result<bool> {
        Ok(self.present)
    }

    fn install(&self, name: &str) -> Result<()> {
        self.installed.borrow_mut().push(name.to_string());
        Ok(())
    }
}

/// Registry with a fixed answer for every name.
pub struct StaticRegistry {
    exists: bool,
}

impl StaticRegistry {
    pub fn knows_everything() -> Self {
        Self { exists: true }
    }

    pub fn knows_nothing() -> Self {
        Self { exists: false }
    }
}

impl PackageRegistry for StaticRegistry {
    fn exists(&self, _name: &str) -> Result<bool> {
        Ok(self.exists)
    }
}
