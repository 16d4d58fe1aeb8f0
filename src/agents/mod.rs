//! Collaborator interfaces for text and vision producers.
//!
//! The engine never talks to a model directly. These traits decouple the
//! orchestration loops from whatever produces code, fixes, and image
//! analyses; tests use scripted implementations that return predetermined
//! responses, and the CLI wires command-backed ones (see [`command`]).

use std::path::PathBuf;

use anyhow::Result;

use crate::plan::TaskSpec;

pub mod command;

pub use command::{CommandDebugger, CommandGenerator, CommandVision};

/// Produces the initial candidate source for a python task.
pub trait CodeGenerator {
    /// Generate source for `task`, given the accumulated output of completed
    /// tasks. The response may be fenced; callers apply fence extraction.
    fn generate(&self, task: &TaskSpec, running_context: &str) -> Result<String>;
}

/// Produces a corrected candidate from a failed one.
pub trait CodeDebugger {
    /// Repair `failing_source` given the stderr of its failed execution.
    fn repair(
        &self,
        task: &TaskSpec,
        running_context: &str,
        failing_source: &str,
        stderr: &str,
    ) -> Result<String>;
}

/// Produces a structured textual analysis of image artifacts.
pub trait VisionAnalyzer {
    /// Analyze the resolved input files per `description`. The response may
    /// be fenced JSON, or an error payload with an `error` key.
    fn analyze(&self, inputs: &[PathBuf], description: &str) -> Result<String>;
}
