//! Plan model: task descriptors, JSON parsing, schema and invariant checks.

use std::collections::HashSet;

use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const PLAN_SCHEMA: &str = include_str!("../schemas/plan.schema.json");

/// Tool kind dispatched by the driver. Unknown values are preserved so the
/// driver can skip them with a warning instead of rejecting the whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Python,
    Vision,
    #[serde(other)]
    Unknown,
}

/// One unit of work in a plan.
///
/// `dependencies` documents ordering intent; execution is strictly in list
/// order, and [`Plan::validate`] rejects a list order that contradicts the
/// declared edges rather than trusting it silently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: u64,
    pub description: String,
    #[serde(rename = "tool_needed")]
    pub tool: ToolKind,
    #[serde(default)]
    pub dependencies: Vec<u64>,
    #[serde(default)]
    pub input_artifacts: Vec<String>,
    #[serde(default)]
    pub output_artifacts: Vec<String>,
}

/// Ordered, validated sequence of task descriptors for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    tasks: Vec<TaskSpec>,
}

/// Fatal plan problems, raised before any task executes.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("failed to parse plan JSON: {0}")]
    Parse(String),
    #[error("plan schema validation failed:\n- {}", .0.join("\n- "))]
    Schema(Vec<String>),
    #[error("plan invariant violations:\n- {}", .0.join("\n- "))]
    Invariant(Vec<String>),
}

impl Plan {
    /// Parse a plan from JSON text. Malformed JSON, schema violations, and
    /// invariant violations all fail here, before execution starts.
    pub fn from_json(text: &str) -> Result<Self, PlanError> {
        let value: Value =
            serde_json::from_str(text).map_err(|err| PlanError::Parse(err.to_string()))?;
        validate_schema(&value)?;
        let tasks: Vec<TaskSpec> =
            serde_json::from_value(value).map_err(|err| PlanError::Parse(err.to_string()))?;
        Self::from_tasks(tasks)
    }

    /// Build a plan from an already-structured task sequence.
    pub fn from_tasks(tasks: Vec<TaskSpec>) -> Result<Self, PlanError> {
        let plan = Self { tasks };
        plan.validate()?;
        Ok(plan)
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Semantic invariants: task ids unique; every declared dependency names
    /// a task that appears earlier in the list.
    fn validate(&self) -> Result<(), PlanError> {
        let mut errors = Vec::new();
        let mut seen: HashSet<u64> = HashSet::new();

        for task in &self.tasks {
            if !seen.insert(task.task_id) {
                errors.push(format!("duplicate task_id {}", task.task_id));
            }
            for dep in &task.dependencies {
                if *dep == task.task_id {
                    errors.push(format!("task {} depends on itself", task.task_id));
                } else if !seen.contains(dep) {
                    errors.push(format!(
                        "task {} depends on {}, which does not appear earlier in the plan",
                        task.task_id, dep
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PlanError::Invariant(errors))
        }
    }
}

/// Validate the raw plan document against the bundled JSON Schema
/// (Draft 2020-12).
fn validate_schema(instance: &Value) -> Result<(), PlanError> {
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).expect("bundled plan schema is valid");
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("bundled plan schema compiles");
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        Ok(())
    } else {
        Err(PlanError::Schema(messages))
    }
}
