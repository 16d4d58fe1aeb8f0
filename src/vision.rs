//! Vision task handler: bounded retry, no repair step.

use anyhow::{Context, Result};
use std::fs;
use tracing::{debug, info, instrument, warn};

use crate::agents::VisionAnalyzer;
use crate::config::EngineConfig;
use crate::fence::extract_source;
use crate::plan::TaskSpec;
use crate::workspace::Workspace;

/// How a vision task resolved. Successful analyses are written to the task's
/// first output artifact and deliberately do not feed the running context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionTaskResult {
    Succeeded,
    Exhausted { last_error: String },
}

/// Run one vision task within the shared attempt budget. Each retry re-issues
/// the identical analysis call; there is no repair path for this tool kind.
#[instrument(skip_all, fields(task_id = task.task_id))]
pub fn run_vision_task(
    vision: &dyn VisionAnalyzer,
    workspace: &Workspace,
    config: &EngineConfig,
    task: &TaskSpec,
) -> Result<VisionTaskResult> {
    let Some(output_name) = task.output_artifacts.first() else {
        warn!("vision task declares no output artifact");
        return Ok(VisionTaskResult::Exhausted {
            last_error: "vision task declares no output artifact".to_string(),
        });
    };
    let inputs: Vec<_> = task
        .input_artifacts
        .iter()
        .map(|name| workspace.resolve(name))
        .collect();

    let total_attempts = 1 + config.max_repair_attempts;
    for attempt in 0..total_attempts {
        debug!(attempt = attempt + 1, total_attempts, "requesting analysis");
        let raw = vision.analyze(&inputs, &task.description)?;
        let analysis = extract_source(&raw);
        if analysis.is_empty() {
            warn!(attempt = attempt + 1, "analysis came back empty, retrying");
            continue;
        }

        let output_path = workspace.resolve(output_name);
        fs::write(&output_path, &analysis)
            .with_context(|| format!("write analysis {}", output_path.display()))?;
        info!(output = %output_name, "vision task succeeded");
        return Ok(VisionTaskResult::Succeeded);
    }

    Ok(VisionTaskResult::Exhausted {
        last_error: "vision analysis returned no output".to_string(),
    })
}
