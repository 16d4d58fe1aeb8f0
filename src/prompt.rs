//! Prompt rendering for collaborator invocations.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::plan::TaskSpec;

const GENERATOR_TEMPLATE: &str = include_str!("prompts/generator.md");
const DEBUGGER_TEMPLATE: &str = include_str!("prompts/debugger.md");
const VISION_TEMPLATE: &str = include_str!("prompts/vision.md");

/// Template environment for the three collaborator prompts.
pub struct PromptSet {
    env: Environment<'static>,
}

impl PromptSet {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("generator", GENERATOR_TEMPLATE)
            .expect("generator template is valid");
        env.add_template("debugger", DEBUGGER_TEMPLATE)
            .expect("debugger template is valid");
        env.add_template("vision", VISION_TEMPLATE)
            .expect("vision template is valid");
        Self { env }
    }

    /// Prompt for the initial code generation of a task.
    pub fn render_generator(&self, task: &TaskSpec, running_context: &str) -> Result<String> {
        let template = self.env.get_template("generator")?;
        let rendered = template
            .render(context! {
                task => task,
                context => non_empty(running_context),
            })
            .context("render generator prompt")?;
        Ok(rendered)
    }

    /// Prompt for repairing a failed candidate.
    pub fn render_debugger(
        &self,
        task: &TaskSpec,
        running_context: &str,
        failing_source: &str,
        stderr: &str,
    ) -> Result<String> {
        let template = self.env.get_template("debugger")?;
        let rendered = template
            .render(context! {
                task => task,
                context => non_empty(running_context),
                source => failing_source,
                stderr => stderr,
            })
            .context("render debugger prompt")?;
        Ok(rendered)
    }

    /// Prompt for a vision analysis of a task's input images.
    pub fn render_vision(&self, description: &str) -> Result<String> {
        let template = self.env.get_template("vision")?;
        let rendered = template
            .render(context! { description => description })
            .context("render vision prompt")?;
        Ok(rendered)
    }
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::new()
    }
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ToolKind;

    fn task() -> TaskSpec {
        TaskSpec {
            task_id: 2,
            description: "Compute the average rank.".to_string(),
            tool: ToolKind::Python,
            dependencies: vec![1],
            input_artifacts: vec!["task_1_movies.parquet".to_string()],
            output_artifacts: vec!["task_2_average.json".to_string()],
        }
    }

    #[test]
    fn generator_prompt_names_task_and_artifacts() {
        let prompt = PromptSet::new()
            .render_generator(&task(), "")
            .expect("render");

        assert!(prompt.contains("Task 2"));
        assert!(prompt.contains("Compute the average rank."));
        assert!(prompt.contains("task_1_movies.parquet"));
        assert!(prompt.contains("task_2_average.json"));
        assert!(!prompt.contains("Output of completed tasks"));
    }

    #[test]
    fn generator_prompt_includes_running_context_when_present() {
        let prompt = PromptSet::new()
            .render_generator(&task(), "1 output:\nrows=20")
            .expect("render");

        assert!(prompt.contains("Output of completed tasks"));
        assert!(prompt.contains("rows=20"));
    }

    #[test]
    fn debugger_prompt_carries_source_and_stderr() {
        let prompt = PromptSet::new()
            .render_debugger(&task(), "", "print(x)", "NameError: name 'x' is not defined")
            .expect("render");

        assert!(prompt.contains("print(x)"));
        assert!(prompt.contains("NameError"));
    }

    #[test]
    fn vision_prompt_embeds_instruction() {
        let prompt = PromptSet::new()
            .render_vision("Extract sales per person.")
            .expect("render");
        assert!(prompt.contains("Extract sales per person."));
        assert!(prompt.contains("\"error\""));
    }
}
