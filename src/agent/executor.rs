//! Running a single step.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::plan::{action_type, Step};
use crate::config::{
    execute_prompt, executor_system_instruction, ExecutePromptParts, COMPLETION_MARKER,
    NO_PREVIOUS_RESULTS,
};
use crate::model::{Generator, ModelError};
use crate::progress::{ProgressError, ProgressStore};

/// Characters of each completed step's output shown to later steps.
pub const PREVIOUS_OUTPUT_BUDGET: usize = 500;

/// Characters of a step's output stored in the progress record.
pub const RECORDED_RESULT_BUDGET: usize = 1000;

/// Output of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    /// Output with the completion marker removed.
    pub output: String,
    pub self_reported_complete: bool,
}

/// Step execution errors.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Generation failed: {0}")]
    Generation(#[from] ModelError),
    #[error("Failed to read progress memory: {0}")]
    Memory(#[from] ProgressError),
}

/// Automation errors.
#[derive(Error, Debug, Clone)]
pub enum AutomationError {
    #[error("Automation action failed: {0}")]
    Failed(String),
    #[error("Automation runner unavailable: {0}")]
    Unavailable(String),
}

/// Performs scripted structural actions (for example a browser step).
#[async_trait]
pub trait AutomationRunner: Send + Sync {
    async fn run(&self, step_id: &str, payload: &Value) -> Result<String, AutomationError>;
}

/// Supplies role-specific reference material for a query.
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    async fn recall(&self, agent_id: &str, query: &str) -> Option<String>;
}

/// Executes steps on behalf of one agent.
#[derive(Clone)]
pub struct StepExecutor {
    agent_id: String,
    generator: Arc<dyn Generator>,
    progress: ProgressStore,
    automation: Option<Arc<dyn AutomationRunner>>,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
}

impl StepExecutor {
    pub fn new(
        agent_id: impl Into<String>,
        generator: Arc<dyn Generator>,
        progress: ProgressStore,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            generator,
            progress,
            automation: None,
            knowledge: None,
        }
    }

    pub fn with_automation(mut self, runner: Option<Arc<dyn AutomationRunner>>) -> Self {
        self.automation = runner;
        self
    }

    pub fn with_knowledge(mut self, source: Option<Arc<dyn KnowledgeSource>>) -> Self {
        self.knowledge = source;
        self
    }

    /// Run `step` for `task_id`. `previous` holds completed results in
    /// completion order.
    ///
    /// Automation failures are reported as a not-complete result rather than
    /// an error.
    pub async fn execute(
        &self,
        step: &Step,
        task_id: &str,
        previous: &[StepResult],
    ) -> Result<StepResult, ExecutorError> {
        if let Some(payload) = &step.action_payload {
            return Ok(self.run_action(step, payload).await);
        }

        let memory = self.progress.memory_digest(task_id)?;
        let knowledge = match &self.knowledge {
            Some(source) => source.recall(&self.agent_id, &step.description).await,
            None => None,
        };
        let previous_results = summarize_previous(previous);

        let prompt = execute_prompt(ExecutePromptParts {
            agent: &self.agent_id,
            memory: &memory,
            knowledge: knowledge.as_deref(),
            step_description: &step.description,
            verification_criterion: &step.verification_criterion,
            previous_results: &previous_results,
        });
        let system = executor_system_instruction(&self.agent_id);

        let response = self.generator.generate(&prompt, &system).await?;
        let (output, self_reported_complete) = strip_marker(&response);

        Ok(StepResult {
            step_id: step.id.clone(),
            output,
            self_reported_complete,
        })
    }

    async fn run_action(&self, step: &Step, payload: &Value) -> StepResult {
        let kind = action_type(payload);
        tracing::info!(step_id = %step.id, action = kind, "performing automation action");

        let Some(runner) = &self.automation else {
            return StepResult {
                step_id: step.id.clone(),
                output: format!(
                    "Automation action \"{}\" skipped: no automation runner configured",
                    kind
                ),
                self_reported_complete: false,
            };
        };

        match runner.run(&step.id, payload).await {
            Ok(response) => StepResult {
                step_id: step.id.clone(),
                output: format!("Automation action \"{}\" completed. Runner: {}", kind, response),
                self_reported_complete: true,
            },
            Err(e) => {
                tracing::warn!(step_id = %step.id, error = %e, "automation action failed");
                StepResult {
                    step_id: step.id.clone(),
                    output: format!("Automation action \"{}\" failed: {}", kind, e),
                    self_reported_complete: false,
                }
            }
        }
    }
}

/// Remove every completion marker and report whether one was present.
pub fn strip_marker(response: &str) -> (String, bool) {
    let complete = response.contains(COMPLETION_MARKER);
    let output = response.replace(COMPLETION_MARKER, "").trim().to_string();
    (output, complete)
}

/// Context block listing earlier results, each cut to
/// [`PREVIOUS_OUTPUT_BUDGET`] characters.
pub fn summarize_previous(previous: &[StepResult]) -> String {
    if previous.is_empty() {
        return NO_PREVIOUS_RESULTS.to_string();
    }
    previous
        .iter()
        .map(|r| {
            let cut = truncate_chars(&r.output, PREVIOUS_OUTPUT_BUDGET);
            if cut.len() < r.output.len() {
                format!("Step {}: {}...", r.step_id, cut)
            } else {
                format!("Step {}: {}", r.step_id, cut)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First `max` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
