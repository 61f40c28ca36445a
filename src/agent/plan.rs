//! Turning an objective into an ordered list of steps.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::task::TaskType;
use crate::config::{plan_prompt, PLANNER_SYSTEM_INSTRUCTION};
use crate::model::{extract_json_array, Generator, ModelError};

/// Criterion used by the single-step fallback plan.
pub const FALLBACK_CRITERION: &str = "Task completed successfully";

/// Criterion attached to every scripted automation step.
pub const AUTOMATION_CRITERION: &str = "Browser action completed successfully";

/// One planned unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    #[serde(alias = "verification")]
    pub verification_criterion: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Present on scripted structural actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_payload: Option<Value>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        verification_criterion: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            verification_criterion: verification_criterion.into(),
            dependencies: Vec::new(),
            action_payload: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_structural(&self) -> bool {
        self.action_payload.is_some()
    }

    /// True when every dependency is in `completed`.
    pub fn is_ready(&self, completed: &HashSet<String>) -> bool {
        !completed.contains(&self.id) && self.dependencies.iter().all(|d| completed.contains(d))
    }
}

/// Planning errors.
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("Planning call failed: {0}")]
    Generation(#[from] ModelError),
    #[error("Malformed plan: {0}")]
    Malformed(String),
}

/// Produces step lists through the generation service.
#[derive(Clone)]
pub struct Planner {
    generator: Arc<dyn Generator>,
}

impl Planner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Plan `objective`. Pre-built automation actions skip generation.
    ///
    /// Returns [`PlanError::Malformed`] for unusable model output; the caller
    /// decides whether to fall back to [`Planner::fallback`].
    pub async fn plan(
        &self,
        objective: &str,
        task_type: TaskType,
        automation_steps: Option<&[Value]>,
    ) -> Result<Vec<Step>, PlanError> {
        if let Some(actions) = automation_steps.filter(|a| !a.is_empty()) {
            tracing::info!(steps = actions.len(), "loading predefined automation steps");
            return Ok(Self::automation_chain(actions));
        }

        let prompt = plan_prompt(objective, task_type.as_str());
        let response = self
            .generator
            .generate(&prompt, PLANNER_SYSTEM_INSTRUCTION)
            .await?;
        let steps = Self::parse(&response)?;
        tracing::info!(steps = steps.len(), "task broken into steps");
        Ok(steps)
    }

    /// Wrap each action as a step depending on the one before it.
    pub fn automation_chain(actions: &[Value]) -> Vec<Step> {
        actions
            .iter()
            .enumerate()
            .map(|(i, action)| {
                let description = action
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Action: {}", action_type(action)));
                let mut step = Step::new(format!("step_{}", i + 1), description, AUTOMATION_CRITERION);
                if i > 0 {
                    step.dependencies.push(format!("step_{}", i));
                }
                step.action_payload = Some(action.clone());
                step
            })
            .collect()
    }

    /// Parse a model response into steps.
    ///
    /// Dependencies are not checked here; the loop detects cycles and
    /// dangling references when nothing is ready to run.
    pub fn parse(response: &str) -> Result<Vec<Step>, PlanError> {
        let json = extract_json_array(response)
            .ok_or_else(|| PlanError::Malformed("no JSON array in response".to_string()))?;
        let steps: Vec<Step> =
            serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))?;

        if steps.is_empty() {
            return Err(PlanError::Malformed("plan has no steps".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if step.id.trim().is_empty() {
                return Err(PlanError::Malformed("step with empty id".to_string()));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(PlanError::Malformed(format!("duplicate step id {}", step.id)));
            }
        }
        Ok(steps)
    }

    /// Single synthetic step covering the whole objective.
    pub fn fallback(objective: &str) -> Vec<Step> {
        vec![Step::new("step_1", objective, FALLBACK_CRITERION)]
    }
}

/// `type` field of an automation payload.
pub(crate) fn action_type(payload: &Value) -> &str {
    payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("action")
}
