//! Task, status, and run outcome types.

use std::collections::BTreeMap;
use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::executor::StepResult;
use super::log::LogEntry;

/// Default iteration budget for a run.
pub const MAX_ITERATIONS_DEFAULT: u32 = 20;

/// Kinds of work a loop can be asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Document,
    Code,
    Research,
    Grant,
    Gtm,
    Automation,
    #[default]
    Custom,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Document => "document",
            TaskType::Code => "code",
            TaskType::Research => "research",
            TaskType::Grant => "grant",
            TaskType::Gtm => "gtm",
            TaskType::Automation => "automation",
            TaskType::Custom => "custom",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a task, shared by the controller and the progress store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Record exists but no run has touched it yet.
    #[default]
    Pending,
    Idle,
    Running,
    Complete,
    Failed,
    Aborted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Idle => "idle",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
            TaskStatus::Aborted => "aborted",
        }
    }

    /// True for `complete`, `failed` and `aborted`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Complete | TaskStatus::Failed | TaskStatus::Aborted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller hands to [`LoopController::start`](super::LoopController::start).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Explicit task id. Generated from the agent id when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub task_type: TaskType,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    /// Pre-built structural actions; when present planning is skipped.
    #[serde(default)]
    pub automation_steps: Option<Vec<Value>>,
}

impl TaskRequest {
    pub fn new(description: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            description: description.into(),
            task_type,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_automation_steps(mut self, steps: Vec<Value>) -> Self {
        self.automation_steps = Some(steps);
        self
    }
}

/// A task owned by one running loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub task_type: TaskType,
    pub max_iterations: u32,
    pub started_at: String,
    pub status: TaskStatus,
}

impl Task {
    pub(crate) fn from_request(id: String, request: &TaskRequest, default_budget: u32) -> Self {
        Self {
            id,
            description: request.description.clone(),
            task_type: request.task_type,
            max_iterations: request.max_iterations.unwrap_or(default_budget),
            started_at: Utc::now().to_rfc3339(),
            status: TaskStatus::Running,
        }
    }
}

/// Why a run ended in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Budget exhausted with steps still open.
    MaxIterationsReached,
    /// No step is ready but some are incomplete: a cycle or a dangling id.
    UnsatisfiableDependencies { blocked: Vec<String> },
    /// The plan could not be parsed and fallback is disabled.
    PlanMalformed { detail: String },
    /// A collaborator failed at the run boundary.
    Error { message: String },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MaxIterationsReached => write!(f, "max iterations reached"),
            FailureReason::UnsatisfiableDependencies { blocked } => write!(
                f,
                "unsatisfiable dependency graph (blocked steps: {})",
                blocked.join(", ")
            ),
            FailureReason::PlanMalformed { detail } => write!(f, "malformed plan: {}", detail),
            FailureReason::Error { message } => write!(f, "{}", message),
        }
    }
}

/// Definite outcome of a run. Returned for every run that was allowed to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub task_id: String,
    pub success: bool,
    pub status: TaskStatus,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Underlying collaborator message for `FailureReason::Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Completed step id -> result.
    pub results: BTreeMap<String, StepResult>,
    pub logs: Vec<LogEntry>,
}
