//! Lifecycle events published by a running loop.

use serde::Serialize;

use super::executor::StepResult;
use super::log::LogEntry;
use super::plan::Step;
use super::task::{FailureReason, Task, TaskStatus};

/// Ordered stream of what a loop is doing. Delivered over a broadcast
/// channel, so every subscriber sees the same sequence.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoopEvent {
    TaskStarted {
        task: Task,
    },
    PlanReady {
        task_id: String,
        steps: Vec<Step>,
    },
    IterationStarted {
        task_id: String,
        iteration: u32,
        max_iterations: u32,
    },
    StepStarted {
        task_id: String,
        step_id: String,
        iteration: u32,
    },
    StepCompleted {
        task_id: String,
        step_id: String,
        iteration: u32,
        result: StepResult,
    },
    StepFailed {
        task_id: String,
        step_id: String,
        iteration: u32,
        feedback: String,
    },
    Log(LogEntry),
    RunTerminal {
        task_id: String,
        status: TaskStatus,
        reason: Option<FailureReason>,
        iterations: u32,
    },
}

impl LoopEvent {
    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::TaskStarted { .. } => "task_started",
            LoopEvent::PlanReady { .. } => "plan_ready",
            LoopEvent::IterationStarted { .. } => "iteration_started",
            LoopEvent::StepStarted { .. } => "step_started",
            LoopEvent::StepCompleted { .. } => "step_completed",
            LoopEvent::StepFailed { .. } => "step_failed",
            LoopEvent::Log(_) => "log",
            LoopEvent::RunTerminal { .. } => "run_terminal",
        }
    }
}
