//! The autonomous task loop: plan a task into steps, then execute and
//! verify one ready step per iteration until every step passes, the budget
//! runs out, or the run is aborted.

mod controller;
mod events;
mod executor;
mod log;
mod plan;
mod task;
mod verifier;

pub use controller::{LoopConfig, LoopController, LoopError, StatusSnapshot};
pub use events::LoopEvent;
pub use executor::{
    strip_marker, summarize_previous, truncate_chars, AutomationError, AutomationRunner,
    ExecutorError, KnowledgeSource, StepExecutor, StepResult, PREVIOUS_OUTPUT_BUDGET,
    RECORDED_RESULT_BUDGET,
};
pub use log::{LogEntry, LogLevel, RunLog};
pub use plan::{PlanError, Planner, Step, AUTOMATION_CRITERION, FALLBACK_CRITERION};
pub use task::{
    FailureReason, RunOutcome, Task, TaskRequest, TaskStatus, TaskType, MAX_ITERATIONS_DEFAULT,
};
pub use verifier::{Verification, Verifier, INCONCLUSIVE, SELF_VERIFIED};
