//! The plan → execute → verify loop.

use std::collections::{BTreeMap, HashSet};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;

use super::events::LoopEvent;
use super::executor::{
    truncate_chars, AutomationRunner, KnowledgeSource, StepExecutor, StepResult,
    RECORDED_RESULT_BUDGET,
};
use super::log::{LogEntry, LogLevel, RunLog};
use super::plan::{PlanError, Planner, Step};
use super::task::{
    FailureReason, RunOutcome, Task, TaskRequest, TaskStatus, TaskType, MAX_ITERATIONS_DEFAULT,
};
use super::verifier::{Verification, Verifier};
use crate::model::Generator;
use crate::progress::{NewIteration, ProgressStore};

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Budget used when a request does not carry its own.
    pub max_iterations: u32,
    /// Pause between iterations. Zero disables it.
    pub iteration_delay: Duration,
    /// Replace an unparsable plan with a single step covering the objective.
    pub fallback_on_malformed_plan: bool,
    /// Buffered events per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS_DEFAULT,
            iteration_delay: Duration::from_millis(500),
            fallback_on_malformed_plan: true,
            event_capacity: 256,
        }
    }
}

impl LoopConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_iteration_delay(mut self, delay: Duration) -> Self {
        self.iteration_delay = delay;
        self
    }

    pub fn with_fallback_on_malformed_plan(mut self, enabled: bool) -> Self {
        self.fallback_on_malformed_plan = enabled;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Errors returned before a run starts. Everything after that is reported
/// through [`RunOutcome`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoopError {
    #[error("Agent {agent} is already running task {task_id}")]
    AlreadyRunning { agent: String, task_id: String },
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub agent_id: String,
    pub status: TaskStatus,
    pub task: Option<Task>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub logs: Vec<LogEntry>,
}

struct RunState {
    status: TaskStatus,
    task: Option<Task>,
    iteration: u32,
    max_iterations: u32,
    log: RunLog,
    cancel: Option<Arc<AtomicBool>>,
}

/// How a run ended, before it is folded into a [`RunOutcome`].
struct RunEnd {
    status: TaskStatus,
    reason: Option<FailureReason>,
}

impl RunEnd {
    fn complete() -> Self {
        Self {
            status: TaskStatus::Complete,
            reason: None,
        }
    }

    fn aborted() -> Self {
        Self {
            status: TaskStatus::Aborted,
            reason: None,
        }
    }

    fn failed(reason: FailureReason) -> Self {
        Self {
            status: TaskStatus::Failed,
            reason: Some(reason),
        }
    }
}

fn fault(err: impl Display) -> FailureReason {
    FailureReason::Error {
        message: err.to_string(),
    }
}

/// Drives one agent's tasks. At most one task runs at a time; `abort` and
/// `status` may be called from other tasks while `start` is pending.
pub struct LoopController {
    agent_id: String,
    generator: Arc<dyn Generator>,
    progress: ProgressStore,
    automation: Option<Arc<dyn AutomationRunner>>,
    knowledge: Option<Arc<dyn KnowledgeSource>>,
    config: LoopConfig,
    state: Mutex<RunState>,
    events: broadcast::Sender<LoopEvent>,
}

impl LoopController {
    pub fn new(
        agent_id: impl Into<String>,
        generator: Arc<dyn Generator>,
        progress: ProgressStore,
    ) -> Self {
        let config = LoopConfig::default();
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            agent_id: agent_id.into(),
            generator,
            progress,
            automation: None,
            knowledge: None,
            state: Mutex::new(RunState {
                status: TaskStatus::Idle,
                task: None,
                iteration: 0,
                max_iterations: config.max_iterations,
                log: RunLog::new(),
                cancel: None,
            }),
            config,
            events,
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        if config.event_capacity != self.config.event_capacity {
            self.events = broadcast::channel(config.event_capacity).0;
        }
        self.state_mut().max_iterations = config.max_iterations;
        self.config = config;
        self
    }

    pub fn with_automation(mut self, runner: Arc<dyn AutomationRunner>) -> Self {
        self.automation = Some(runner);
        self
    }

    pub fn with_knowledge(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(source);
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// New receiver for lifecycle events. Only events sent after this call
    /// are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<LoopEvent> {
        self.events.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn state_mut(&mut self) -> &mut RunState {
        self.state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self) -> StatusSnapshot {
        let state = self.state();
        StatusSnapshot {
            agent_id: self.agent_id.clone(),
            status: state.status,
            task: state.task.clone(),
            iteration: state.iteration,
            max_iterations: state.max_iterations,
            logs: state.log.entries().to_vec(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state().status == TaskStatus::Running
    }

    /// Request cancellation of the running task. Takes effect at the top of
    /// the next iteration. Returns false when nothing is running.
    pub fn abort(&self) -> bool {
        let requested = {
            let state = self.state();
            match &state.cancel {
                Some(flag) => {
                    flag.store(true, Ordering::SeqCst);
                    true
                }
                None => false,
            }
        };
        if requested {
            self.log(LogLevel::Warning, "Abort requested");
        }
        requested
    }

    /// Run `description` with the default budget.
    pub async fn run_task(
        &self,
        description: &str,
        task_type: TaskType,
    ) -> Result<RunOutcome, LoopError> {
        self.start(
            TaskRequest::new(description, task_type).with_max_iterations(self.config.max_iterations),
        )
        .await
    }

    /// Run a task to a terminal state.
    pub async fn start(&self, request: TaskRequest) -> Result<RunOutcome, LoopError> {
        let objective = request.description.clone();
        self.start_with_objective(request, objective).await
    }

    /// Like [`start`](Self::start), but plans from `objective` instead of the
    /// task description. Roles use this to add a persona or workspace context
    /// to planning without changing what executor prompts show.
    pub async fn start_with_objective(
        &self,
        request: TaskRequest,
        objective: String,
    ) -> Result<RunOutcome, LoopError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let task = {
            let mut state = self.state();
            if state.status == TaskStatus::Running {
                return Err(LoopError::AlreadyRunning {
                    agent: self.agent_id.clone(),
                    task_id: state.task.as_ref().map(|t| t.id.clone()).unwrap_or_default(),
                });
            }
            let id = request.id.clone().unwrap_or_else(|| self.new_task_id());
            let task = Task::from_request(id, &request, self.config.max_iterations);
            state.status = TaskStatus::Running;
            state.task = Some(task.clone());
            state.iteration = 0;
            state.max_iterations = task.max_iterations;
            state.log.clear();
            state.cancel = Some(cancel.clone());
            task
        };

        self.emit(LoopEvent::TaskStarted { task: task.clone() });
        self.log(
            LogLevel::Info,
            format!("Starting loop for task: {}", task.description),
        );

        let mut results = Vec::new();
        let end = match self
            .drive(&task, &request, &objective, &cancel, &mut results)
            .await
        {
            Ok(end) => end,
            Err(reason) => RunEnd::failed(reason),
        };

        Ok(self.finish(&task, end, results))
    }

    fn new_task_id(&self) -> String {
        format!("{}_{}", self.agent_id, uuid::Uuid::new_v4().simple())
    }

    async fn drive(
        &self,
        task: &Task,
        request: &TaskRequest,
        objective: &str,
        cancel: &AtomicBool,
        results: &mut Vec<StepResult>,
    ) -> Result<RunEnd, FailureReason> {
        self.progress
            .update_status(&task.id, TaskStatus::Running)
            .map_err(fault)?;

        let steps = match self.plan(task, request, objective).await {
            Ok(steps) => steps,
            Err(end) => return Ok(end),
        };
        self.emit(LoopEvent::PlanReady {
            task_id: task.id.clone(),
            steps: steps.clone(),
        });

        let executor = StepExecutor::new(&self.agent_id, self.generator.clone(), self.progress.clone())
            .with_automation(self.automation.clone())
            .with_knowledge(self.knowledge.clone());
        let verifier = Verifier::new(self.generator.clone());

        let mut completed: HashSet<String> = HashSet::new();
        let mut iteration = 0;

        while iteration < task.max_iterations && completed.len() < steps.len() {
            iteration += 1;
            self.state().iteration = iteration;
            self.emit(LoopEvent::IterationStarted {
                task_id: task.id.clone(),
                iteration,
                max_iterations: task.max_iterations,
            });

            if cancel.load(Ordering::SeqCst) {
                self.log(LogLevel::Warning, "Task aborted by user");
                return Ok(RunEnd::aborted());
            }

            let Some(step) = steps.iter().find(|s| s.is_ready(&completed)) else {
                let blocked: Vec<String> = steps
                    .iter()
                    .filter(|s| !completed.contains(&s.id))
                    .map(|s| s.id.clone())
                    .collect();
                self.log(
                    LogLevel::Error,
                    format!("No step is ready; blocked steps: {}", blocked.join(", ")),
                );
                return Ok(RunEnd::failed(FailureReason::UnsatisfiableDependencies {
                    blocked,
                }));
            };

            self.emit(LoopEvent::StepStarted {
                task_id: task.id.clone(),
                step_id: step.id.clone(),
                iteration,
            });
            self.log(
                LogLevel::Info,
                format!("Executing step {}: {}", step.id, step.description),
            );

            let attempt = executor.execute(step, &task.id, results.as_slice()).await;
            let (result, verification) = match attempt {
                Ok(result) => {
                    self.progress
                        .record_iteration(
                            &task.id,
                            NewIteration {
                                action: step.description.clone(),
                                result: truncate_chars(&result.output, RECORDED_RESULT_BUDGET)
                                    .to_string(),
                                self_reported_complete: result.self_reported_complete,
                                error: None,
                            },
                        )
                        .map_err(fault)?;
                    let verification = verifier.verify(&result, step).await;
                    (Some(result), verification)
                }
                Err(e) => {
                    self.log(
                        LogLevel::Warning,
                        format!("Step {} could not run: {}", step.id, e),
                    );
                    self.progress
                        .record_iteration(
                            &task.id,
                            NewIteration {
                                action: step.description.clone(),
                                result: String::new(),
                                self_reported_complete: false,
                                error: Some(e.to_string()),
                            },
                        )
                        .map_err(fault)?;
                    (None, Verification::failed(e.to_string()))
                }
            };

            match result.filter(|_| verification.passed) {
                Some(result) => {
                    completed.insert(step.id.clone());
                    results.push(result.clone());
                    self.log(
                        LogLevel::Success,
                        format!("Step {} completed successfully", step.id),
                    );
                    self.emit(LoopEvent::StepCompleted {
                        task_id: task.id.clone(),
                        step_id: step.id.clone(),
                        iteration,
                        result,
                    });
                    self.progress
                        .record_learning(
                            &task.id,
                            &format!("Step \"{}\" succeeded", step.description),
                        )
                        .map_err(fault)?;
                }
                None => self.record_failed_step(task, step, iteration, &verification)?,
            }

            let more_work = iteration < task.max_iterations && completed.len() < steps.len();
            if more_work && !self.config.iteration_delay.is_zero() {
                tokio::time::sleep(self.config.iteration_delay).await;
            }
        }

        if completed.len() == steps.len() {
            Ok(RunEnd::complete())
        } else if cancel.load(Ordering::SeqCst) {
            self.log(LogLevel::Warning, "Task aborted by user");
            Ok(RunEnd::aborted())
        } else {
            Ok(RunEnd::failed(FailureReason::MaxIterationsReached))
        }
    }

    /// Steps for the run, or the terminal state when planning gates it.
    async fn plan(
        &self,
        task: &Task,
        request: &TaskRequest,
        objective: &str,
    ) -> Result<Vec<Step>, RunEnd> {
        self.log(LogLevel::Info, "Breaking down task into steps...");
        let planner = Planner::new(self.generator.clone());
        let planned = planner
            .plan(objective, task.task_type, request.automation_steps.as_deref())
            .await;

        match planned {
            Ok(steps) => {
                self.log(
                    LogLevel::Info,
                    format!("Task broken into {} steps", steps.len()),
                );
                Ok(steps)
            }
            Err(PlanError::Malformed(detail)) if self.config.fallback_on_malformed_plan => {
                self.log(
                    LogLevel::Warning,
                    format!("Plan was malformed ({}); using a single step", detail),
                );
                Ok(Planner::fallback(&task.description))
            }
            Err(PlanError::Malformed(detail)) => {
                self.log(LogLevel::Error, format!("Plan was malformed: {}", detail));
                Err(RunEnd::failed(FailureReason::PlanMalformed { detail }))
            }
            Err(e @ PlanError::Generation(_)) => {
                self.log(LogLevel::Error, format!("Failed to break down task: {}", e));
                Err(RunEnd::failed(fault(e)))
            }
        }
    }

    fn record_failed_step(
        &self,
        task: &Task,
        step: &Step,
        iteration: u32,
        verification: &Verification,
    ) -> Result<(), FailureReason> {
        self.log(
            LogLevel::Warning,
            format!(
                "Step {} failed verification: {}",
                step.id, verification.feedback
            ),
        );
        self.emit(LoopEvent::StepFailed {
            task_id: task.id.clone(),
            step_id: step.id.clone(),
            iteration,
            feedback: verification.feedback.clone(),
        });
        self.progress
            .record_error(&task.id, &verification.feedback, &step.description)
            .map_err(fault)?;
        self.progress
            .record_learning(
                &task.id,
                &format!(
                    "Step \"{}\" failed: {}. Will retry with corrections.",
                    step.description, verification.feedback
                ),
            )
            .map_err(fault)
    }

    fn finish(&self, task: &Task, end: RunEnd, results: Vec<StepResult>) -> RunOutcome {
        let iterations = self.state().iteration;

        let error = match &end.reason {
            Some(FailureReason::Error { message }) => Some(message.clone()),
            _ => None,
        };
        match end.status {
            TaskStatus::Complete => self.log(
                LogLevel::Success,
                format!("Task completed successfully in {} iterations", iterations),
            ),
            TaskStatus::Aborted => self.log(
                LogLevel::Warning,
                format!("Task aborted after {} iterations", iterations),
            ),
            _ => {
                let reason = end
                    .reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.log(
                    LogLevel::Error,
                    format!("Task failed after {} iterations: {}", iterations, reason),
                );
            }
        }

        if let Some(message) = &error {
            if let Err(e) = self
                .progress
                .record_error(&task.id, message, "loop execution")
            {
                tracing::error!(task_id = %task.id, error = %e, "failed to record loop error");
            }
        }
        if let Err(e) = self.progress.update_status(&task.id, end.status) {
            tracing::error!(task_id = %task.id, error = %e, "failed to persist final status");
        }

        let logs = {
            let mut state = self.state();
            state.status = end.status;
            state.task = None;
            state.cancel = None;
            state.log.entries().to_vec()
        };

        self.emit(LoopEvent::RunTerminal {
            task_id: task.id.clone(),
            status: end.status,
            reason: end.reason.clone(),
            iterations,
        });

        RunOutcome {
            task_id: task.id.clone(),
            success: end.status == TaskStatus::Complete,
            status: end.status,
            iterations,
            reason: end.reason,
            error,
            results: results
                .into_iter()
                .map(|r| (r.step_id.clone(), r))
                .collect::<BTreeMap<_, _>>(),
            logs,
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let entry = {
            let mut state = self.state();
            let iteration = state.iteration;
            state.log.log(level, message, iteration)
        };
        tracing::debug!(agent = %self.agent_id, "log entry recorded");
        self.emit(LoopEvent::Log(entry));
    }

    fn emit(&self, event: LoopEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{COMPLETION_MARKER, PLANNER_SYSTEM_INSTRUCTION, VERIFIER_SYSTEM_INSTRUCTION};
    use crate::model::ModelError;
    use crate::test_support::{GatedGenerator, ScriptedGenerator};
    use serde_json::json;
    use std::collections::VecDeque;

    fn fast() -> LoopConfig {
        LoopConfig::default().with_iteration_delay(Duration::ZERO)
    }

    fn controller(generator: Arc<dyn Generator>) -> LoopController {
        LoopController::new("ralph", generator, ProgressStore::in_memory()).with_config(fast())
    }

    fn is_executor(system: &str) -> bool {
        system != PLANNER_SYSTEM_INSTRUCTION && system != VERIFIER_SYSTEM_INSTRUCTION
    }

    /// Generator that answers planning, execution and verification calls
    /// from three separate queues.
    fn routed(plan: &str, executions: Vec<String>, verdicts: Vec<String>) -> ScriptedGenerator {
        let plan = plan.to_string();
        let executions = Mutex::new(VecDeque::from(executions));
        let verdicts = Mutex::new(VecDeque::from(verdicts));
        ScriptedGenerator::from_fn(move |_, system| {
            let next = if system == PLANNER_SYSTEM_INSTRUCTION {
                Some(plan.clone())
            } else if system == VERIFIER_SYSTEM_INSTRUCTION {
                verdicts.lock().unwrap().pop_front()
            } else {
                executions.lock().unwrap().pop_front()
            };
            next.ok_or_else(|| ModelError::Unavailable("script exhausted".to_string()))
        })
    }

    fn drain(rx: &mut broadcast::Receiver<LoopEvent>) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_single_step_memo_completes_in_one_iteration() {
        let generator = Arc::new(routed(
            r#"[{"id": "step_1", "description": "Write the memo", "verification": "One paragraph"}]"#,
            vec![format!("The memo paragraph.\n{}", COMPLETION_MARKER)],
            vec![],
        ));
        let progress = ProgressStore::in_memory();
        let controller = LoopController::new("legal", generator.clone(), progress.clone())
            .with_config(fast().with_fallback_on_malformed_plan(false));

        let outcome = controller
            .start(TaskRequest::new("draft a one-paragraph memo", TaskType::Document).with_id("memo"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status, TaskStatus::Complete);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.results["step_1"].output, "The memo paragraph.");

        let record = progress.progress("memo").unwrap();
        assert_eq!(record.iterations.len(), 1);
        assert_eq!(record.status, TaskStatus::Complete);
        assert!(record.completed_at.is_some());
        // plan + execute; self-reported completion needs no judge call
        assert_eq!(generator.call_count(), 2);
        assert_eq!(controller.status().status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_fails_after_exactly_n_iterations() {
        let generator = Arc::new(ScriptedGenerator::from_fn(|_, system| {
            Ok(if system == PLANNER_SYSTEM_INSTRUCTION {
                r#"[{"id": "step_1", "description": "Polish", "verification": "Perfect"}]"#
                    .to_string()
            } else if system == VERIFIER_SYSTEM_INSTRUCTION {
                r#"{"passed": false, "feedback": "not perfect yet"}"#.to_string()
            } else {
                "another draft".to_string()
            })
        }));
        let progress = ProgressStore::in_memory();
        let controller =
            LoopController::new("ralph", generator, progress.clone()).with_config(fast());

        let outcome = controller
            .start(
                TaskRequest::new("polish", TaskType::Custom)
                    .with_id("budget")
                    .with_max_iterations(3),
            )
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.reason, Some(FailureReason::MaxIterationsReached));
        assert!(outcome.results.is_empty());

        let record = progress.progress("budget").unwrap();
        assert_eq!(record.iterations.len(), 3);
        assert_eq!(record.errors.len(), 3);
        assert_eq!(record.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_self_dependency_is_unsatisfiable() {
        let generator = Arc::new(routed(
            r#"[{"id": "step_1", "description": "Loop", "verification": "x", "dependencies": ["step_1"]}]"#,
            vec![],
            vec![],
        ));
        let controller = controller(generator.clone());
        let outcome = controller
            .start(TaskRequest::new("cycle", TaskType::Custom))
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(
            outcome.reason,
            Some(FailureReason::UnsatisfiableDependencies {
                blocked: vec!["step_1".to_string()]
            })
        );
        assert_eq!(outcome.iterations, 1);
        assert_eq!(generator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mutual_dependency_is_unsatisfiable_after_free_steps() {
        let plan = r#"[
            {"id": "a", "description": "A", "verification": "x", "dependencies": ["b"]},
            {"id": "b", "description": "B", "verification": "x", "dependencies": ["a"]},
            {"id": "c", "description": "C", "verification": "x"}
        ]"#;
        let generator = Arc::new(routed(
            plan,
            vec![format!("c done {}", COMPLETION_MARKER)],
            vec![],
        ));
        let controller = controller(generator);
        let outcome = controller
            .start(TaskRequest::new("cycle", TaskType::Custom).with_max_iterations(10))
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(
            outcome.reason,
            Some(FailureReason::UnsatisfiableDependencies {
                blocked: vec!["a".to_string(), "b".to_string()]
            })
        );
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.results.contains_key("c"));
    }

    #[tokio::test]
    async fn test_dangling_dependency_is_unsatisfiable() {
        let generator = Arc::new(routed(
            r#"[{"id": "step_1", "description": "A", "verification": "x", "dependencies": ["ghost"]}]"#,
            vec![],
            vec![],
        ));
        let outcome = controller(generator)
            .start(TaskRequest::new("dangling", TaskType::Custom))
            .await
            .unwrap();
        assert!(matches!(
            outcome.reason,
            Some(FailureReason::UnsatisfiableDependencies { .. })
        ));
    }

    #[tokio::test]
    async fn test_dependencies_run_before_dependents() {
        let plan = r#"[
            {"id": "write", "description": "Write", "verification": "x", "dependencies": ["outline"]},
            {"id": "outline", "description": "Outline", "verification": "x"},
            {"id": "review", "description": "Review", "verification": "x", "dependencies": ["write", "outline"]}
        ]"#;
        let done = |s: &str| format!("{} {}", s, COMPLETION_MARKER);
        let generator = Arc::new(routed(
            plan,
            vec![done("outline"), done("draft"), done("review")],
            vec![],
        ));
        let controller = controller(generator);
        let mut rx = controller.subscribe();

        let outcome = controller
            .start(TaskRequest::new("essay", TaskType::Document))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.iterations, 3);

        let started: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                LoopEvent::StepStarted { step_id, .. } => Some(step_id),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["outline", "write", "review"]);
    }

    #[tokio::test]
    async fn test_failed_step_feedback_reaches_next_attempt() {
        let generator = Arc::new(routed(
            r#"[{"id": "step_1", "description": "Draft NDA", "verification": "Has a term clause"}]"#,
            vec![
                "NDA without term".to_string(),
                format!("NDA with term clause {}", COMPLETION_MARKER),
            ],
            vec![r#"{"passed": false, "feedback": "missing the term clause"}"#.to_string()],
        ));
        let controller = controller(generator.clone());

        let outcome = controller
            .start(TaskRequest::new("nda", TaskType::Document))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);

        let prompts: Vec<String> = generator
            .calls()
            .into_iter()
            .filter(|c| is_executor(&c.system))
            .map(|c| c.prompt)
            .collect();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("missing the term clause"));
        assert!(prompts[1].contains("missing the term clause"));
        assert!(prompts[1].contains("Will retry with corrections."));
    }

    #[tokio::test]
    async fn test_execution_error_is_retried_not_fatal() {
        let executions = Mutex::new(VecDeque::from(vec![
            Err(ModelError::ApiError("503 from upstream".to_string())),
            Ok(format!("summary {}", COMPLETION_MARKER)),
        ]));
        let generator = Arc::new(ScriptedGenerator::from_fn(move |_, system| {
            if system == PLANNER_SYSTEM_INSTRUCTION {
                return Ok(
                    r#"[{"id": "step_1", "description": "Summarize", "verification": "x"}]"#
                        .to_string(),
                );
            }
            executions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ModelError::Unavailable("script exhausted".to_string())))
        }));

        let progress = ProgressStore::in_memory();
        let controller =
            LoopController::new("ralph", generator, progress.clone()).with_config(fast());
        let outcome = controller
            .start(TaskRequest::new("sum", TaskType::Research).with_id("flaky"))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);
        let record = progress.progress("flaky").unwrap();
        assert!(record.iterations[0].error.as_deref().unwrap().contains("503"));
        assert!(record.errors[0].error.contains("503"));
    }

    #[tokio::test]
    async fn test_planning_failure_fails_the_task() {
        let generator = Arc::new(ScriptedGenerator::sequence(Vec::<&str>::new()));
        let progress = ProgressStore::in_memory();
        let controller =
            LoopController::new("ralph", generator, progress.clone()).with_config(fast());
        let outcome = controller
            .start(TaskRequest::new("x", TaskType::Custom).with_id("noplan"))
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(matches!(outcome.reason, Some(FailureReason::Error { .. })));
        assert!(outcome.error.is_some());
        assert_eq!(outcome.iterations, 0);
        let record = progress.progress("noplan").unwrap();
        assert_eq!(record.errors[0].context, "loop execution");
    }

    #[tokio::test]
    async fn test_malformed_plan_falls_back_or_fails() {
        let make = || {
            Arc::new(routed(
                "I would rather not",
                vec![format!("did it {}", COMPLETION_MARKER)],
                vec![],
            ))
        };

        let outcome = controller(make())
            .start(TaskRequest::new("tidy the docs", TaskType::Custom))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.results.contains_key("step_1"));

        let strict = LoopController::new("ralph", make(), ProgressStore::in_memory())
            .with_config(fast().with_fallback_on_malformed_plan(false));
        let outcome = strict
            .start(TaskRequest::new("tidy the docs", TaskType::Custom))
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(matches!(
            outcome.reason,
            Some(FailureReason::PlanMalformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_during_call_ends_aborted() {
        let plan = r#"[
            {"id": "step_1", "description": "First", "verification": "x"},
            {"id": "step_2", "description": "Second", "verification": "x", "dependencies": ["step_1"]}
        ]"#;
        let gated = Arc::new(GatedGenerator::new(
            vec![plan.to_string(), format!("first {}", COMPLETION_MARKER)],
            2,
        ));
        let controller = Arc::new(
            LoopController::new("ralph", gated.clone(), ProgressStore::in_memory())
                .with_config(fast()),
        );

        let runner = controller.clone();
        let handle = tokio::spawn(async move {
            runner
                .start(TaskRequest::new("two steps", TaskType::Custom))
                .await
        });

        gated.entered().await;
        assert!(controller.is_running());
        let second = controller
            .start(TaskRequest::new("another", TaskType::Custom))
            .await;
        assert!(matches!(second, Err(LoopError::AlreadyRunning { .. })));

        assert!(controller.abort());
        gated.release();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, TaskStatus::Aborted);
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 2);
        assert!(outcome.results.contains_key("step_1"));
        assert_eq!(gated.call_count(), 2);
        assert!(!controller.abort());
    }

    #[tokio::test]
    async fn test_automation_steps_skip_planning() {
        let generator = Arc::new(ScriptedGenerator::sequence(Vec::<&str>::new()));
        let automation = Arc::new(crate::test_support::ScriptedAutomation::new(vec![
            Ok("ok".to_string()),
            Ok("ok".to_string()),
        ]));
        let controller = LoopController::new("ralph", generator.clone(), ProgressStore::in_memory())
            .with_config(fast())
            .with_automation(automation);

        let outcome = controller
            .start(
                TaskRequest::new("log in", TaskType::Automation).with_automation_steps(vec![
                    json!({"type": "navigate", "url": "https://example.com"}),
                    json!({"type": "click", "selector": "#login"}),
                ]),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_events_bracket_the_run() {
        let generator = Arc::new(routed(
            r#"[{"id": "step_1", "description": "Go", "verification": "x"}]"#,
            vec![format!("went {}", COMPLETION_MARKER)],
            vec![],
        ));
        let controller = controller(generator);
        let mut rx = controller.subscribe();
        let outcome = controller.run_task("go", TaskType::Custom).await.unwrap();
        assert!(outcome.task_id.starts_with("ralph_"));

        let names: Vec<&'static str> = drain(&mut rx)
            .iter()
            .filter(|e| !matches!(e, LoopEvent::Log(_)))
            .map(LoopEvent::name)
            .collect();
        assert_eq!(
            names,
            vec![
                "task_started",
                "plan_ready",
                "iteration_started",
                "step_started",
                "step_completed",
                "run_terminal"
            ]
        );
        assert!(!outcome.logs.is_empty());
    }
}
