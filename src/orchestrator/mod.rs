//! Dispatch of scheduled and ad-hoc tasks onto role agents.
//!
//! Queued tasks run one after another. A failed task never stops the queue;
//! every result is collected and returned at the end.

mod schedule;

pub use schedule::{
    quarter_name, Day, DayPlan, QuarterWindow, Schedule, ScheduleError, ScheduledTask,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use thiserror::Error;

use crate::agent::{RunOutcome, TaskType};
use crate::roles::{profile_or_default, AgentRegistry};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Orchestrator is already running a queue")]
    AlreadyRunning,
    #[error("No weekly tasks found for agent: {0}")]
    NoWeeklyTasks(String),
}

/// What is scheduled for one date.
#[derive(Debug, Clone, Serialize)]
pub struct DailyAgenda {
    pub date: NaiveDate,
    pub day: Day,
    pub focus: String,
    pub description: String,
    pub tasks: Vec<ScheduledTask>,
    pub milestone: Option<String>,
    pub quarter: String,
}

/// Result of one dispatched task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub agent_id: String,
    pub task: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub current_agent: Option<String>,
    pub queued: usize,
    pub completed: usize,
}

#[derive(Default)]
struct DispatchState {
    queue: Vec<ScheduledTask>,
    current_agent: Option<String>,
    completed: Vec<TaskReport>,
}

pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    schedule: Schedule,
    running: AtomicBool,
    state: Mutex<DispatchState>,
}

/// Task type a role's scheduled work runs as.
pub fn task_type_for(agent_id: &str) -> TaskType {
    profile_or_default(agent_id).task_type
}

impl Orchestrator {
    pub fn new(registry: Arc<AgentRegistry>, schedule: Schedule) -> Self {
        Self {
            registry,
            schedule,
            running: AtomicBool::new(false),
            state: Mutex::new(DispatchState::default()),
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    fn state(&self) -> std::sync::MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn daily_agenda(&self, date: NaiveDate) -> DailyAgenda {
        let day = Day::from(date.weekday());
        let (focus, description) = self
            .schedule
            .day_plan(day)
            .map(|p| (p.focus.clone(), p.description.clone()))
            .unwrap_or_default();
        DailyAgenda {
            date,
            day,
            focus,
            description,
            tasks: self.schedule.tasks_for(day),
            milestone: self.schedule.milestone(date).map(str::to_string),
            quarter: quarter_name(date),
        }
    }

    /// Replace the queue with the tasks scheduled for `date`.
    pub fn queue_daily_tasks(&self, date: NaiveDate) -> Vec<ScheduledTask> {
        let tasks = self.daily_agenda(date).tasks;
        tracing::info!(date = %date, queued = tasks.len(), "queued daily tasks");
        self.state().queue = tasks.clone();
        tasks
    }

    pub fn queued(&self) -> Vec<ScheduledTask> {
        self.state().queue.clone()
    }

    pub fn status(&self) -> OrchestratorStatus {
        let state = self.state();
        OrchestratorStatus {
            running: self.running.load(Ordering::SeqCst),
            current_agent: state.current_agent.clone(),
            queued: state.queue.len(),
            completed: state.completed.len(),
        }
    }

    /// Reports of every task dispatched so far.
    pub fn completed(&self) -> Vec<TaskReport> {
        self.state().completed.clone()
    }

    /// Run `description` on the agent for `agent_id`, falling back to the
    /// generalist for unknown roles.
    pub async fn run_agent_task(&self, agent_id: &str, description: &str) -> TaskReport {
        self.dispatch(agent_id, description, description).await
    }

    async fn dispatch(&self, agent_id: &str, name: &str, prompt: &str) -> TaskReport {
        let agent = self.registry.get_or_default(agent_id);
        self.state().current_agent = Some(agent_id.to_string());
        tracing::info!(agent = agent_id, task = name, "dispatching task");

        let result = agent.run_task(prompt, task_type_for(agent_id)).await;
        let report = match result {
            Ok(outcome) => TaskReport {
                agent_id: agent_id.to_string(),
                task: name.to_string(),
                success: outcome.success,
                error: outcome.reason.as_ref().map(ToString::to_string),
                outcome: Some(outcome),
            },
            Err(e) => {
                tracing::error!(agent = agent_id, task = name, error = %e, "task dispatch failed");
                TaskReport {
                    agent_id: agent_id.to_string(),
                    task: name.to_string(),
                    success: false,
                    outcome: None,
                    error: Some(e.to_string()),
                }
            }
        };

        let mut state = self.state();
        state.current_agent = None;
        state.completed.push(report.clone());
        report
    }

    async fn run_tasks(&self, tasks: Vec<ScheduledTask>) -> Vec<TaskReport> {
        let mut reports = Vec::with_capacity(tasks.len());
        for task in tasks {
            reports.push(self.dispatch(&task.agent_id, &task.name, &task.task_prompt).await);
        }
        reports
    }

    /// Drain the queue sequentially.
    pub async fn run_queue(&self) -> Result<Vec<TaskReport>, OrchestratorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyRunning);
        }
        let tasks = std::mem::take(&mut self.state().queue);
        tracing::info!(tasks = tasks.len(), "running queue");

        let reports = self.run_tasks(tasks).await;

        self.running.store(false, Ordering::SeqCst);
        let failed = reports.iter().filter(|r| !r.success).count();
        tracing::info!(total = reports.len(), failed, "queue finished");
        Ok(reports)
    }

    /// Run `agent_id`'s weekly tasks scheduled for `date`'s weekday.
    pub async fn run_agent_weekly_tasks(
        &self,
        agent_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<TaskReport>, OrchestratorError> {
        if !self.schedule.has_weekly_tasks(agent_id) {
            return Err(OrchestratorError::NoWeeklyTasks(agent_id.to_string()));
        }
        let tasks = self
            .schedule
            .agent_tasks_for(agent_id, Day::from(date.weekday()));
        Ok(self.run_tasks(tasks).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::LoopConfig;
    use crate::config::{COMPLETION_MARKER, PLANNER_SYSTEM_INSTRUCTION};
    use crate::progress::ProgressStore;
    use crate::roles::SharedServices;
    use crate::test_support::{ScriptedCommandRunner, ScriptedGenerator};
    use crate::model::ModelError;
    use crate::vcs::WorkspaceManager;
    use std::time::Duration;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn orchestrator(generator: Arc<ScriptedGenerator>) -> Orchestrator {
        let services = SharedServices::new(
            generator,
            ProgressStore::in_memory(),
            WorkspaceManager::new(
                Arc::new(ScriptedCommandRunner::from_fn(|_| Ok(String::new()))),
                "/repo",
            ),
        )
        .with_loop_config(
            LoopConfig::default()
                .with_max_iterations(1)
                .with_iteration_delay(Duration::ZERO),
        );
        Orchestrator::new(Arc::new(AgentRegistry::new(&services)), Schedule::default())
    }

    /// Plans one step per task. The contract review step always fails to
    /// execute; everything else self-verifies.
    fn generator() -> Arc<ScriptedGenerator> {
        Arc::new(ScriptedGenerator::from_fn(|prompt, system| {
            if system == PLANNER_SYSTEM_INSTRUCTION {
                let description = if prompt.contains("contracts") {
                    "Review contracts"
                } else {
                    "Do it"
                };
                return Ok(format!(
                    r#"[{{"id": "step_1", "description": "{}", "verification": "Done"}}]"#,
                    description
                ));
            }
            if prompt.contains("Review contracts") {
                return Err(ModelError::ApiError("upstream down".to_string()));
            }
            Ok(format!("done {}", COMPLETION_MARKER))
        }))
    }

    #[test]
    fn test_daily_agenda() {
        let orchestrator = orchestrator(generator());
        let agenda = orchestrator.daily_agenda(monday());
        assert_eq!(agenda.day, Day::Monday);
        assert_eq!(agenda.focus, "Planning & Research");
        assert_eq!(agenda.milestone.as_deref(), Some("Monthly planning & OKR check-in"));
        assert_eq!(agenda.quarter, "Q1");
        assert_eq!(agenda.tasks.len(), 10);

        let tuesday = orchestrator.daily_agenda(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert!(tuesday.tasks.is_empty());
        assert_eq!(tuesday.milestone, None);
    }

    #[test]
    fn test_task_type_per_role() {
        assert_eq!(task_type_for("finance"), TaskType::Grant);
        assert_eq!(task_type_for("gtm"), TaskType::Gtm);
        assert_eq!(task_type_for("legal"), TaskType::Custom);
        assert_eq!(task_type_for("nobody"), TaskType::Custom);
    }

    #[tokio::test]
    async fn test_queue_collects_every_result() {
        let orchestrator = orchestrator(generator());
        let queued = orchestrator.queue_daily_tasks(monday());
        assert_eq!(orchestrator.status().queued, queued.len());

        let reports = orchestrator.run_queue().await.unwrap();
        assert_eq!(reports.len(), queued.len());

        let legal = reports.iter().find(|r| r.agent_id == "legal").unwrap();
        assert!(!legal.success);
        assert!(legal.outcome.is_some());
        assert!(reports.iter().filter(|r| r.agent_id != "legal").all(|r| r.success));

        let status = orchestrator.status();
        assert!(!status.running);
        assert_eq!(status.queued, 0);
        assert_eq!(status.completed, queued.len());
        assert_eq!(status.current_agent, None);
    }

    #[tokio::test]
    async fn test_unknown_agent_runs_on_generalist() {
        let generator = generator();
        let orchestrator = orchestrator(generator.clone());
        let report = orchestrator.run_agent_task("janitor", "sweep the floor").await;
        assert!(report.success);
        let outcome = report.outcome.unwrap();
        assert!(outcome.task_id.starts_with("ralph_"));
        assert!(!generator.calls()[0].prompt.contains("ROLE:"));
    }

    #[tokio::test]
    async fn test_weekly_tasks_for_one_agent() {
        let orchestrator = orchestrator(generator());
        let friday = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let reports = orchestrator.run_agent_weekly_tasks("dev", friday).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].task, "Architecture Docs");

        let err = orchestrator
            .run_agent_weekly_tasks("ralph", friday)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NoWeeklyTasks(_)));
    }
}
