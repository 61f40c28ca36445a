// Copyright 2025 agent-loop contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Agent Loop
//!
//! An autonomous plan/execute/verify engine shared by a team of
//! role-specialised agents.
//!
//! A run plans an objective into steps with dependency edges, then executes
//! and verifies one ready step per iteration until every step passes, the
//! iteration budget runs out, or the run is aborted. Failures and learnings
//! go to a per-task progress record whose digest is fed back into the next
//! attempt. Agents that touch files each get a private git worktree of the
//! shared repository.
//!
//! ## Single Task Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_loop::{LoopController, ModelClient, ModelConfig, ProgressStore, TaskType};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let generator = Arc::new(ModelClient::new(ModelConfig::default()));
//!     let controller = LoopController::new("ralph", generator, ProgressStore::in_memory());
//!
//!     let outcome = controller
//!         .run_task("Draft a one-paragraph memo on the Q3 roadmap", TaskType::Document)
//!         .await?;
//!     println!("success: {} after {} iterations", outcome.success, outcome.iterations);
//!     Ok(())
//! }
//! ```
//!
//! ## Team Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agent_loop::{
//!     AgentRegistry, GitCommandRunner, ModelClient, ModelConfig, Orchestrator,
//!     ProgressStore, Schedule, SharedServices, WorkspaceManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runner = Arc::new(GitCommandRunner::new("."));
//!     let services = SharedServices::new(
//!         Arc::new(ModelClient::new(ModelConfig::default())),
//!         ProgressStore::in_dir(".agent-progress"),
//!         WorkspaceManager::new(runner, "."),
//!     );
//!     let registry = Arc::new(AgentRegistry::new(&services));
//!     let orchestrator = Orchestrator::new(registry, Schedule::default());
//!
//!     orchestrator.queue_daily_tasks(chrono::Local::now().date_naive());
//!     for report in orchestrator.run_queue().await? {
//!         println!("{} / {}: {}", report.agent_id, report.task, report.success);
//!     }
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod config;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod roles;
pub mod settings;
pub mod vcs;

#[cfg(test)]
mod test_support;

pub use agent::{
    LoopConfig, LoopController, LoopError, LoopEvent, RunOutcome, StatusSnapshot, Step,
    StepResult, TaskRequest, TaskStatus, TaskType,
};
pub use model::{Generator, ModelClient, ModelConfig, ModelError, ModelProvider};
pub use orchestrator::{DailyAgenda, Orchestrator, Schedule, TaskReport};
pub use progress::{ProgressRecord, ProgressStore};
pub use roles::{AgentRegistry, RoleAgent, SharedServices};
pub use settings::AppSettings;
pub use vcs::{GitCommandRunner, Workspace, WorkspaceManager};
