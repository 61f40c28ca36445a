//! A loop controller bound to a role and a workspace.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use thiserror::Error;

use super::profiles::{PlanningScan, RoleProfile, Skill};
use super::skills::{self, SkillError, LEAD_FILE_PATTERNS};
use crate::agent::{LoopController, LoopError, RunOutcome, TaskRequest, TaskType};
use crate::vcs::{Workspace, WorkspaceError, WorkspaceManager};

/// Files listed in the repository overview used for planning.
pub const REPO_OVERVIEW_FILES: usize = 20;

/// Errors from running a task in a fresh workspace.
#[derive(Error, Debug)]
pub enum RoleError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
    #[error(transparent)]
    Loop(#[from] LoopError),
}

/// One long-lived agent per role. Planning gets the role persona and any
/// workspace context; execution and verification are the shared loop.
pub struct RoleAgent {
    profile: &'static RoleProfile,
    controller: LoopController,
    workspaces: WorkspaceManager,
    workspace: RwLock<Option<PathBuf>>,
    base_ref: String,
    busy: AtomicBool,
}

/// Held for the whole of one run; releases the agent when dropped.
struct RunClaim<'a>(&'a AtomicBool);

impl Drop for RunClaim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RoleAgent {
    pub fn new(
        profile: &'static RoleProfile,
        controller: LoopController,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            profile,
            controller,
            workspaces,
            workspace: RwLock::new(None),
            base_ref: "HEAD".to_string(),
            busy: AtomicBool::new(false),
        }
    }

    /// Ref new workspaces are branched from.
    pub fn with_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = base_ref.into();
        self
    }

    pub fn id(&self) -> &'static str {
        self.profile.id
    }

    pub fn profile(&self) -> &'static RoleProfile {
        self.profile
    }

    pub fn controller(&self) -> &LoopController {
        &self.controller
    }

    /// Bind this agent to `path`. Skills resolve relative paths against it.
    pub fn set_workspace(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::info!(agent = self.id(), path = %path.display(), "workspace bound");
        *self
            .workspace
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(path);
    }

    pub fn clear_workspace(&self) {
        *self
            .workspace
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn workspace(&self) -> Option<PathBuf> {
        self.workspace
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn bound_workspace(&self) -> Result<PathBuf, SkillError> {
        self.workspace().ok_or(SkillError::NoWorkspace)
    }

    fn require(&self, skill: Skill) -> Result<(), SkillError> {
        if self.profile.has_skill(skill) {
            Ok(())
        } else {
            Err(SkillError::NotAvailable {
                role: self.id().to_string(),
                skill: skill.to_string(),
            })
        }
    }

    /// Content of a workspace file through one of the role's document skills.
    pub async fn read_document(&self, skill: Skill, relative: &str) -> Result<String, SkillError> {
        if !skill.reads_document() {
            return Err(SkillError::NotAvailable {
                role: self.id().to_string(),
                skill: skill.to_string(),
            });
        }
        self.require(skill)?;
        let workspace = self.bound_workspace()?;
        tracing::info!(agent = self.id(), skill = %skill, path = relative, "reading document");
        skills::read_document(&workspace, relative).await
    }

    /// Resume content framed with the screening criteria.
    pub async fn screen_candidate(&self, relative: &str, criteria: &str) -> Result<String, SkillError> {
        let content = self.read_document(Skill::ScreenCandidate, relative).await?;
        Ok(skills::screening_material(relative, &content, criteria))
    }

    /// Every tracked file in the workspace.
    pub async fn analyze_repo(&self) -> Result<Vec<String>, SkillError> {
        self.require(Skill::AnalyzeRepo)?;
        let workspace = self.bound_workspace()?;
        skills::tracked_files(&self.workspaces, &workspace, &[]).await
    }

    /// Tracked spreadsheets and CSVs that may hold lead lists.
    pub async fn analyze_leads(&self) -> Result<Vec<String>, SkillError> {
        self.require(Skill::AnalyzeLeads)?;
        let workspace = self.bound_workspace()?;
        skills::tracked_files(&self.workspaces, &workspace, LEAD_FILE_PATTERNS).await
    }

    /// Run a skill by name and return its result as text ready to fold into
    /// an objective.
    pub async fn use_skill(
        &self,
        skill: Skill,
        path: Option<&str>,
        criteria: Option<&str>,
    ) -> Result<String, SkillError> {
        match skill {
            Skill::AnalyzeRepo => Ok(self.analyze_repo().await?.join("\n")),
            Skill::AnalyzeLeads => Ok(self.analyze_leads().await?.join("\n")),
            Skill::ScreenCandidate => {
                let path = path.ok_or_else(|| SkillError::MissingPath(skill.to_string()))?;
                self.screen_candidate(path, criteria.unwrap_or_default()).await
            }
            _ => {
                let path = path.ok_or_else(|| SkillError::MissingPath(skill.to_string()))?;
                let content = self.read_document(skill, path).await?;
                Ok(format!("{}:\n{}", skills::document_heading(skill, path), content))
            }
        }
    }

    /// Objective handed to the planner: persona, description, then any
    /// workspace context the role scans for. Scan failures are logged and
    /// skipped.
    pub async fn planning_objective(&self, description: &str) -> String {
        let mut objective = match self.profile.persona {
            Some(persona) => format!("ROLE: {}\n{}", persona, description),
            None => description.to_string(),
        };
        if self.workspace().is_none() {
            return objective;
        }

        match self.profile.scan {
            PlanningScan::None => {}
            PlanningScan::RepoOverview => match self.analyze_repo().await {
                Ok(files) => {
                    let shown = files.iter().take(REPO_OVERVIEW_FILES).cloned().collect::<Vec<_>>();
                    objective.push_str(&format!(
                        "\nREPO CONTEXT:\nThe repository contains {} files. Top level structure:\n{}\n(Truncated list)",
                        files.len(),
                        shown.join("\n")
                    ));
                }
                Err(e) => tracing::warn!(agent = self.id(), error = %e, "repository scan failed"),
            },
            PlanningScan::LeadFiles => match self.analyze_leads().await {
                Ok(files) if !files.is_empty() => {
                    objective.push_str(&format!(
                        "\nAVAILABLE DATA SOURCES:\nThe following lead lists are available:\n{}",
                        files.join("\n")
                    ));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(agent = self.id(), error = %e, "lead scan failed"),
            },
        }
        objective
    }

    fn already_running(&self) -> LoopError {
        LoopError::AlreadyRunning {
            agent: self.id().to_string(),
            task_id: self
                .controller
                .status()
                .task
                .map(|t| t.id)
                .unwrap_or_default(),
        }
    }

    /// Reserve the agent before anything touches its workspace binding.
    fn claim(&self) -> Result<RunClaim<'_>, LoopError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(self.already_running());
        }
        let claim = RunClaim(&self.busy);
        if self.controller.is_running() {
            return Err(self.already_running());
        }
        Ok(claim)
    }

    async fn run_claimed(&self, request: TaskRequest) -> Result<RunOutcome, LoopError> {
        let objective = self.planning_objective(&request.description).await;
        self.controller.start_with_objective(request, objective).await
    }

    pub async fn start(&self, request: TaskRequest) -> Result<RunOutcome, LoopError> {
        let _claim = self.claim()?;
        self.run_claimed(request).await
    }

    /// Run `description` with the role's default budget.
    pub async fn run_task(
        &self,
        description: &str,
        task_type: TaskType,
    ) -> Result<RunOutcome, LoopError> {
        self.start(
            TaskRequest::new(description, task_type)
                .with_max_iterations(self.controller.config().max_iterations),
        )
        .await
    }

    /// Create a workspace for a fresh task id, bind it, and run the task
    /// there. The workspace is left in place for the caller to commit or
    /// remove.
    ///
    /// A busy agent is rejected before a workspace is created, so the
    /// running task keeps its binding.
    pub async fn run_in_workspace(
        &self,
        description: &str,
        task_type: TaskType,
    ) -> Result<(Workspace, RunOutcome), RoleError> {
        let _claim = self.claim()?;
        let task_id = format!("{}_{}", self.id(), uuid::Uuid::new_v4().simple());
        let workspace = self.workspaces.create(&task_id, &self.base_ref).await?;
        self.set_workspace(&workspace.path);

        let request = TaskRequest::new(description, task_type)
            .with_id(task_id)
            .with_max_iterations(self.controller.config().max_iterations);
        let outcome = self.run_claimed(request).await?;
        Ok((workspace, outcome))
    }

    /// Commit everything in the bound workspace.
    pub async fn commit_workspace(&self, message: &str) -> Result<bool, SkillError> {
        let workspace = self.bound_workspace()?;
        Ok(self.workspaces.commit(&workspace, message).await?)
    }
}
