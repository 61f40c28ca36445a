//! Isolated checkouts, one per agent task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use super::runner::{CommandError, CommandRunner};

/// Directory under the repository root holding every managed workspace.
pub const DEFAULT_WORKTREE_DIR: &str = ".agent-worktrees";

/// Prefix of every workspace branch.
pub const BRANCH_PREFIX: &str = "agent/";

static PLAIN_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").unwrap());

/// Workspace errors.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("{0} is not a managed workspace")]
    NotManaged(String),
    #[error("IO error on {path}: {message}")]
    Io { path: String, message: String },
}

/// A created workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    pub path: PathBuf,
    pub branch: String,
    pub head: String,
}

/// One entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub head: Option<String>,
    /// Short branch name, without `refs/heads/`.
    pub branch: Option<String>,
    pub bare: bool,
    pub detached: bool,
}

/// Map a task id onto characters git accepts in a ref and a directory name.
///
/// Plain ids are kept. Anything else is hex-encoded behind a leading `_`,
/// which no kept id starts with, so distinct ids never share a slug.
pub fn slug(task_id: &str) -> String {
    if PLAIN_ID.is_match(task_id) {
        return task_id.to_string();
    }
    let hex: String = task_id.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("_{}", hex)
}

/// Branch for `task_id`.
pub fn branch_name(task_id: &str) -> String {
    format!("{}{}", BRANCH_PREFIX, slug(task_id))
}

/// Parse porcelain output into entries.
pub fn parse_porcelain(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(done) = current.take() {
                entries.push(done);
            }
            current = Some(WorktreeEntry {
                path: PathBuf::from(path.trim()),
                ..WorktreeEntry::default()
            });
            continue;
        }
        let Some(entry) = current.as_mut() else {
            continue;
        };
        if let Some(head) = line.strip_prefix("HEAD ") {
            entry.head = Some(head.trim().to_string());
        } else if let Some(branch) = line.strip_prefix("branch ") {
            let branch = branch.trim();
            entry.branch = Some(branch.strip_prefix("refs/heads/").unwrap_or(branch).to_string());
        } else if line == "bare" {
            entry.bare = true;
        } else if line == "detached" {
            entry.detached = true;
        }
    }
    if let Some(done) = current {
        entries.push(done);
    }
    entries
}

/// Sole owner of workspace paths under one repository.
#[derive(Clone)]
pub struct WorkspaceManager {
    runner: Arc<dyn CommandRunner>,
    repo_root: PathBuf,
    dir_name: String,
}

impl WorkspaceManager {
    pub fn new(runner: Arc<dyn CommandRunner>, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            repo_root: repo_root.into(),
            dir_name: DEFAULT_WORKTREE_DIR.to_string(),
        }
    }

    pub fn with_dir_name(mut self, dir_name: impl Into<String>) -> Self {
        self.dir_name = dir_name.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Directory holding every workspace.
    pub fn workspaces_dir(&self) -> PathBuf {
        self.repo_root.join(&self.dir_name)
    }

    /// Path the workspace for `task_id` lives at.
    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.workspaces_dir().join(slug(task_id))
    }

    /// Run a version-control command, in the repository root by default.
    pub async fn run_command(
        &self,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<String, WorkspaceError> {
        let cwd = cwd.unwrap_or(&self.repo_root);
        Ok(self.runner.run(args, Some(cwd)).await?)
    }

    /// Create the workspace for `task_id` from `base_ref`.
    ///
    /// Calling this again for the same task id returns the existing workspace.
    /// If the branch survived an earlier removal it is attached again instead
    /// of failing.
    pub async fn create(&self, task_id: &str, base_ref: &str) -> Result<Workspace, WorkspaceError> {
        let path = self.path_for(task_id);
        let branch = branch_name(task_id);

        if let Some(existing) = self.find_registered(&path).await? {
            tracing::info!(path = %path.display(), "workspace already exists");
            return Ok(Workspace {
                branch: existing.branch.unwrap_or(branch),
                head: existing.head.unwrap_or_default(),
                path,
            });
        }

        let dir = self.workspaces_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkspaceError::Io {
                path: dir.display().to_string(),
                message: e.to_string(),
            })?;

        let path_arg = path.to_string_lossy().to_string();
        tracing::info!(path = %path_arg, branch = %branch, base = base_ref, "creating workspace");
        let created = self
            .run_command(
                &["worktree", "add", "-b", &branch, &path_arg, base_ref],
                None,
            )
            .await;

        match created {
            Ok(_) => {}
            Err(WorkspaceError::Command(e)) if e.stderr().contains("already exists") => {
                tracing::warn!(branch = %branch, "branch exists; attaching it");
                self.run_command(&["worktree", "add", &path_arg, &branch], None)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        let head = self
            .run_command(&["rev-parse", "HEAD"], Some(&path))
            .await?
            .trim()
            .to_string();
        Ok(Workspace { path, branch, head })
    }

    /// Every worktree git knows about, the main checkout included.
    pub async fn list(&self) -> Result<Vec<WorktreeEntry>, WorkspaceError> {
        let output = self
            .run_command(&["worktree", "list", "--porcelain"], None)
            .await?;
        Ok(parse_porcelain(&output))
    }

    /// Only the worktrees under the managed directory.
    pub async fn list_managed(&self) -> Result<Vec<WorktreeEntry>, WorkspaceError> {
        let dir = canonical(&self.workspaces_dir()).await;
        let mut managed = Vec::new();
        for entry in self.list().await? {
            if canonical(&entry.path).await.starts_with(&dir) {
                managed.push(entry);
            }
        }
        Ok(managed)
    }

    /// Force-remove the workspace for `task_id`, discarding uncommitted work.
    pub async fn remove(&self, task_id: &str) -> Result<(), WorkspaceError> {
        let path = self.path_for(task_id);
        if self.find_registered(&path).await?.is_none() {
            return Err(WorkspaceError::NotManaged(path.display().to_string()));
        }
        tracing::info!(path = %path.display(), "removing workspace");
        let path_arg = path.to_string_lossy().to_string();
        self.run_command(&["worktree", "remove", "--force", &path_arg], None)
            .await?;
        Ok(())
    }

    /// Stage everything in `path` and commit it. Returns false when there
    /// was nothing to commit.
    pub async fn commit(&self, path: &Path, message: &str) -> Result<bool, WorkspaceError> {
        self.run_command(&["add", "-A"], Some(path)).await?;
        let staged = self
            .run_command(&["diff", "--cached", "--name-only"], Some(path))
            .await?;
        if staged.trim().is_empty() {
            tracing::debug!(path = %path.display(), "nothing to commit");
            return Ok(false);
        }
        self.run_command(&["commit", "-m", message], Some(path))
            .await?;
        Ok(true)
    }

    async fn find_registered(&self, path: &Path) -> Result<Option<WorktreeEntry>, WorkspaceError> {
        let wanted = canonical(path).await;
        for entry in self.list().await? {
            if canonical(&entry.path).await == wanted {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}

/// Resolve symlinks when the path exists, so git's absolute paths compare
/// equal to ours.
async fn canonical(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}
