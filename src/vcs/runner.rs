//! External version-control command execution.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Command execution errors.
#[derive(Error, Debug, Clone)]
pub enum CommandError {
    #[error("Failed to spawn `{command}`: {message}")]
    Spawn { command: String, message: String },
    #[error("`{command}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

impl CommandError {
    /// Error text the command printed, if it ran at all.
    pub fn stderr(&self) -> &str {
        match self {
            CommandError::Spawn { .. } => "",
            CommandError::Failed { stderr, .. } => stderr,
        }
    }
}

/// Runs version-control commands and returns their stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run with `args`. `cwd` defaults to the runner's repository root.
    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, CommandError>;
}

/// [`CommandRunner`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCommandRunner {
    program: String,
    repo_root: PathBuf,
}

impl GitCommandRunner {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            program: "git".to_string(),
            repo_root: repo_root.into(),
        }
    }

    /// Use a specific git binary instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }
}

#[async_trait]
impl CommandRunner for GitCommandRunner {
    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, CommandError> {
        let workdir = cwd.unwrap_or(&self.repo_root);
        tracing::debug!(command = %self.describe(args), cwd = %workdir.display(), "running git");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(workdir)
            .output()
            .await
            .map_err(|e| CommandError::Spawn {
                command: self.describe(args),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(command = %self.describe(args), %stderr, "git command failed");
            return Err(CommandError::Failed {
                command: self.describe(args),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_error_mentions_command_and_exit() {
        let err = CommandError::Failed {
            command: "git worktree add".to_string(),
            code: Some(128),
            stderr: "fatal: invalid reference: main".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("git worktree add"));
        assert!(text.contains("status 128"));
        assert_eq!(err.stderr(), "fatal: invalid reference: main");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let runner = GitCommandRunner::new(std::env::temp_dir())
            .with_program("definitely-not-a-real-git-binary");
        let err = runner.run(&["status"], None).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}
