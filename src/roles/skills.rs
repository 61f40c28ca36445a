//! Read-only workspace inspection used by role skills.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use super::profiles::Skill;
use crate::vcs::{WorkspaceError, WorkspaceManager};

/// Lead-list patterns passed to `git ls-files`.
pub const LEAD_FILE_PATTERNS: &[&str] = &["*.csv", "*.xlsx"];

/// Skill errors.
#[derive(Error, Debug)]
pub enum SkillError {
    #[error("No active workspace")]
    NoWorkspace,
    #[error("Role {role} has no skill {skill}")]
    NotAvailable { role: String, skill: String },
    #[error("Skill {0} needs a file path")]
    MissingPath(String),
    #[error("Path {0} is outside the workspace")]
    OutsideWorkspace(String),
    #[error("Failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// Join `relative` onto `workspace`, rejecting anything that could leave it.
pub fn resolve(workspace: &Path, relative: &str) -> Result<PathBuf, SkillError> {
    let candidate = Path::new(relative);
    let escapes = relative.trim().is_empty()
        || candidate
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(SkillError::OutsideWorkspace(relative.to_string()));
    }
    Ok(workspace.join(candidate))
}

/// Content of `relative` inside `workspace`.
pub async fn read_document(workspace: &Path, relative: &str) -> Result<String, SkillError> {
    let path = resolve(workspace, relative)?;
    tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| SkillError::Read {
            path: relative.to_string(),
            message: e.to_string(),
        })
}

/// Tracked files in `workspace`, optionally filtered by pathspecs.
pub async fn tracked_files(
    workspaces: &WorkspaceManager,
    workspace: &Path,
    pathspecs: &[&str],
) -> Result<Vec<String>, SkillError> {
    let mut args = vec!["ls-files"];
    args.extend_from_slice(pathspecs);
    let output = workspaces.run_command(&args, Some(workspace)).await?;
    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Frame a resume for screening.
pub fn screening_material(path: &str, content: &str, criteria: &str) -> String {
    let criteria = if criteria.trim().is_empty() {
        "General Fit"
    } else {
        criteria.trim()
    };
    format!(
        "RESUME CONTENT ({}):\n{}\n\nSCREENING CRITERIA: {}",
        path, content, criteria
    )
}

/// Heading used when a document skill's content is folded into an objective.
pub fn document_heading(skill: Skill, path: &str) -> String {
    let label = match skill {
        Skill::AnalyzeBudget => "BUDGET",
        Skill::ReviewContract => "CONTRACT",
        Skill::ReviewRoadmap => "ROADMAP",
        Skill::AnalyzeUsage => "USAGE DATA",
        Skill::AnalyzeChartData => "MARKET DATA",
        Skill::ReviewClinicalNote => "CLINICAL NOTE",
        Skill::ScreenCandidate => "RESUME",
        Skill::ReadFile | Skill::AnalyzeRepo | Skill::AnalyzeLeads => "FILE",
    };
    format!("{} ({})", label, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_rejects_escapes() {
        let root = Path::new("/repo/.agent-worktrees/legal_1");
        assert_eq!(
            resolve(root, "contracts/nda.md").unwrap(),
            root.join("contracts/nda.md")
        );
        assert!(resolve(root, "./notes.txt").is_ok());
        assert!(matches!(
            resolve(root, "../other/secrets.txt"),
            Err(SkillError::OutsideWorkspace(_))
        ));
        assert!(resolve(root, "docs/../../x").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
        assert!(resolve(root, "  ").is_err());
    }

    #[tokio::test]
    async fn test_read_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("budget")).unwrap();
        std::fs::write(dir.path().join("budget/q3.csv"), "item,amount\nrent,100\n").unwrap();

        let content = read_document(dir.path(), "budget/q3.csv").await.unwrap();
        assert!(content.contains("rent,100"));

        let missing = read_document(dir.path(), "budget/q4.csv").await.unwrap_err();
        assert!(matches!(missing, SkillError::Read { .. }));
    }

    #[test]
    fn test_screening_material_defaults_criteria() {
        let text = screening_material("cv/jane.md", "Rust, 5 years", "");
        assert!(text.starts_with("RESUME CONTENT (cv/jane.md):\nRust, 5 years"));
        assert!(text.ends_with("SCREENING CRITERIA: General Fit"));
    }
}
