//! Version-control plumbing: the command boundary and per-task worktrees.
//!
//! Every agent that writes files gets its own checkout of the shared
//! repository, so concurrently running loops never touch the same working
//! directory.

mod runner;
mod worktree;

pub use runner::{CommandError, CommandRunner, GitCommandRunner};
pub use worktree::{
    branch_name, parse_porcelain, slug, Workspace, WorkspaceError, WorkspaceManager,
    WorktreeEntry, BRANCH_PREFIX, DEFAULT_WORKTREE_DIR,
};
