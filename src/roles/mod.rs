//! Role specialization: personas, read-only skills and workspace binding
//! layered on the shared task loop.

mod agent;
mod profiles;
mod registry;
mod skills;

pub use agent::{RoleAgent, RoleError, REPO_OVERVIEW_FILES};
pub use profiles::{
    profile, profile_or_default, PlanningScan, RoleProfile, Skill, DEFAULT_ROLE, ROLES,
};
pub use registry::{AgentRegistry, SharedServices};
pub use skills::{
    document_heading, read_document, resolve, screening_material, tracked_files, SkillError,
    LEAD_FILE_PATTERNS,
};
