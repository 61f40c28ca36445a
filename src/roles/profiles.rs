//! Role table: persona, default task type, skills and planning scan per role.

use std::fmt;

use crate::agent::TaskType;

/// Id of the generalist role. Unknown role ids fall back to it.
pub const DEFAULT_ROLE: &str = "ralph";

/// Read-only operations a role can perform against its workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Skill {
    ReadFile,
    AnalyzeBudget,
    ReviewContract,
    ReviewRoadmap,
    AnalyzeUsage,
    AnalyzeChartData,
    ReviewClinicalNote,
    ScreenCandidate,
    AnalyzeRepo,
    AnalyzeLeads,
}

impl Skill {
    pub fn as_str(&self) -> &'static str {
        match self {
            Skill::ReadFile => "read_file",
            Skill::AnalyzeBudget => "analyze_budget",
            Skill::ReviewContract => "review_contract",
            Skill::ReviewRoadmap => "review_roadmap",
            Skill::AnalyzeUsage => "analyze_usage",
            Skill::AnalyzeChartData => "analyze_chart_data",
            Skill::ReviewClinicalNote => "review_clinical_note",
            Skill::ScreenCandidate => "screen_candidate",
            Skill::AnalyzeRepo => "analyze_repo",
            Skill::AnalyzeLeads => "analyze_leads",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        const ALL: [Skill; 10] = [
            Skill::ReadFile,
            Skill::AnalyzeBudget,
            Skill::ReviewContract,
            Skill::ReviewRoadmap,
            Skill::AnalyzeUsage,
            Skill::AnalyzeChartData,
            Skill::ReviewClinicalNote,
            Skill::ScreenCandidate,
            Skill::AnalyzeRepo,
            Skill::AnalyzeLeads,
        ];
        ALL.into_iter().find(|s| s.as_str() == name)
    }

    /// Skills that return the content of one workspace file.
    pub fn reads_document(&self) -> bool {
        !matches!(self, Skill::AnalyzeRepo | Skill::AnalyzeLeads)
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workspace context gathered before planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanningScan {
    None,
    /// File count and the first tracked files.
    RepoOverview,
    /// Spreadsheet and CSV files that look like lead lists.
    LeadFiles,
}

#[derive(Debug, Clone, Copy)]
pub struct RoleProfile {
    pub id: &'static str,
    pub name: &'static str,
    /// Prepended to planning objectives. `None` plans the objective as given.
    pub persona: Option<&'static str>,
    pub task_type: TaskType,
    pub skills: &'static [Skill],
    pub scan: PlanningScan,
}

impl RoleProfile {
    pub fn has_skill(&self, skill: Skill) -> bool {
        self.skills.contains(&skill)
    }
}

pub static ROLES: &[RoleProfile] = &[
    RoleProfile {
        id: "ralph",
        name: "Ralph",
        persona: None,
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "finance",
        name: "Finance",
        persona: Some(
            "You are the CFO and Lead Grant Writer. Your job is to maximize non-dilutive \
             funding (SBIR/STTR) and ensure 100% compliance with Defense/Gov standards.",
        ),
        task_type: TaskType::Grant,
        skills: &[Skill::ReadFile, Skill::AnalyzeBudget],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "legal",
        name: "Legal",
        persona: Some(
            "You are the General Counsel. Your job is to protect the company, identify \
             risks, and draft precise clauses.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::ReviewContract],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "gtm",
        name: "Go-To-Market",
        persona: Some(
            "You are the Head of Growth. Turn the available data into campaigns with \
             measurable outcomes.",
        ),
        task_type: TaskType::Gtm,
        skills: &[Skill::ReadFile, Skill::AnalyzeLeads],
        scan: PlanningScan::LeadFiles,
    },
    RoleProfile {
        id: "dev",
        name: "Engineering",
        persona: Some(
            "You are the Lead Engineer. Make small, reviewable changes that fit the \
             existing code and keep the build green.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::AnalyzeRepo],
        scan: PlanningScan::RepoOverview,
    },
    RoleProfile {
        id: "qa",
        name: "Quality",
        persona: Some(
            "You are the Lead QA Engineer. Your job is to break things. Find edge cases, \
             write comprehensive test plans, and verify fixes. Be pedantic about quality.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::AnalyzeRepo],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "product",
        name: "Product",
        persona: Some(
            "You are the Head of Product. Your job is to translate vague ideas into clear, \
             actionable PRDs and User Stories. Prioritize user value and feasibility.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::ReviewRoadmap],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "account",
        name: "Account Management",
        persona: Some(
            "You are a Senior Customer Success Manager. Your goal is to drive retention, \
             create value, and grow expansion revenue. When writing QBRs, be strategic and \
             data-driven.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::AnalyzeUsage],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "recruiting",
        name: "Recruiting",
        persona: Some(
            "You are the Head of Talent. Your job is to find the perfect candidate. Adapt \
             your screening criteria strictly to what the user asks for (e.g. \"First \
             Screen\", \"Technical Deep Dive\", \"Culture Fit\"). If the user provides \
             specific \"Must Haves\", reject any candidate who lacks them.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::ScreenCandidate],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "trader",
        name: "Trading",
        persona: Some(
            "You are a Quantitative Trader and Alpha Generator. Your goal is to find \
             profitable strategies while STRICTLY managing risk. Prefer data-driven \
             insights over speculation.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::AnalyzeChartData],
        scan: PlanningScan::None,
    },
    RoleProfile {
        id: "health",
        name: "Health Operations",
        persona: Some(
            "You are an expert Medical Administrator. Your goal is to draft accurate \
             clinical documentation (Prior Auth, Referrals) while maintaining strict HIPAA \
             compliance. Do not invent patient data.",
        ),
        task_type: TaskType::Custom,
        skills: &[Skill::ReadFile, Skill::ReviewClinicalNote],
        scan: PlanningScan::None,
    },
];

/// Profile for `id`, if it is a known role.
pub fn profile(id: &str) -> Option<&'static RoleProfile> {
    ROLES.iter().find(|p| p.id == id)
}

/// Profile for `id`, or the generalist.
pub fn profile_or_default(id: &str) -> &'static RoleProfile {
    profile(id).unwrap_or(&ROLES[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_role_ids_are_unique() {
        let ids: HashSet<&str> = ROLES.iter().map(|p| p.id).collect();
        assert_eq!(ids.len(), ROLES.len());
        assert_eq!(ROLES[0].id, DEFAULT_ROLE);
    }

    #[test]
    fn test_every_specialist_has_a_distinct_persona() {
        let personas: Vec<&str> = ROLES.iter().filter_map(|p| p.persona).collect();
        assert_eq!(personas.len(), ROLES.len() - 1);
        let unique: HashSet<&str> = personas.iter().copied().collect();
        assert_eq!(unique.len(), personas.len());
    }

    #[test]
    fn test_lookup_and_fallback() {
        assert_eq!(profile("legal").map(|p| p.id), Some("legal"));
        assert!(profile("janitor").is_none());
        assert_eq!(profile_or_default("janitor").id, DEFAULT_ROLE);
        assert_eq!(profile_or_default("finance").task_type, TaskType::Grant);
    }

    #[test]
    fn test_skill_names_round_trip() {
        assert_eq!(Skill::parse("review_contract"), Some(Skill::ReviewContract));
        assert_eq!(Skill::parse("nope"), None);
        assert!(!Skill::AnalyzeRepo.reads_document());
        assert!(Skill::AnalyzeBudget.reads_document());
    }
}
