//! Recurring work: which roles run on which weekday, with what prompt.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Failed to read schedule {path}: {message}")]
    Io { path: String, message: String },
    #[error("Failed to parse schedule {path}: {message}")]
    Parse { path: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Day {
    pub fn as_str(&self) -> &'static str {
        match self {
            Day::Monday => "monday",
            Day::Tuesday => "tuesday",
            Day::Wednesday => "wednesday",
            Day::Thursday => "thursday",
            Day::Friday => "friday",
            Day::Saturday => "saturday",
            Day::Sunday => "sunday",
        }
    }
}

impl From<Weekday> for Day {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Day::Monday,
            Weekday::Tue => Day::Tuesday,
            Weekday::Wed => Day::Wednesday,
            Weekday::Thu => Day::Thursday,
            Weekday::Fri => Day::Friday,
            Weekday::Sat => Day::Saturday,
            Weekday::Sun => Day::Sunday,
        }
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Theme of one weekday.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub focus: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// A prompt one role runs every week on a fixed day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub day: Day,
    pub task_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarterWindow {
    pub name: String,
    /// `MM-DD`
    pub start: String,
    pub end: String,
    pub review: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default = "default_execution_time")]
    pub execution_time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub weekly: BTreeMap<Day, DayPlan>,
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
    /// Day of month to milestone label.
    #[serde(default)]
    pub milestones: BTreeMap<u32, String>,
    #[serde(default)]
    pub quarters: Vec<QuarterWindow>,
}

fn default_execution_time() -> String {
    "09:00".to_string()
}

fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}

impl Schedule {
    /// Load a schedule from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScheduleError> {
        let content = fs::read_to_string(path).map_err(|e| ScheduleError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| ScheduleError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    pub fn day_plan(&self, day: Day) -> Option<&DayPlan> {
        self.weekly.get(&day)
    }

    /// Every role's tasks for `day`, in table order.
    pub fn tasks_for(&self, day: Day) -> Vec<ScheduledTask> {
        self.tasks.iter().filter(|t| t.day == day).cloned().collect()
    }

    /// One role's tasks for `day`.
    pub fn agent_tasks_for(&self, agent_id: &str, day: Day) -> Vec<ScheduledTask> {
        self.tasks
            .iter()
            .filter(|t| t.agent_id == agent_id && t.day == day)
            .cloned()
            .collect()
    }

    pub fn has_weekly_tasks(&self, agent_id: &str) -> bool {
        self.tasks.iter().any(|t| t.agent_id == agent_id)
    }

    pub fn milestone(&self, date: NaiveDate) -> Option<&str> {
        self.milestones.get(&date.day()).map(String::as_str)
    }

    pub fn quarter(&self, date: NaiveDate) -> Option<&QuarterWindow> {
        let name = quarter_name(date);
        self.quarters.iter().find(|q| q.name == name)
    }
}

/// `Q1`..`Q4` for the calendar month of `date`.
pub fn quarter_name(date: NaiveDate) -> String {
    format!("Q{}", (date.month() - 1) / 3 + 1)
}

fn day_plan(focus: &str, agents: &[&str], description: &str) -> DayPlan {
    DayPlan {
        focus: focus.to_string(),
        agents: agents.iter().map(|a| a.to_string()).collect(),
        description: description.to_string(),
    }
}

fn task(id: &str, name: &str, day: Day, prompt: &str) -> ScheduledTask {
    ScheduledTask {
        id: id.to_string(),
        agent_id: id.split('-').next().unwrap_or(id).to_string(),
        name: name.to_string(),
        description: String::new(),
        day,
        task_prompt: prompt.to_string(),
    }
}

fn quarter(name: &str, start: &str, end: &str, review: &str) -> QuarterWindow {
    QuarterWindow {
        name: name.to_string(),
        start: start.to_string(),
        end: end.to_string(),
        review: review.to_string(),
    }
}

impl Default for Schedule {
    fn default() -> Self {
        use Day::*;

        let weekly = BTreeMap::from([
            (
                Monday,
                day_plan(
                    "Planning & Research",
                    &[
                        "finance", "legal", "gtm", "product", "dev", "qa", "account",
                        "recruiting", "trader", "health",
                    ],
                    "Start of week: scan for opportunities, review pipelines, plan work",
                ),
            ),
            (
                Tuesday,
                day_plan("Execution", &[], "Focus on execution - no scheduled agent tasks"),
            ),
            (
                Wednesday,
                day_plan(
                    "Deep Work",
                    &["finance", "legal", "gtm", "dev", "qa", "recruiting"],
                    "Mid-week: drafting, analysis, and deep work",
                ),
            ),
            (
                Thursday,
                day_plan(
                    "Collaboration",
                    &["product", "account", "health"],
                    "Collaboration and research tasks",
                ),
            ),
            (
                Friday,
                day_plan(
                    "Review & Report",
                    &["finance", "legal", "gtm", "dev", "qa", "trader"],
                    "End of week: reviews, compliance checks, reports",
                ),
            ),
            (Saturday, day_plan("Off", &[], "Weekend - no scheduled tasks")),
            (Sunday, day_plan("Off", &[], "Weekend - no scheduled tasks")),
        ]);

        let tasks = vec![
            task("finance-w1", "Grant Opportunity Scan", Monday,
                "Search grants.gov for new SBIR/STTR opportunities in AI, autonomous systems, and defense tech. Generate a summary report."),
            task("finance-w2", "Proposal Drafting", Wednesday,
                "Continue drafting the next SBIR proposal. Focus on technical approach and commercialization sections."),
            task("finance-w3", "Budget Review", Friday,
                "Review current project budgets. Flag any variances over 10% from planned spending."),
            task("legal-w1", "Contract Queue", Monday,
                "Review all contracts in the pending queue. Identify key terms, risks, and required modifications."),
            task("legal-w2", "Prior Art Research", Wednesday,
                "Conduct prior art search for pending provisional patents. Identify potential conflicts and differentiation opportunities."),
            task("legal-w3", "Compliance Monitoring", Friday,
                "Scan for regulatory updates relevant to our business. Flag any new compliance requirements."),
            task("gtm-w1", "Content Calendar", Monday,
                "Review content calendar. Identify topics for this week. Draft outlines for planned content."),
            task("gtm-w2", "Campaign Metrics", Wednesday,
                "Pull marketing metrics from campaigns. Identify top performers and underperformers. Suggest optimizations."),
            task("gtm-w3", "Competitor Scan", Friday,
                "Scan competitor websites, press releases, and social media. Report on new features, pricing changes, or campaigns."),
            task("product-w1", "Feature Prioritization", Monday,
                "Review feature requests and prioritize based on impact and effort. Update roadmap priorities."),
            task("product-w2", "User Research", Thursday,
                "Analyze user feedback from support tickets and reviews. Identify top pain points and opportunities."),
            task("dev-w1", "Code Review", Monday,
                "Review all pending pull requests. Provide feedback on code quality, architecture, and testing."),
            task("dev-w2", "Bug Triage", Wednesday,
                "Triage new bug reports. Categorize by severity and assign priorities. Identify root causes for recurring issues."),
            task("dev-w3", "Architecture Docs", Friday,
                "Review and update architecture documentation. Ensure diagrams reflect current system state."),
            task("qa-w1", "Test Planning", Monday,
                "Create test plans for features in current sprint. Identify edge cases and regression risks."),
            task("qa-w2", "Test Execution", Wednesday,
                "Execute automated test suite. Document failures and investigate root causes."),
            task("qa-w3", "Release Readiness", Friday,
                "Generate release readiness report. Document test coverage, known issues, and go/no-go recommendation."),
            task("account-w1", "At-Risk Accounts", Monday,
                "Review customer engagement metrics. Identify accounts showing signs of churn risk."),
            task("account-w2", "Renewal Pipeline", Thursday,
                "Review renewal pipeline for next 90 days. Prepare outreach strategy for each account."),
            task("recruiting-w1", "Candidate Pipeline", Monday,
                "Review candidate pipeline for open roles. Identify sourcing gaps and outreach opportunities."),
            task("recruiting-w2", "Job Posting Updates", Wednesday,
                "Review and update job descriptions. Ensure postings reflect current requirements and culture."),
            task("trader-w1", "Market Analysis", Monday,
                "Analyze market conditions and macro trends. Identify opportunities and risks for current positions."),
            task("trader-w2", "Portfolio Review", Friday,
                "Generate weekly portfolio performance report. Compare against benchmarks and analyze attribution."),
            task("health-w1", "Prior Auth Queue", Monday,
                "Review pending prior authorization requests. Draft letters for high-priority cases."),
            task("health-w2", "Appeals Processing", Thursday,
                "Review denied prior authorizations. Draft appeal letters with supporting evidence."),
        ];

        let milestones = BTreeMap::from([
            (1, "Monthly planning & OKR check-in".to_string()),
            (15, "Mid-month review".to_string()),
            (28, "Month-end reports".to_string()),
        ]);

        let quarters = vec![
            quarter("Q1", "01-01", "03-31", "04-05"),
            quarter("Q2", "04-01", "06-30", "07-05"),
            quarter("Q3", "07-01", "09-30", "10-05"),
            quarter("Q4", "10-01", "12-31", "01-05"),
        ];

        Self {
            execution_time: default_execution_time(),
            timezone: default_timezone(),
            weekly,
            tasks,
            milestones,
            quarters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekday_conversion() {
        // 2024-01-01 was a Monday.
        assert_eq!(Day::from(date(2024, 1, 1).weekday()), Day::Monday);
        assert_eq!(Day::from(date(2024, 1, 7).weekday()), Day::Sunday);
    }

    #[test]
    fn test_default_tasks_match_their_day_plan() {
        let schedule = Schedule::default();
        for task in &schedule.tasks {
            let plan = schedule.day_plan(task.day).unwrap();
            assert!(
                plan.agents.contains(&task.agent_id),
                "{} runs on {} but is not listed for it",
                task.id,
                task.day
            );
        }
        assert!(schedule.tasks_for(Day::Tuesday).is_empty());
        assert_eq!(schedule.tasks_for(Day::Thursday).len(), 3);
    }

    #[test]
    fn test_agent_tasks_for_day() {
        let schedule = Schedule::default();
        let tasks = schedule.agent_tasks_for("legal", Day::Friday);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "Compliance Monitoring");
        assert!(schedule.has_weekly_tasks("health"));
        assert!(!schedule.has_weekly_tasks("ralph"));
    }

    #[test]
    fn test_milestones_and_quarters() {
        let schedule = Schedule::default();
        assert_eq!(schedule.milestone(date(2024, 3, 15)), Some("Mid-month review"));
        assert_eq!(schedule.milestone(date(2024, 3, 16)), None);
        assert_eq!(quarter_name(date(2024, 3, 31)), "Q1");
        assert_eq!(quarter_name(date(2024, 10, 1)), "Q4");
        assert_eq!(schedule.quarter(date(2024, 8, 1)).unwrap().review, "10-05");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schedule.json");
        fs::write(
            &path,
            r#"{
                "weekly": {"monday": {"focus": "Ship", "agents": ["dev"]}},
                "tasks": [{
                    "id": "dev-x", "agent_id": "dev", "name": "Release",
                    "day": "monday", "task_prompt": "Cut the release."
                }],
                "milestones": {"3": "Demo day"}
            }"#,
        )
        .unwrap();

        let schedule = Schedule::load(&path).unwrap();
        assert_eq!(schedule.execution_time, "09:00");
        assert_eq!(schedule.tasks_for(Day::Monday)[0].task_prompt, "Cut the release.");
        assert_eq!(schedule.milestone(date(2024, 5, 3)), Some("Demo day"));

        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(Schedule::load(&path), Err(ScheduleError::Parse { .. })));
        assert!(matches!(
            Schedule::load(&dir.path().join("missing.json")),
            Err(ScheduleError::Io { .. })
        ));
    }
}
