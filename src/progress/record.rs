//! Durable per-task progress record.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::agent::TaskStatus;

/// Number of recent errors rendered into the memory digest.
pub const DIGEST_RECENT_ERRORS: usize = 5;

/// One executed attempt at a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationEntry {
    pub action: String,
    pub result: String,
    pub self_reported_complete: bool,
    /// Collaborator failure text, when the attempt did not produce output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
    /// 1-based position within the record.
    pub index: usize,
}

/// Input for [`ProgressRecord::push_iteration`].
#[derive(Debug, Clone, Default)]
pub struct NewIteration {
    pub action: String,
    pub result: String,
    pub self_reported_complete: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub error: String,
    #[serde(default)]
    pub context: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub learning: String,
    pub timestamp: String,
}

/// Everything remembered about one task. Append-only apart from `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub task_id: String,
    #[serde(default)]
    pub iterations: Vec<IterationEntry>,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub learnings: Vec<LearningEntry>,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl ProgressRecord {
    /// Empty record in `pending` state.
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            task_id: task_id.into(),
            iterations: Vec::new(),
            errors: Vec::new(),
            learnings: Vec::new(),
            status: TaskStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn push_iteration(&mut self, iteration: NewIteration) {
        let index = self.iterations.len() + 1;
        self.iterations.push(IterationEntry {
            action: iteration.action,
            result: iteration.result,
            self_reported_complete: iteration.self_reported_complete,
            error: iteration.error,
            timestamp: Utc::now().to_rfc3339(),
            index,
        });
    }

    pub fn push_error(&mut self, error: impl Into<String>, context: impl Into<String>) {
        self.errors.push(ErrorEntry {
            error: error.into(),
            context: context.into(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    pub fn push_learning(&mut self, learning: impl Into<String>) {
        self.learnings.push(LearningEntry {
            learning: learning.into(),
            timestamp: Utc::now().to_rfc3339(),
        });
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        if status == TaskStatus::Complete {
            self.completed_at = Some(Utc::now().to_rfc3339());
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    /// Render the working-memory summary injected into executor prompts.
    ///
    /// Contains status, iteration count, the most recent errors (oldest
    /// dropped first), every learning, and the latest iteration.
    pub fn digest(&self) -> String {
        let mut memory = format!("# Progress Memory for Task: {}\n\n", self.task_id);
        memory.push_str(&format!("Status: {}\n", self.status));
        memory.push_str(&format!("Iterations: {}\n\n", self.iterations.len()));

        if !self.errors.is_empty() {
            memory.push_str("## Previous Errors (Learn from these):\n");
            let skip = self.errors.len().saturating_sub(DIGEST_RECENT_ERRORS);
            for (i, entry) in self.errors.iter().skip(skip).enumerate() {
                memory.push_str(&format!("{}. {}\n", i + 1, entry.error));
                if !entry.context.is_empty() {
                    memory.push_str(&format!("   Context: {}\n", entry.context));
                }
            }
            memory.push('\n');
        }

        if !self.learnings.is_empty() {
            memory.push_str("## Learnings:\n");
            for (i, entry) in self.learnings.iter().enumerate() {
                memory.push_str(&format!("{}. {}\n", i + 1, entry.learning));
            }
            memory.push('\n');
        }

        if let Some(last) = self.iterations.last() {
            memory.push_str(&format!("## Last Iteration ({}):\n", last.index));
            memory.push_str(&format!("Action: {}\n", non_empty_or_na(&last.action)));
            memory.push_str(&format!("Result: {}\n", non_empty_or_na(&last.result)));
            if let Some(error) = &last.error {
                memory.push_str(&format!("Error: {}\n", error));
            }
        }

        memory
    }
}

fn non_empty_or_na(value: &str) -> &str {
    if value.is_empty() {
        "N/A"
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_pending_and_empty() {
        let record = ProgressRecord::new("task_1");
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.iterations.is_empty());
        assert!(record.completed_at.is_none());
    }

    #[test]
    fn test_iteration_indexes_are_one_based() {
        let mut record = ProgressRecord::new("task_1");
        record.push_iteration(NewIteration {
            action: "a".to_string(),
            ..NewIteration::default()
        });
        record.push_iteration(NewIteration {
            action: "b".to_string(),
            ..NewIteration::default()
        });
        assert_eq!(record.iterations[0].index, 1);
        assert_eq!(record.iterations[1].index, 2);
    }

    #[test]
    fn test_digest_keeps_five_most_recent_errors() {
        let mut record = ProgressRecord::new("task_1");
        for i in 1..=7 {
            record.push_error(format!("error {}", i), "");
        }
        let digest = record.digest();
        assert!(!digest.contains("error 1\n"));
        assert!(!digest.contains("error 2\n"));
        assert!(digest.contains("1. error 3"));
        assert!(digest.contains("5. error 7"));
    }

    #[test]
    fn test_digest_sections() {
        let mut record = ProgressRecord::new("task_9");
        record.set_status(TaskStatus::Running);
        record.push_error("criterion not met", "Draft outline");
        record.push_learning("Step \"Draft outline\" failed: criterion not met");
        record.push_iteration(NewIteration {
            action: "Draft outline".to_string(),
            result: String::new(),
            self_reported_complete: false,
            error: Some("generation timed out".to_string()),
        });

        let digest = record.digest();
        assert!(digest.starts_with("# Progress Memory for Task: task_9"));
        assert!(digest.contains("Status: running"));
        assert!(digest.contains("Iterations: 1"));
        assert!(digest.contains("   Context: Draft outline"));
        assert!(digest.contains("## Learnings:\n1. Step"));
        assert!(digest.contains("## Last Iteration (1):"));
        assert!(digest.contains("Result: N/A"));
        assert!(digest.contains("Error: generation timed out"));
    }

    #[test]
    fn test_complete_sets_completed_at() {
        let mut record = ProgressRecord::new("task_1");
        record.set_status(TaskStatus::Complete);
        assert!(record.completed_at.is_some());
    }
}
