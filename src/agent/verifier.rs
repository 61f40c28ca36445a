//! Deciding whether a step's output meets its criterion.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::executor::StepResult;
use super::plan::Step;
use crate::config::{verify_prompt, VERIFIER_SYSTEM_INSTRUCTION};
use crate::model::{extract_json_object, Generator};

/// Feedback recorded when the executor reported completion itself.
pub const SELF_VERIFIED: &str = "self-verified";
/// Feedback recorded when the judge's answer could not be used.
pub const INCONCLUSIVE: &str = "inconclusive";

/// Verdict on one step attempt. Failed feedback is shown to the next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    #[serde(default)]
    pub feedback: String,
}

impl Verification {
    pub fn passed(feedback: impl Into<String>) -> Self {
        Self {
            passed: true,
            feedback: feedback.into(),
        }
    }

    pub fn failed(feedback: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: feedback.into(),
        }
    }
}

/// Judges step output against the step's verification criterion.
#[derive(Clone)]
pub struct Verifier {
    generator: Arc<dyn Generator>,
}

impl Verifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    /// Self-reported completion passes without a model call. Otherwise a
    /// judge call decides; an unusable answer counts as a failure.
    pub async fn verify(&self, result: &StepResult, step: &Step) -> Verification {
        if result.self_reported_complete {
            tracing::debug!(step_id = %step.id, "step self-verified");
            return Verification::passed(SELF_VERIFIED);
        }

        let prompt = verify_prompt(&step.description, &step.verification_criterion, &result.output);
        match self
            .generator
            .generate(&prompt, VERIFIER_SYSTEM_INSTRUCTION)
            .await
        {
            Ok(response) => parse_judgment(&response).unwrap_or_else(|| {
                tracing::warn!(step_id = %step.id, "verification answer was not valid JSON");
                Verification::failed(INCONCLUSIVE)
            }),
            Err(e) => {
                tracing::warn!(step_id = %step.id, error = %e, "verification call failed");
                Verification::failed(INCONCLUSIVE)
            }
        }
    }
}

fn parse_judgment(response: &str) -> Option<Verification> {
    let json = extract_json_object(response)?;
    serde_json::from_str(json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    fn step() -> Step {
        Step::new("step_1", "Write summary", "Under 100 words")
    }

    fn output(text: &str, complete: bool) -> StepResult {
        StepResult {
            step_id: "step_1".to_string(),
            output: text.to_string(),
            self_reported_complete: complete,
        }
    }

    #[tokio::test]
    async fn test_self_reported_skips_model() {
        let generator = Arc::new(ScriptedGenerator::sequence(Vec::<&str>::new()));
        let verifier = Verifier::new(generator.clone());
        let verdict = verifier.verify(&output("done", true), &step()).await;
        assert_eq!(verdict, Verification::passed(SELF_VERIFIED));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn test_judge_answer_is_used() {
        let generator = Arc::new(ScriptedGenerator::sequence(vec![
            r#"Sure. {"passed": false, "feedback": "too long"} Hope that helps."#,
        ]));
        let verifier = Verifier::new(generator.clone());
        let verdict = verifier.verify(&output("words", false), &step()).await;
        assert_eq!(verdict, Verification::failed("too long"));
        assert_eq!(generator.calls()[0].system, VERIFIER_SYSTEM_INSTRUCTION);
    }

    #[tokio::test]
    async fn test_unparsable_answer_is_inconclusive() {
        let generator = Arc::new(ScriptedGenerator::sequence(vec!["yes, looks good"]));
        let verifier = Verifier::new(generator);
        let verdict = verifier.verify(&output("words", false), &step()).await;
        assert_eq!(verdict, Verification::failed(INCONCLUSIVE));
    }

    #[tokio::test]
    async fn test_failed_call_is_inconclusive() {
        let generator = Arc::new(ScriptedGenerator::sequence(Vec::<&str>::new()));
        let verifier = Verifier::new(generator);
        let verdict = verifier.verify(&output("words", false), &step()).await;
        assert!(!verdict.passed);
        assert_eq!(verdict.feedback, INCONCLUSIVE);
    }
}
