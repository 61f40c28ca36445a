//! Prompt templates for planning, execution and verification.

use chrono::Local;

/// Token the executor appends when it believes a step's criterion is met.
pub const COMPLETION_MARKER: &str = "<promise>COMPLETE</promise>";

/// System instruction for the planning call.
pub const PLANNER_SYSTEM_INSTRUCTION: &str =
    "You are a task planning assistant. Respond only with valid JSON.";

/// System instruction for the verification call.
pub const VERIFIER_SYSTEM_INSTRUCTION: &str = "Respond only with JSON.";

/// Placeholder used when no step has completed yet.
pub const NO_PREVIOUS_RESULTS: &str = "No previous results yet.";

/// Build the planning prompt for an objective.
pub fn plan_prompt(objective: &str, task_type: &str) -> String {
    format!(
        r#"You are a task planning assistant. Break down this task into 3-7 specific, actionable steps.

TASK TYPE: {task_type}
TASK: {objective}

Respond with a JSON array of steps. Each step should have:
- "id": unique step identifier (step_1, step_2, etc.)
- "description": what to do
- "verification": how to verify it's done correctly
- "dependencies": array of step IDs this depends on (empty if none). Only reference steps declared earlier in the list.

Example response:
[
  {{"id": "step_1", "description": "Research target audience", "verification": "List of 3+ audience segments identified", "dependencies": []}},
  {{"id": "step_2", "description": "Create outline", "verification": "Outline has 5+ sections", "dependencies": ["step_1"]}}
]

Respond ONLY with the JSON array, no other text."#
    )
}

/// System instruction for the execution call of `agent`.
pub fn executor_system_instruction(agent: &str) -> String {
    format!(
        "You are {}, an autonomous agent. Be precise, thorough, and always verify your work \
         against the criteria. If complete, include {} at the end.",
        agent, COMPLETION_MARKER
    )
}

/// Inputs for [`execute_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct ExecutePromptParts<'a> {
    pub agent: &'a str,
    pub memory: &'a str,
    pub knowledge: Option<&'a str>,
    pub step_description: &'a str,
    pub verification_criterion: &'a str,
    pub previous_results: &'a str,
}

/// Build the execution prompt for one step.
pub fn execute_prompt(parts: ExecutePromptParts<'_>) -> String {
    let today = Local::now().format("%B %d, %Y");
    let knowledge = match parts.knowledge {
        Some(text) if !text.trim().is_empty() => {
            format!("REFERENCE MATERIAL:\n{}\n\n", text.trim())
        }
        _ => String::new(),
    };

    format!(
        r#"You are {agent}, an autonomous AI agent working on a task.
Today's date is: {today}

{memory}

{knowledge}CURRENT STEP: {step}
VERIFICATION CRITERIA: {criterion}

PREVIOUS CONTEXT:
{previous}

INSTRUCTIONS:
1. Execute this step thoroughly
2. Provide your complete output
3. If successful and verification criteria are met, end your response with: {marker}
4. If you encounter an error, explain what went wrong so we can learn from it

Execute the step now:"#,
        agent = parts.agent,
        today = today,
        memory = parts.memory.trim_end(),
        knowledge = knowledge,
        step = parts.step_description,
        criterion = parts.verification_criterion,
        previous = parts.previous_results,
        marker = COMPLETION_MARKER,
    )
}

/// Build the judge prompt asking whether `output` satisfies the criterion.
pub fn verify_prompt(step_description: &str, criterion: &str, output: &str) -> String {
    format!(
        r#"Verify if this output meets the criteria.

STEP: {step_description}
VERIFICATION CRITERIA: {criterion}

OUTPUT:
{output}

Does this output meet the verification criteria? Respond with:
{{"passed": true/false, "feedback": "explanation"}}"#
    )
}
