//! Prompt templates shared by the agent components.

mod prompts;

pub use prompts::{
    execute_prompt, executor_system_instruction, plan_prompt, verify_prompt,
    ExecutePromptParts, COMPLETION_MARKER, NO_PREVIOUS_RESULTS, PLANNER_SYSTEM_INSTRUCTION,
    VERIFIER_SYSTEM_INSTRUCTION,
};
