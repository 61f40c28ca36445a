//! Cross-iteration progress memory.
//!
//! The only agent state that survives a process restart. Records are keyed by
//! task id and never deleted except through an explicit bulk clear.

mod backend;
mod record;
mod store;

pub use backend::{InMemoryBackend, JsonDirBackend, ProgressBackend, ProgressError};
pub use record::{
    ErrorEntry, IterationEntry, LearningEntry, NewIteration, ProgressRecord,
    DIGEST_RECENT_ERRORS,
};
pub use store::ProgressStore;
