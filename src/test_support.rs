//! Test-only fakes for the external collaborators.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::agent::{AutomationError, AutomationRunner};
use crate::model::{Generator, ModelError};
use crate::vcs::{CommandError, CommandRunner};

/// One recorded generation call.
#[derive(Debug, Clone)]
pub struct Call {
    pub prompt: String,
    pub system: String,
}

type Responder = Box<dyn Fn(&str, &str) -> Result<String, ModelError> + Send + Sync>;

/// Generation service that answers from a script and records every prompt.
pub struct ScriptedGenerator {
    responder: Responder,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedGenerator {
    /// Answer with `f(prompt, system_instruction)`.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&str, &str) -> Result<String, ModelError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(f),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replay `responses` in order, then fail every further call.
    pub fn sequence<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(responses.into_iter().map(Into::into).collect());
        Self::from_fn(move |_, _| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ModelError::Unavailable("script exhausted".to_string()))
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, system_instruction: &str) -> Result<String, ModelError> {
        self.calls.lock().unwrap().push(Call {
            prompt: prompt.to_string(),
            system: system_instruction.to_string(),
        });
        (self.responder)(prompt, system_instruction)
    }
}

/// Replays responses but holds call number `gate` (1-based) until released.
pub struct GatedGenerator {
    responses: Mutex<VecDeque<String>>,
    gate: usize,
    count: AtomicUsize,
    entered: Notify,
    release: Notify,
}

impl GatedGenerator {
    pub fn new(responses: Vec<String>, gate: usize) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            gate,
            count: AtomicUsize::new(0),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Wait until the gated call is in flight.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the gated call return.
    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn call_count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for GatedGenerator {
    async fn generate(&self, _prompt: &str, _system: &str) -> Result<String, ModelError> {
        let n = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.gate {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ModelError::Unavailable("script exhausted".to_string()))
    }
}

/// Automation runner replaying queued results.
pub struct ScriptedAutomation {
    results: Mutex<VecDeque<Result<String, AutomationError>>>,
    payloads: Mutex<Vec<Value>>,
}

impl ScriptedAutomation {
    pub fn new(results: Vec<Result<String, AutomationError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AutomationRunner for ScriptedAutomation {
    async fn run(&self, _step_id: &str, payload: &Value) -> Result<String, AutomationError> {
        self.payloads.lock().unwrap().push(payload.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AutomationError::Unavailable("script exhausted".to_string())))
    }
}

/// One recorded command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

type CommandResponder = Box<dyn Fn(&[&str]) -> Result<String, CommandError> + Send + Sync>;

/// Command runner answering from a closure over the arguments.
pub struct ScriptedCommandRunner {
    responder: CommandResponder,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedCommandRunner {
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[&str]) -> Result<String, CommandError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(f),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Invocations whose first arguments equal `prefix`.
    pub fn matching(&self, prefix: &[&str]) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| {
                i.args.len() >= prefix.len() && i.args.iter().zip(prefix).all(|(a, p)| a == p)
            })
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, CommandError> {
        self.invocations.lock().unwrap().push(Invocation {
            args: args.iter().map(|a| a.to_string()).collect(),
            cwd: cwd.map(Path::to_path_buf),
        });
        (self.responder)(args)
    }
}

/// A failed git invocation with the given stderr.
pub fn git_failure(args: &[&str], stderr: &str) -> CommandError {
    CommandError::Failed {
        command: format!("git {}", args.join(" ")),
        code: Some(128),
        stderr: stderr.to_string(),
    }
}
