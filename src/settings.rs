//! Persistent settings for the agent-loop CLI.
//! Stored in the platform-specific config directory via `directories::ProjectDirs`.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::agent::{LoopConfig, MAX_ITERATIONS_DEFAULT};
use crate::model::{ModelConfig, ModelProvider, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_SECS};
use crate::vcs::DEFAULT_WORKTREE_DIR;

/// Application settings that can be saved and loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Generation provider ("openai" or "ollama")
    pub provider: String,
    /// Model API base URL
    pub base_url: String,
    /// Model API key
    pub api_key: String,
    /// Model name
    pub model_name: String,
    /// Maximum retries for model requests
    pub max_retries: u32,
    /// Retry delay in seconds
    pub retry_delay: u64,
    /// Repository the agents work in
    pub repo_root: String,
    /// Directory under the repository root that holds workspaces
    pub worktree_dir: String,
    /// Progress record directory; empty uses the data directory
    pub progress_dir: String,
    /// Iteration budget per task
    pub max_iterations: u32,
    /// Pause between iterations in milliseconds
    pub iteration_delay_ms: u64,
    /// Schedule JSON file; empty uses the built-in schedule
    pub schedule_path: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "http://localhost:8000/v1".to_string(),
            api_key: "EMPTY".to_string(),
            model_name: "gpt-4o-mini".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY_SECS,
            repo_root: ".".to_string(),
            worktree_dir: DEFAULT_WORKTREE_DIR.to_string(),
            progress_dir: String::new(),
            max_iterations: MAX_ITERATIONS_DEFAULT,
            iteration_delay_ms: 500,
            schedule_path: String::new(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "agent-loop", "agent-loop")
}

impl AppSettings {
    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the settings file path.
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("settings.json"))
    }

    /// Load settings from the config file, falling back to defaults.
    pub fn load() -> Self {
        Self::settings_path()
            .and_then(|path| fs::read_to_string(&path).ok())
            .map(|content| Self::from_json(&content))
            .unwrap_or_default()
    }

    /// Parse settings, backfilling fields older files left empty.
    pub fn from_json(content: &str) -> Self {
        let defaults = Self::default();
        let mut loaded: Self = serde_json::from_str(content).unwrap_or_default();

        if loaded.provider.is_empty() {
            loaded.provider = defaults.provider;
        }
        if loaded.base_url.is_empty() {
            loaded.base_url = defaults.base_url;
        }
        if loaded.repo_root.is_empty() {
            loaded.repo_root = defaults.repo_root;
        }
        if loaded.worktree_dir.is_empty() {
            loaded.worktree_dir = defaults.worktree_dir;
        }
        if loaded.max_iterations == 0 {
            loaded.max_iterations = defaults.max_iterations;
        }

        loaded
    }

    /// Save settings to the config file.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir().ok_or("Cannot determine config directory")?;

        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("settings.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;

        fs::write(&path, content).map_err(|e| format!("Failed to write settings file: {}", e))?;

        Ok(())
    }

    /// Apply environment overrides on top of the loaded values.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("AGENT_LOOP_PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = lookup("MODEL_BASE_URL") {
            self.base_url = v;
        }
        if let Some(v) = lookup("MODEL_API_KEY") {
            self.api_key = v;
        }
        if let Some(v) = lookup("MODEL_NAME") {
            self.model_name = v;
        }
        if let Some(v) = lookup("MODEL_MAX_RETRIES").and_then(|s| s.parse().ok()) {
            self.max_retries = v;
        }
        if let Some(v) = lookup("MODEL_RETRY_DELAY").and_then(|s| s.parse().ok()) {
            self.retry_delay = v;
        }
        if let Some(v) = lookup("AGENT_REPO_ROOT") {
            self.repo_root = v;
        }
        if let Some(v) = lookup("AGENT_MAX_ITERATIONS").and_then(|s| s.parse().ok()) {
            self.max_iterations = v;
        }
        if let Some(v) = lookup("AGENT_ITERATION_DELAY_MS").and_then(|s| s.parse().ok()) {
            self.iteration_delay_ms = v;
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        let provider = ModelProvider::parse(&self.provider).unwrap_or_else(|| {
            tracing::warn!(provider = %self.provider, "unknown provider, using openai");
            ModelProvider::OpenAiCompatible
        });
        ModelConfig::default()
            .with_provider(provider)
            .with_base_url(&self.base_url)
            .with_api_key(&self.api_key)
            .with_model_name(&self.model_name)
            .with_max_retries(self.max_retries)
            .with_retry_delay(self.retry_delay)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig::default()
            .with_max_iterations(self.max_iterations)
            .with_iteration_delay(Duration::from_millis(self.iteration_delay_ms))
    }

    /// Directory progress records are written to.
    pub fn progress_path(&self) -> Option<PathBuf> {
        if !self.progress_dir.is_empty() {
            return Some(PathBuf::from(&self.progress_dir));
        }
        project_dirs().map(|dirs| dirs.data_dir().join("progress"))
    }

    pub fn schedule_file(&self) -> Option<PathBuf> {
        (!self.schedule_path.is_empty()).then(|| PathBuf::from(&self.schedule_path))
    }
}
