//! Role agents keyed by id, built over a shared set of services.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::agent::RoleAgent;
use super::profiles::{DEFAULT_ROLE, ROLES};
use crate::agent::{AutomationRunner, KnowledgeSource, LoopConfig, LoopController, StatusSnapshot};
use crate::model::Generator;
use crate::progress::ProgressStore;
use crate::vcs::WorkspaceManager;

/// Services every role agent shares.
#[derive(Clone)]
pub struct SharedServices {
    pub generator: Arc<dyn Generator>,
    pub progress: ProgressStore,
    pub workspaces: WorkspaceManager,
    pub loop_config: LoopConfig,
    pub automation: Option<Arc<dyn AutomationRunner>>,
    pub knowledge: Option<Arc<dyn KnowledgeSource>>,
}

impl SharedServices {
    pub fn new(
        generator: Arc<dyn Generator>,
        progress: ProgressStore,
        workspaces: WorkspaceManager,
    ) -> Self {
        Self {
            generator,
            progress,
            workspaces,
            loop_config: LoopConfig::default(),
            automation: None,
            knowledge: None,
        }
    }

    pub fn with_loop_config(mut self, config: LoopConfig) -> Self {
        self.loop_config = config;
        self
    }

    pub fn with_automation(mut self, runner: Arc<dyn AutomationRunner>) -> Self {
        self.automation = Some(runner);
        self
    }

    pub fn with_knowledge(mut self, source: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(source);
        self
    }

    fn controller_for(&self, agent_id: &str) -> LoopController {
        let mut controller =
            LoopController::new(agent_id, self.generator.clone(), self.progress.clone())
                .with_config(self.loop_config.clone());
        if let Some(runner) = &self.automation {
            controller = controller.with_automation(runner.clone());
        }
        if let Some(source) = &self.knowledge {
            controller = controller.with_knowledge(source.clone());
        }
        controller
    }
}

/// One long-lived agent per role.
pub struct AgentRegistry {
    agents: BTreeMap<&'static str, Arc<RoleAgent>>,
}

impl AgentRegistry {
    pub fn new(services: &SharedServices) -> Self {
        let agents = ROLES
            .iter()
            .map(|profile| {
                let agent = RoleAgent::new(
                    profile,
                    services.controller_for(profile.id),
                    services.workspaces.clone(),
                );
                (profile.id, Arc::new(agent))
            })
            .collect();
        Self { agents }
    }

    pub fn get(&self, id: &str) -> Option<Arc<RoleAgent>> {
        self.agents.get(id).cloned()
    }

    /// The agent for `id`, or the generalist when the role is unknown.
    pub fn get_or_default(&self, id: &str) -> Arc<RoleAgent> {
        match self.get(id) {
            Some(agent) => agent,
            None => {
                tracing::warn!(agent = id, fallback = DEFAULT_ROLE, "unknown role");
                self.default_agent()
            }
        }
    }

    fn default_agent(&self) -> Arc<RoleAgent> {
        // ROLES always contains the generalist.
        self.agents[DEFAULT_ROLE].clone()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.agents.keys().copied().collect()
    }

    pub fn statuses(&self) -> Vec<StatusSnapshot> {
        self.agents
            .values()
            .map(|agent| agent.controller().status())
            .collect()
    }
}
