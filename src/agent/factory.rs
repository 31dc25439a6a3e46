//! Builds runnable agents: context, permitted tools, profile and client.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::context::{ContextFormatter, ContextResolutionService, RequestContextItem};
use crate::error::{AgentRunError, Result};
use crate::permissions::{self, EffectiveToolPermissions};
use crate::provider::{property_keys, ChatClientFactory, RequestProperties};
use crate::service::store::ProfileStore;
use crate::tools::{FrontendTool, ToolCollection, ToolScopeCollection};
use crate::types::{Agent, Capability, GenerationSettings, Profile};

use super::runnable::RunnableAgent;

/// Per-run inputs to [`AgentFactory::create_agent`].
#[derive(Debug, Clone, Default)]
pub struct AgentRunOptions {
    pub run_id: String,
    pub thread_id: String,
    /// Replaces the agent's resolved grants when set.
    pub allowed_tool_ids: Option<BTreeSet<String>>,
    /// Caller's user groups, for permission overrides.
    pub user_group_ids: Vec<Uuid>,
    pub context_items: Vec<RequestContextItem>,
    pub frontend_tools: Vec<FrontendTool>,
    pub properties: RequestProperties,
}

impl AgentRunOptions {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    pub fn with_frontend_tools(mut self, tools: Vec<FrontendTool>) -> Self {
        self.frontend_tools = tools;
        self
    }

    pub fn with_context_items(mut self, items: Vec<RequestContextItem>) -> Self {
        self.context_items = items;
        self
    }

    pub fn with_user_groups(mut self, groups: Vec<Uuid>) -> Self {
        self.user_group_ids = groups;
        self
    }

    pub fn with_allowed_tool_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_tool_ids = Some(
            ids.into_iter()
                .map(|id| id.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

#[derive(Clone)]
pub struct AgentFactory {
    profiles: Arc<dyn ProfileStore>,
    clients: ChatClientFactory,
    tools: ToolCollection,
    scopes: ToolScopeCollection,
    context: Arc<ContextResolutionService>,
    formatter: ContextFormatter,
    config: RuntimeConfig,
}

impl AgentFactory {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        clients: ChatClientFactory,
        tools: ToolCollection,
        scopes: ToolScopeCollection,
        context: Arc<ContextResolutionService>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            profiles,
            clients,
            tools,
            scopes,
            context,
            formatter: ContextFormatter::new(config.context_heading.clone()),
            config,
        }
    }

    pub fn profiles(&self) -> &Arc<dyn ProfileStore> {
        &self.profiles
    }

    pub fn clients(&self) -> &ChatClientFactory {
        &self.clients
    }

    pub fn tools(&self) -> &ToolCollection {
        &self.tools
    }

    pub fn scopes(&self) -> &ToolScopeCollection {
        &self.scopes
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Request properties the context contributors and middleware see.
    fn request_properties(agent: &Agent, options: &AgentRunOptions) -> Result<RequestProperties> {
        let mut properties = options.properties.clone();
        properties.insert(property_keys::AGENT_ID.into(), json!(agent.id.to_string()));
        properties.insert(property_keys::RUN_ID.into(), json!(options.run_id));
        properties.insert(property_keys::THREAD_ID.into(), json!(options.thread_id));
        properties.insert(property_keys::CONTEXT_IDS.into(), json!(agent.context_ids));
        if !options.context_items.is_empty() {
            properties.insert(
                property_keys::CONTEXT_ITEMS.into(),
                serde_json::to_value(&options.context_items)?,
            );
        }
        Ok(properties)
    }

    async fn resolve_profile(&self, agent: &Agent) -> Result<Profile> {
        match agent.profile_id {
            Some(id) => self.profiles.get_profile(id).await?.ok_or_else(|| {
                AgentRunError::Configuration(format!("Profile with ID '{id}' not found"))
            }),
            None => self
                .profiles
                .get_default_profile(Capability::Chat)
                .await?
                .ok_or_else(|| {
                    AgentRunError::Configuration(format!(
                        "Agent '{}' has no profile and no default chat profile is configured",
                        agent.alias
                    ))
                }),
        }
    }

    fn effective_permissions(agent: &Agent, options: &AgentRunOptions) -> EffectiveToolPermissions {
        match &options.allowed_tool_ids {
            Some(ids) => EffectiveToolPermissions {
                allowed_tool_ids: ids.clone(),
                ..Default::default()
            },
            None => permissions::effective_for_agent(agent, &options.user_group_ids),
        }
    }

    /// Resolve everything a run needs. Configuration problems surface here,
    /// before any streaming starts.
    pub async fn create_agent(
        &self,
        agent: &Agent,
        options: AgentRunOptions,
        cancel: CancellationToken,
    ) -> Result<RunnableAgent> {
        let mut properties = Self::request_properties(agent, &options)?;
        let resolved = self.context.resolve(&properties, cancel.clone()).await?;
        let entity_type = resolved.entity_type().map(str::to_string);

        let permissions = Self::effective_permissions(agent, &options);
        let allowed = permissions.concrete_tool_ids(&self.tools);
        let server_tools: Vec<_> = self
            .tools
            .select(&allowed)
            .into_iter()
            .filter(|tool| {
                self.scopes
                    .allows_in_context(tool.scope_id(), entity_type.as_deref())
            })
            .collect();

        let frontend_tools: Vec<FrontendTool> = options
            .frontend_tools
            .iter()
            .filter(|tool| {
                let permitted = permissions.is_tool_allowed(&tool.name, tool.scope.as_deref());
                if !permitted {
                    tracing::debug!(tool = %tool.name, agent_id = %agent.id, "frontend tool not permitted");
                }
                permitted
                    && self
                        .scopes
                        .allows_in_context(tool.scope.as_deref(), entity_type.as_deref())
            })
            .cloned()
            .collect();

        properties.insert(
            property_keys::FRONTEND_TOOL_NAMES.into(),
            json!(frontend_tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()),
        );

        let profile = self.resolve_profile(agent).await?;
        properties.insert(property_keys::PROFILE_ID.into(), json!(profile.id.to_string()));
        let client = self.clients.create_client(&profile, cancel).await?;

        let settings = GenerationSettings {
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
            ..Default::default()
        };
        let system_prompt = agent
            .instructions
            .clone()
            .filter(|i| !i.trim().is_empty())
            .or_else(|| profile.system_prompt_template.clone());

        tracing::debug!(
            agent_id = %agent.id,
            run_id = %options.run_id,
            profile = %profile.alias,
            server_tools = server_tools.len(),
            frontend_tools = frontend_tools.len(),
            context_items = resolved.items.len(),
            "created runnable agent"
        );

        Ok(RunnableAgent {
            agent_id: agent.id,
            run_id: options.run_id,
            thread_id: options.thread_id,
            client,
            system_prompt,
            settings,
            tools: server_tools,
            all_tools: self.tools.clone(),
            frontend_tools,
            permissions,
            context: Arc::new(resolved),
            formatter: self.formatter.clone(),
            properties,
            max_iterations: self.config.max_tool_iterations,
        })
    }
}
