//! Agent lifecycle and execution entry points.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures::stream::BoxStream;
use futures::StreamExt;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentFactory, AgentRunOptions};
use crate::error::{AgentRunError, Result};
use crate::hooks::{EntityHooks, ExecutionHooks, HookDecision, NoopHooks};
use crate::permissions::{self, AvailabilityContext, ScopeValidator, Surface};
use crate::protocol::{AguiEvent, AguiEventPayload, EventEmitter, RunOutcome, RunRequest, StreamingService};
use crate::provider::{ChatRequest, ClientCache};
use crate::types::{Agent, Capability, ChatMessage};

use super::store::AgentStore;

fn uuid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[0-9a-fA-F]{8}-?(?:[0-9a-fA-F]{4}-?){3}[0-9a-fA-F]{12}")
            .unwrap_or_else(|e| panic!("invalid uuid pattern: {e}"))
    })
}

/// First UUID found in a model reply, if any.
pub fn parse_agent_id(reply: &str) -> Option<Uuid> {
    uuid_pattern()
        .find(reply)
        .and_then(|m| Uuid::parse_str(m.as_str()).ok())
}

fn routing_prompt(agents: &[Agent], user_prompt: &str) -> String {
    let mut prompt = String::from(
        "You are an agent router. Given the user's message, select the most appropriate agent.\n\
         Return ONLY the agent ID (the GUID) on a single line, nothing else.\n\nAvailable agents:\n",
    );
    for agent in agents {
        let description = agent
            .description
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or("No description");
        prompt.push_str(&format!("[{}] {}: {}\n", agent.id, agent.name, description));
    }
    prompt.push_str(&format!("\nUser message: {user_prompt}\n"));
    prompt
}

/// Three-event stream for runs refused before they start.
fn refused(request: &RunRequest, message: String, code: &str) -> BoxStream<'static, AguiEvent> {
    let emitter = EventEmitter::new(&request.thread_id, &request.run_id);
    let events = vec![
        emitter.run_started(),
        emitter.error(message.clone(), Some(code)),
        emitter.run_finished(Some(message)),
    ];
    futures::stream::iter(events).boxed()
}

pub struct AgentService {
    agents: Arc<dyn AgentStore>,
    factory: AgentFactory,
    surfaces: Vec<Surface>,
    entity_hooks: Arc<dyn EntityHooks<Agent>>,
    execution_hooks: Arc<dyn ExecutionHooks>,
    router_clients: ClientCache,
}

const ROUTER_CLIENT_KEY: &str = "agent_router";

impl AgentService {
    pub fn new(agents: Arc<dyn AgentStore>, factory: AgentFactory) -> Self {
        Self {
            agents,
            factory,
            surfaces: Vec::new(),
            entity_hooks: Arc::new(NoopHooks),
            execution_hooks: Arc::new(NoopHooks),
            router_clients: ClientCache::new(),
        }
    }

    pub fn with_surface(mut self, surface: Surface) -> Self {
        self.surfaces.push(surface);
        self
    }

    pub fn with_entity_hooks(mut self, hooks: Arc<dyn EntityHooks<Agent>>) -> Self {
        self.entity_hooks = hooks;
        self
    }

    pub fn with_execution_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.execution_hooks = hooks;
        self
    }

    pub fn factory(&self) -> &AgentFactory {
        &self.factory
    }

    pub fn surface(&self, id: &str) -> Option<&Surface> {
        self.surfaces.iter().find(|s| s.id.eq_ignore_ascii_case(id))
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Agent>> {
        self.agents.get_agent(id).await
    }

    pub async fn get_by_alias(&self, alias: &str) -> Result<Option<Agent>> {
        self.agents.get_by_alias(alias).await
    }

    pub async fn get_all(&self) -> Result<Vec<Agent>> {
        self.agents.get_all().await
    }

    /// Validate and persist `agent`. New agents get an id; every save bumps
    /// the version. Aliases are unique, case-insensitively.
    pub async fn save(&self, mut agent: Agent) -> Result<Agent> {
        if agent.alias.trim().is_empty() {
            return Err(AgentRunError::InvalidArgument("agent alias is required".into()));
        }
        if agent.name.trim().is_empty() {
            return Err(AgentRunError::InvalidArgument("agent name is required".into()));
        }
        if agent.id.is_nil() {
            agent.id = Uuid::new_v4();
        }
        if let Some(other) = self.agents.get_by_alias(&agent.alias).await? {
            if other.id != agent.id {
                return Err(AgentRunError::InvalidArgument(format!(
                    "An agent with alias '{}' already exists",
                    agent.alias
                )));
            }
        }

        let existing = self.agents.get_agent(agent.id).await?;
        let is_new = existing.is_none();
        if let HookDecision::Deny(reason) = self.entity_hooks.before_save(&agent, is_new).await? {
            return Err(AgentRunError::HookRejected(format!("Agent save cancelled: {reason}")));
        }
        agent.version = existing.map_or(1, |e| e.version + 1);

        let saved = self.agents.save_agent(agent).await?;
        tracing::info!(agent_id = %saved.id, alias = %saved.alias, version = saved.version, "saved agent");
        self.entity_hooks.after_save(&saved, is_new).await?;
        Ok(saved)
    }

    /// Whether an agent was deleted.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let Some(agent) = self.agents.get_agent(id).await? else {
            return Ok(false);
        };
        if let HookDecision::Deny(reason) = self.entity_hooks.before_delete(&agent).await? {
            return Err(AgentRunError::HookRejected(format!("Agent delete cancelled: {reason}")));
        }
        let deleted = self.agents.delete_agent(id).await?;
        if deleted {
            tracing::info!(agent_id = %id, "deleted agent");
            self.entity_hooks.after_delete(&agent).await?;
        }
        Ok(deleted)
    }

    pub fn allowed_tool_ids(&self, agent: &Agent, user_group_ids: &[Uuid]) -> BTreeSet<String> {
        permissions::allowed_tool_ids(agent, self.factory.tools(), user_group_ids)
    }

    /// Registered tools are checked with their scope; unknown ids only by a
    /// direct grant.
    pub fn is_tool_allowed(&self, agent: &Agent, tool_id: &str, user_group_ids: &[Uuid]) -> bool {
        let scope = self.factory.tools().get(tool_id).and_then(|t| t.scope_id().map(str::to_string));
        permissions::effective_for_agent(agent, user_group_ids).is_tool_allowed(tool_id, scope.as_deref())
    }

    pub async fn agents_by_surface(&self, surface_id: &str) -> Result<Vec<Agent>> {
        Ok(self
            .agents
            .get_all()
            .await?
            .into_iter()
            .filter(|a| a.is_on_surface(surface_id))
            .collect())
    }

    /// Active agents on `surface_id` whose scope admits `context`.
    pub async fn available_agents(
        &self,
        surface_id: &str,
        context: &AvailabilityContext,
    ) -> Result<Vec<Agent>> {
        let surface = self.surface(surface_id);
        Ok(self
            .agents_by_surface(surface_id)
            .await?
            .into_iter()
            .filter(|a| a.is_active && ScopeValidator::is_agent_available(a, context, surface))
            .collect())
    }

    /// Pick the agent best suited to `user_prompt`. One candidate is returned
    /// directly; several are routed by the default chat model, falling back
    /// to the first candidate when there is no default profile or the reply
    /// names no candidate.
    pub async fn select_agent_for_prompt(
        &self,
        user_prompt: &str,
        surface_id: &str,
        context: &AvailabilityContext,
        cancel: CancellationToken,
    ) -> Result<Option<Agent>> {
        let candidates = self.available_agents(surface_id, context).await?;
        if candidates.len() <= 1 {
            return Ok(candidates.into_iter().next());
        }

        let Some(profile) = self.factory.profiles().get_default_profile(Capability::Chat).await? else {
            tracing::debug!(surface = %surface_id, "no default chat profile; using first agent");
            return Ok(candidates.into_iter().next());
        };
        let client = self
            .router_clients
            .get_or_create(ROUTER_CLIENT_KEY, &profile, self.factory.clients(), cancel.clone())
            .await?;
        let request = ChatRequest::new(vec![ChatMessage::user(routing_prompt(&candidates, user_prompt))]);
        let reply = client.complete(&request, cancel).await?;

        let chosen = parse_agent_id(&reply.text)
            .and_then(|id| candidates.iter().position(|a| a.id == id))
            .unwrap_or(0);
        Ok(candidates.into_iter().nth(chosen))
    }

    /// Stream a run of agent `agent_id`.
    ///
    /// A missing or inactive agent, or an execution hook refusing the run,
    /// produce a complete error stream. Configuration problems are returned
    /// as errors before anything streams.
    pub async fn stream_agent(
        &self,
        agent_id: Uuid,
        request: RunRequest,
        user_group_ids: &[Uuid],
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, AguiEvent>> {
        let Some(agent) = self.agents.get_agent(agent_id).await? else {
            tracing::warn!(agent_id = %agent_id, run_id = %request.run_id, "agent not found");
            return Ok(refused(&request, "Agent not found".into(), "NOT_FOUND"));
        };
        if !agent.is_active {
            return Ok(refused(
                &request,
                format!("Agent '{}' is not active", agent.name),
                "AGENT_NOT_ACTIVE",
            ));
        }
        match self.execution_hooks.before_execute(&agent, &request.run_id).await? {
            HookDecision::Allow => {}
            HookDecision::Deny(reason) => {
                return Ok(refused(
                    &request,
                    format!("Agent execution cancelled: {reason}"),
                    "EXECUTION_CANCELLED",
                ));
            }
        }

        let started = Instant::now();
        let options = AgentRunOptions::new(&request.thread_id, &request.run_id)
            .with_frontend_tools(request.tools.clone())
            .with_context_items(request.context.clone())
            .with_user_groups(user_group_ids.to_vec());
        let runnable = self.factory.create_agent(&agent, options, cancel.clone()).await?;

        let hooks = self.execution_hooks.clone();
        let run_id = request.run_id.clone();
        let mut events = StreamingService::stream(runnable, request, cancel);
        Ok(async_stream::stream! {
            let mut success = false;
            while let Some(event) = events.next().await {
                if let AguiEventPayload::RunFinished { outcome, .. } = &event.payload {
                    success = *outcome != RunOutcome::Error;
                }
                yield event;
            }
            hooks.after_execute(&agent, &run_id, started.elapsed(), success).await;
        }
        .boxed())
    }
}
