//! Tool permissions and agent availability as seen through the agent service.

mod common;

use std::collections::BTreeSet;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use agentrun::permissions::{
    AgentScope, AvailabilityContext, ContextDimension, PermissionOverride, ScopeRule, Surface,
};
use agentrun::tools::{AgentTool, ToolCollection, ToolParameters};
use agentrun::types::Agent;

use common::{Harness, Turn};

fn tool(id: &str, scope: &str) -> AgentTool {
    AgentTool::new(id, id, ToolParameters::empty(), |_args, _ctx| async { Ok(json!({})) }).with_scope(scope)
}

fn catalogue() -> ToolCollection {
    ToolCollection::new()
        .with_tool(tool("search_content", "content"))
        .with_tool(tool("publish_content", "content"))
        .with_tool(tool("upload_media", "media"))
}

fn ids(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn scope_grants_expand_and_group_overrides_apply() {
    let editors = Uuid::new_v4();
    let mut agent = common::agent("writer");
    agent.allowed_tool_ids = vec!["Upload_Media".into()];
    agent.allowed_tool_scope_ids = vec!["content".into()];
    agent.user_group_permissions.insert(
        editors,
        PermissionOverride {
            denied_tool_ids: vec!["publish_content".into()],
            allowed_tool_ids: vec!["translate".into()],
            ..Default::default()
        },
    );
    let harness = Harness::builder(vec![]).tools(catalogue()).build();
    let service = harness.service();

    assert_eq!(
        service.allowed_tool_ids(&agent, &[]),
        ids(&["publish_content", "search_content", "upload_media"])
    );
    assert_eq!(
        service.allowed_tool_ids(&agent, &[editors]),
        ids(&["search_content", "translate", "upload_media"])
    );
    assert_eq!(
        service.allowed_tool_ids(&agent, &[Uuid::new_v4()]),
        service.allowed_tool_ids(&agent, &[])
    );

    assert!(service.is_tool_allowed(&agent, "publish_content", &[]));
    assert!(!service.is_tool_allowed(&agent, "publish_content", &[editors]));
    assert!(service.is_tool_allowed(&agent, "translate", &[editors]));
    assert!(!service.is_tool_allowed(&agent, "unknown_tool", &[]));
}

fn scoped(alias: &str, surfaces: &[&str], scope: Option<AgentScope>) -> Agent {
    let mut agent = common::agent(alias);
    agent.surface_ids = surfaces.iter().map(|s| s.to_string()).collect();
    agent.scope = scope;
    agent
}

#[tokio::test]
async fn availability_follows_surface_and_scope_rules() {
    let everywhere = scoped("helper", &["copilot"], None);
    let content_only = scoped(
        "editor",
        &["copilot"],
        Some(AgentScope {
            allow_rules: vec![ScopeRule::default().sections(&["content"])],
            deny_rules: vec![],
        }),
    );
    let mut retired = scoped("retired", &["copilot"], None);
    retired.is_active = false;
    let elsewhere = scoped("other", &["chat"], None);

    let harness = Harness::builder(vec![])
        .agent(everywhere.clone())
        .agent(content_only.clone())
        .agent(retired)
        .agent(elsewhere)
        .build();
    let service = harness
        .service()
        .with_surface(Surface::new("copilot", &[ContextDimension::Section]));

    let aliases = |agents: Vec<Agent>| -> BTreeSet<String> { agents.into_iter().map(|a| a.alias).collect() };

    let in_media = AvailabilityContext {
        section: Some("media".into()),
        ..Default::default()
    };
    let in_content = AvailabilityContext {
        section: Some("Content".into()),
        entity_type: Some("member".into()),
        ..Default::default()
    };
    assert_eq!(aliases(service.available_agents("copilot", &in_media).await.unwrap()), ids(&["helper"]));
    assert_eq!(
        aliases(service.available_agents("COPILOT", &in_content).await.unwrap()),
        ids(&["editor", "helper"])
    );
    assert_eq!(aliases(service.agents_by_surface("copilot").await.unwrap()).len(), 3);
}

#[tokio::test]
async fn prompt_routing_picks_the_named_agent() {
    let first = scoped("first", &["copilot"], None);
    let second = scoped("second", &["copilot"], None);
    let harness = Harness::builder(vec![Turn::text(&format!("{}", second.id))])
        .agent(first.clone())
        .agent(second.clone())
        .build();

    let chosen = harness
        .service()
        .select_agent_for_prompt(
            "translate this page",
            "copilot",
            &AvailabilityContext::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chosen.id, second.id);

    let prompt = harness.client.requests()[0].messages[0].text();
    assert!(prompt.contains(&first.id.to_string()));
    assert!(prompt.contains("User message: translate this page"));
}

#[tokio::test]
async fn save_validates_aliases_and_bumps_versions() {
    let harness = Harness::builder(vec![]).build();
    let service = harness.service();

    let mut draft = common::agent("writer");
    draft.id = Uuid::nil();
    let saved = service.save(draft).await.unwrap();
    assert!(!saved.id.is_nil());
    assert_eq!(saved.version, 1);

    let resaved = service.save(saved.clone()).await.unwrap();
    assert_eq!(resaved.version, 2);

    let clash = service.save(common::agent("WRITER")).await.unwrap_err();
    assert!(clash.to_string().contains("already exists"));

    assert!(service.delete(saved.id).await.unwrap());
    assert!(!service.delete(saved.id).await.unwrap());
    assert!(service.get(saved.id).await.unwrap().is_none());
}
