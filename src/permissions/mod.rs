//! Tool permission resolution.
//!
//! An agent grants tools by id and by scope. A user-group override can add
//! grants and deny individual tools or scopes; denial always wins. Resolution
//! is pure: the same defaults and override always give the same result.

pub mod scope;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentRunError, Result};
use crate::tools::ToolCollection;
use crate::types::Agent;

pub use scope::{AgentScope, AvailabilityContext, ContextDimension, ScopeRule, ScopeValidator, Surface};

fn normalize<I, S>(ids: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    ids.into_iter()
        .map(|id| id.as_ref().trim().to_ascii_lowercase())
        .filter(|id| !id.is_empty())
        .collect()
}

/// An agent's own tool grants. Ids are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPermissions {
    pub allowed_tool_ids: BTreeSet<String>,
    pub allowed_tool_scope_ids: BTreeSet<String>,
}

impl ToolPermissions {
    pub fn new<I, J, S, T>(tool_ids: I, scope_ids: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        Self {
            allowed_tool_ids: normalize(tool_ids),
            allowed_tool_scope_ids: normalize(scope_ids),
        }
    }
}

/// Per user-group adjustment of an agent's grants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionOverride {
    pub allowed_tool_ids: Vec<String>,
    pub denied_tool_ids: Vec<String>,
    pub allowed_tool_scope_ids: Vec<String>,
    pub denied_tool_scope_ids: Vec<String>,
}

impl PermissionOverride {
    /// Union of several overrides.
    pub fn merge<'a>(overrides: impl IntoIterator<Item = &'a PermissionOverride>) -> Self {
        let mut merged = Self::default();
        for o in overrides {
            merged.allowed_tool_ids.extend(o.allowed_tool_ids.iter().cloned());
            merged.denied_tool_ids.extend(o.denied_tool_ids.iter().cloned());
            merged
                .allowed_tool_scope_ids
                .extend(o.allowed_tool_scope_ids.iter().cloned());
            merged
                .denied_tool_scope_ids
                .extend(o.denied_tool_scope_ids.iter().cloned());
        }
        merged
    }
}

/// Resolved grants for one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveToolPermissions {
    pub allowed_tool_ids: BTreeSet<String>,
    pub allowed_scope_ids: BTreeSet<String>,
    pub denied_tool_ids: BTreeSet<String>,
}

impl EffectiveToolPermissions {
    pub fn is_tool_allowed(&self, tool_id: &str, tool_scope: Option<&str>) -> bool {
        let id = tool_id.to_ascii_lowercase();
        if self.allowed_tool_ids.contains(&id) {
            return true;
        }
        match tool_scope {
            Some(scope) => {
                self.allowed_scope_ids.contains(&scope.to_ascii_lowercase())
                    && !self.denied_tool_ids.contains(&id)
            }
            None => false,
        }
    }

    /// Direct grants plus every registered tool in a granted scope that is
    /// not individually denied.
    pub fn concrete_tool_ids(&self, tools: &ToolCollection) -> BTreeSet<String> {
        let mut ids = self.allowed_tool_ids.clone();
        ids.extend(
            tools
                .ids_in_scopes(&self.allowed_scope_ids)
                .into_iter()
                .filter(|id| !self.denied_tool_ids.contains(id)),
        );
        ids
    }

    /// Like [`is_tool_allowed`](Self::is_tool_allowed) but as an error.
    pub fn check(&self, tool_id: &str, tool_scope: Option<&str>) -> Result<()> {
        if self.is_tool_allowed(tool_id, tool_scope) {
            Ok(())
        } else {
            Err(AgentRunError::PermissionDenied {
                tool_id: tool_id.to_string(),
            })
        }
    }
}

impl From<&ToolPermissions> for EffectiveToolPermissions {
    fn from(defaults: &ToolPermissions) -> Self {
        Self {
            allowed_tool_ids: defaults.allowed_tool_ids.clone(),
            allowed_scope_ids: defaults.allowed_tool_scope_ids.clone(),
            denied_tool_ids: BTreeSet::new(),
        }
    }
}

/// Apply `override_` to `defaults`: allows are additive, denials subtract.
pub fn resolve(
    defaults: &ToolPermissions,
    override_: Option<&PermissionOverride>,
) -> EffectiveToolPermissions {
    let mut effective = EffectiveToolPermissions::from(defaults);
    let Some(o) = override_ else {
        return effective;
    };

    effective.allowed_tool_ids.extend(normalize(&o.allowed_tool_ids));
    effective
        .allowed_scope_ids
        .extend(normalize(&o.allowed_tool_scope_ids));

    let denied_tools = normalize(&o.denied_tool_ids);
    let denied_scopes = normalize(&o.denied_tool_scope_ids);
    effective
        .allowed_tool_ids
        .retain(|id| !denied_tools.contains(id));
    effective
        .allowed_scope_ids
        .retain(|id| !denied_scopes.contains(id));
    effective.denied_tool_ids = denied_tools;
    effective
}

/// Resolve against the overrides of every group the caller belongs to.
pub fn resolve_for_groups(
    defaults: &ToolPermissions,
    overrides: &BTreeMap<Uuid, PermissionOverride>,
    group_ids: &[Uuid],
) -> EffectiveToolPermissions {
    let matching: Vec<&PermissionOverride> = group_ids
        .iter()
        .filter_map(|id| overrides.get(id))
        .collect();
    if matching.is_empty() {
        return resolve(defaults, None);
    }
    let merged = PermissionOverride::merge(matching);
    resolve(defaults, Some(&merged))
}

/// Effective permissions of `agent` for a caller in `group_ids`.
pub fn effective_for_agent(agent: &Agent, group_ids: &[Uuid]) -> EffectiveToolPermissions {
    resolve_for_groups(
        &agent.default_permissions(),
        &agent.user_group_permissions,
        group_ids,
    )
}

/// Concrete tool ids `agent` may call for a caller in `group_ids`.
pub fn allowed_tool_ids(
    agent: &Agent,
    tools: &ToolCollection,
    group_ids: &[Uuid],
) -> BTreeSet<String> {
    effective_for_agent(agent, group_ids).concrete_tool_ids(tools)
}
