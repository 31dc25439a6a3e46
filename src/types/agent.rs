//! Agent definitions.

use std::collections::BTreeMap;

use bon::Builder;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::permissions::scope::AgentScope;
use crate::permissions::{PermissionOverride, ToolPermissions};

/// A configured agent: instructions, model profile, tool grants and scope.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    #[builder(default = Uuid::nil())]
    #[serde(default)]
    pub id: Uuid,
    #[builder(into)]
    pub alias: String,
    #[builder(into)]
    pub name: String,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[builder(into)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Absent means the default chat profile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<Uuid>,
    #[builder(default)]
    #[serde(default)]
    pub context_ids: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub surface_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<AgentScope>,
    #[builder(default)]
    #[serde(default)]
    pub allowed_tool_ids: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub allowed_tool_scope_ids: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub user_group_permissions: BTreeMap<Uuid, PermissionOverride>,
    #[builder(default = true)]
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[builder(default)]
    #[serde(default)]
    pub version: u32,
}

fn default_active() -> bool {
    true
}

impl Agent {
    /// The agent's own grants, before any user-group override.
    pub fn default_permissions(&self) -> ToolPermissions {
        ToolPermissions::new(
            self.allowed_tool_ids.iter().cloned(),
            self.allowed_tool_scope_ids.iter().cloned(),
        )
    }

    /// Whether the agent is offered on the given surface. Agents without
    /// surface ids are offered nowhere.
    pub fn is_on_surface(&self, surface_id: &str) -> bool {
        self.surface_ids
            .iter()
            .any(|s| s.eq_ignore_ascii_case(surface_id))
    }
}
