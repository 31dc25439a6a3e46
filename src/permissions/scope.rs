//! Where an agent is offered: scope rules matched against the caller's
//! section, entity type and workspace.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::types::Agent;

/// A dimension a surface can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "camelCase", ascii_case_insensitive)]
pub enum ContextDimension {
    Section,
    EntityType,
    Workspace,
}

impl ContextDimension {
    pub const ALL: [ContextDimension; 3] = [Self::Section, Self::EntityType, Self::Workspace];
}

/// A place agents are offered, and the dimensions it knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    pub id: String,
    pub supported_dimensions: Vec<ContextDimension>,
}

impl Surface {
    pub fn new(id: impl Into<String>, dimensions: &[ContextDimension]) -> Self {
        Self {
            id: id.into(),
            supported_dimensions: dimensions.to_vec(),
        }
    }

    fn supports(&self, dimension: ContextDimension) -> bool {
        self.supported_dimensions.contains(&dimension)
    }
}

/// The caller's current location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityContext {
    pub section: Option<String>,
    pub entity_type: Option<String>,
    pub workspace: Option<String>,
}

impl AvailabilityContext {
    fn value(&self, dimension: ContextDimension) -> Option<&str> {
        match dimension {
            ContextDimension::Section => self.section.as_deref(),
            ContextDimension::EntityType => self.entity_type.as_deref(),
            ContextDimension::Workspace => self.workspace.as_deref(),
        }
        .filter(|v| !v.is_empty())
    }
}

/// Matches when every populated, relevant dimension contains the context
/// value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type_aliases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_aliases: Option<Vec<String>>,
}

impl ScopeRule {
    pub fn sections(mut self, aliases: &[&str]) -> Self {
        self.section_aliases = Some(aliases.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn entity_types(mut self, aliases: &[&str]) -> Self {
        self.entity_type_aliases = Some(aliases.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn workspaces(mut self, aliases: &[&str]) -> Self {
        self.workspace_aliases = Some(aliases.iter().map(|a| a.to_string()).collect());
        self
    }

    fn aliases(&self, dimension: ContextDimension) -> Option<&[String]> {
        match dimension {
            ContextDimension::Section => self.section_aliases.as_deref(),
            ContextDimension::EntityType => self.entity_type_aliases.as_deref(),
            ContextDimension::Workspace => self.workspace_aliases.as_deref(),
        }
        .filter(|a| !a.is_empty())
    }

    pub fn matches(&self, context: &AvailabilityContext, relevant: &[ContextDimension]) -> bool {
        relevant.iter().all(|&dimension| {
            let Some(aliases) = self.aliases(dimension) else {
                return true;
            };
            context
                .value(dimension)
                .is_some_and(|value| aliases.iter().any(|a| a.eq_ignore_ascii_case(value)))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentScope {
    pub allow_rules: Vec<ScopeRule>,
    pub deny_rules: Vec<ScopeRule>,
}

pub struct ScopeValidator;

impl ScopeValidator {
    /// Deny rules win. No scope, or no allow rules, means available. Without a
    /// surface every dimension is checked.
    pub fn is_agent_available(
        agent: &Agent,
        context: &AvailabilityContext,
        surface: Option<&Surface>,
    ) -> bool {
        let Some(scope) = &agent.scope else {
            return true;
        };
        let relevant: Vec<ContextDimension> = match surface {
            Some(surface) => ContextDimension::ALL
                .into_iter()
                .filter(|d| surface.supports(*d))
                .collect(),
            None => ContextDimension::ALL.to_vec(),
        };

        let any_match = |rules: &[ScopeRule]| rules.iter().any(|r| r.matches(context, &relevant));

        if any_match(&scope.deny_rules) {
            return false;
        }
        scope.allow_rules.is_empty() || any_match(&scope.allow_rules)
    }
}
