//! Render injected context into the system prompt.

use crate::types::{ChatMessage, Role};

use super::ResolvedContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFormatter {
    heading: String,
}

impl Default for ContextFormatter {
    fn default() -> Self {
        Self::new("## Context")
    }
}

impl ContextFormatter {
    pub fn new(heading: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
        }
    }

    /// One block for every `Always` item, in contribution order. `None` when
    /// there is nothing to inject.
    pub fn format(&self, context: &ResolvedContext) -> Option<String> {
        let mut sections = Vec::new();
        for item in context.injected() {
            let mut section = format!("### {}", item.description);
            match &item.value {
                None | Some(serde_json::Value::Null) => {}
                Some(serde_json::Value::String(text)) => {
                    section.push('\n');
                    section.push_str(text);
                }
                Some(other) => {
                    section.push('\n');
                    section.push_str(
                        &serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
                    );
                }
            }
            sections.push(section);
        }
        if sections.is_empty() {
            return None;
        }
        Some(format!("{}\n\n{}", self.heading, sections.join("\n\n")))
    }

    /// Append the formatted block to the first system message, or insert a
    /// new system message at the front.
    pub fn inject(&self, messages: &mut Vec<ChatMessage>, context: &ResolvedContext) -> bool {
        match self.format(context) {
            Some(block) => {
                inject_into_messages(messages, &block);
                true
            }
            None => false,
        }
    }
}

/// Append `block` to the first system message (blank-line separated), or
/// insert it as a new system message at index 0.
pub fn inject_into_messages(messages: &mut Vec<ChatMessage>, block: &str) {
    match messages.iter_mut().find(|m| m.role == Role::System) {
        Some(system) => {
            if system.text().trim().is_empty() {
                system.content.retain(|part| !matches!(part, crate::types::ContentPart::Text { .. }));
                system.append_text("", block);
            } else {
                system.append_text("\n\n", block);
            }
        }
        None => messages.insert(0, ChatMessage::system(block)),
    }
}
