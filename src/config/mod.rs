//! Runtime configuration (layered: defaults < TOML file < env < code).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AgentRunError, Result};
use crate::middleware::settings_filter::SettingsFilterRule;

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "agentrun.toml";

const ENV_PREFIX: &str = "AGENTRUN_";

/// Settings shared by the agent pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on model round trips within one run.
    pub max_tool_iterations: u32,
    /// Whether the usage recording middleware records anything.
    pub usage_recording: bool,
    /// Heading placed above injected context items.
    pub context_heading: String,
    /// Surface used for agent availability checks when the caller names none.
    pub default_surface: Option<String>,
    pub settings_filters: Vec<SettingsFilterRule>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 20,
            usage_recording: true,
            context_heading: "## Context".to_string(),
            default_surface: None,
            settings_filters: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load defaults, then `path` (or `agentrun.toml` if present), then the
    /// process environment (after loading `.env`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match resolve_config_path(path) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with the environment only.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgentRunError::Configuration(format!(
                "could not read config file `{}`: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&raw).map_err(|e| match e {
            AgentRunError::Configuration(msg) => AgentRunError::Configuration(format!(
                "{} ({})",
                msg,
                path.display()
            )),
            other => other,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| AgentRunError::Configuration(format!("could not parse config: {e}")))
    }

    /// Overlay `AGENTRUN_*` variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(value) = var("MAX_TOOL_ITERATIONS") {
            self.max_tool_iterations = value.trim().parse().map_err(|_| {
                invalid_env("MAX_TOOL_ITERATIONS", &value)
            })?;
        }
        if let Some(value) = var("USAGE_RECORDING") {
            self.usage_recording = parse_bool(&value)
                .ok_or_else(|| invalid_env("USAGE_RECORDING", &value))?;
        }
        if let Some(value) = var("CONTEXT_HEADING") {
            self.context_heading = value;
        }
        if let Some(value) = var("DEFAULT_SURFACE") {
            let value = value.trim();
            self.default_surface = (!value.is_empty()).then(|| value.to_string());
        }
        Ok(())
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max;
        self
    }

    pub fn with_usage_recording(mut self, enabled: bool) -> Self {
        self.usage_recording = enabled;
        self
    }

    pub fn with_context_heading(mut self, heading: impl Into<String>) -> Self {
        self.context_heading = heading.into();
        self
    }

    pub fn with_default_surface(mut self, surface: impl Into<String>) -> Self {
        self.default_surface = Some(surface.into());
        self
    }

    pub fn with_settings_filter(mut self, rule: SettingsFilterRule) -> Self {
        self.settings_filters.push(rule);
        self
    }
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            default.is_file().then_some(default)
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid_env(key: &str, value: &str) -> AgentRunError {
    AgentRunError::Configuration(format!(
        "invalid environment override for `{ENV_PREFIX}{key}`: `{value}`"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.max_tool_iterations, 20);
        assert!(config.usage_recording);
        assert_eq!(config.context_heading, "## Context");
        assert!(config.default_surface.is_none());
    }

    #[test]
    fn file_overrides_defaults_and_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r###"
max_tool_iterations = 5
context_heading = "## Workspace"

[[settings_filters]]
provider_id = "openai"
model_prefix = "o1"
remove = ["temperature"]
"###
        )
        .unwrap();

        let mut config = RuntimeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_tool_iterations, 5);
        assert_eq!(config.context_heading, "## Workspace");
        assert!(config.usage_recording);
        assert_eq!(config.settings_filters.len(), 1);

        config
            .apply_env(env(&[
                ("AGENTRUN_MAX_TOOL_ITERATIONS", "8"),
                ("AGENTRUN_USAGE_RECORDING", "off"),
                ("AGENTRUN_DEFAULT_SURFACE", "editor"),
            ]))
            .unwrap();
        assert_eq!(config.max_tool_iterations, 8);
        assert!(!config.usage_recording);
        assert_eq!(config.default_surface.as_deref(), Some("editor"));
    }

    #[test]
    fn invalid_env_value_is_a_configuration_error() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_env(env(&[("AGENTRUN_MAX_TOOL_ITERATIONS", "many")]))
            .unwrap_err();
        assert!(matches!(err, AgentRunError::Configuration(_)));
    }

    #[test]
    fn missing_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RuntimeConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("could not read config file"));
    }
}
