//! Required environment variables.
//!
//! Everything that needs a secret declares it up front so that a missing key
//! stops startup before any client is built or any process is spawned.

use super::Settings;
use crate::error::{Result, TroupeError};
use crate::model::ModelRef;
use std::collections::BTreeMap;

/// Variable holding the token for the built-in GitHub toolkit.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_ACCESS_TOKEN";

/// Ordered, duplicate-free set of variable names that must be present.
#[derive(Debug, Clone, Default)]
pub struct EnvRequirements {
    names: Vec<String>,
}

/// Resolved values of the required variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    values: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl EnvRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required variable.
    pub fn require(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.names.contains(&name) {
            self.names.push(name);
        }
        self
    }

    /// Derive the requirements of a configuration: model provider keys, built-in
    /// toolkit tokens and every MCP server's `required_env`.
    pub fn for_settings(settings: &Settings) -> Result<Self> {
        let mut requirements = Self::new();

        let models = settings
            .agents
            .iter()
            .map(|a| a.model.as_deref())
            .chain(settings.teams.iter().map(|t| t.model.as_deref()));
        for model in models {
            let model_ref: ModelRef = model.unwrap_or(&settings.models.default).parse()?;
            requirements = requirements.require(model_ref.provider.api_key_env());
        }

        let toolkits = settings
            .agents
            .iter()
            .flat_map(|a| a.tools.iter())
            .chain(settings.teams.iter().flat_map(|t| t.tools.iter()));
        for toolkit in toolkits {
            if toolkit == "github" {
                requirements = requirements.require(GITHUB_TOKEN_ENV);
            }
        }

        for server in &settings.mcp.servers {
            for name in &server.required_env {
                requirements = requirements.require(name.clone());
            }
        }

        Ok(requirements)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Check against the process environment.
    pub fn check(&self) -> Result<EnvSnapshot> {
        self.check_with(|name| std::env::var(name).ok())
    }

    /// Check against an arbitrary lookup. Unset and empty values both count as missing,
    /// and every missing name is reported at once.
    pub fn check_with<F>(&self, lookup: F) -> Result<EnvSnapshot>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = BTreeMap::new();
        let mut missing = Vec::new();

        for name in &self.names {
            match lookup(name) {
                Some(value) if !value.trim().is_empty() => {
                    values.insert(name.clone(), value);
                }
                _ => missing.push(name.clone()),
            }
        }

        if missing.is_empty() {
            Ok(EnvSnapshot { values })
        } else {
            Err(TroupeError::MissingEnv(missing))
        }
    }
}

/// Expand `${VAR}` and `$VAR` references from the process environment.
pub fn expand_env(value: &str) -> Result<String> {
    shellexpand::env(value)
        .map(|expanded| expanded.into_owned())
        .map_err(|e| TroupeError::MissingEnv(vec![e.var_name]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentSettings, McpServerSettings};
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_missing_variables_are_all_named() {
        let requirements = EnvRequirements::new()
            .require("GITHUB_PERSONAL_ACCESS_TOKEN")
            .require("OPENAI_API_KEY")
            .require("PERPLEXITY_API_KEY");

        let err = requirements
            .check_with(lookup(&[("OPENAI_API_KEY", "sk-1"), ("PERPLEXITY_API_KEY", "  ")]))
            .unwrap_err();

        match &err {
            TroupeError::MissingEnv(names) => {
                assert_eq!(names, &vec!["GITHUB_PERSONAL_ACCESS_TOKEN", "PERPLEXITY_API_KEY"]);
            }
            other => panic!("Expected MissingEnv, got {:?}", other),
        }
        let message = err.to_string();
        assert!(message.contains("GITHUB_PERSONAL_ACCESS_TOKEN"));
        assert!(message.contains("PERPLEXITY_API_KEY"));
    }

    #[test]
    fn test_present_variables_are_returned() {
        let snapshot = EnvRequirements::new()
            .require("ANTHROPIC_API_KEY")
            .require("ANTHROPIC_API_KEY")
            .check_with(lookup(&[("ANTHROPIC_API_KEY", "key")]))
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("ANTHROPIC_API_KEY"), Some("key"));
    }

    #[test]
    fn test_requirements_follow_settings() {
        let mut settings = Settings::default();
        settings.agents.push(AgentSettings {
            name: "Researcher".to_string(),
            model: Some("openai:gpt-4o".to_string()),
            tools: vec!["github".to_string()],
            ..AgentSettings::default()
        });
        settings.mcp.servers.push(McpServerSettings {
            name: "mapbox".to_string(),
            command: "npx -y @mapbox/mcp-server".to_string(),
            required_env: vec!["MAPBOX_ACCESS_TOKEN".to_string()],
            ..McpServerSettings::default()
        });

        let requirements = EnvRequirements::for_settings(&settings).unwrap();
        assert_eq!(
            requirements.names(),
            &["ANTHROPIC_API_KEY", "OPENAI_API_KEY", GITHUB_TOKEN_ENV, "MAPBOX_ACCESS_TOKEN"]
        );
    }

    #[test]
    fn test_expand_env_passes_plain_values() {
        assert_eq!(expand_env("plain-value").unwrap(), "plain-value");
        assert!(expand_env("${TROUPE_TEST_SURELY_UNSET_VARIABLE}").is_err());
    }
}
