//! Prompt templates for Troupe.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Prompts {
    pub summary: SummaryPrompts,
    pub team: TeamPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: HashMap<String, String>,
}

/// Prompts for session summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryPrompts {
    pub system: String,
    pub user: String,
}

impl Default for SummaryPrompts {
    fn default() -> Self {
        Self {
            system: r#"You summarize conversations between a user and an AI assistant.

Write a short summary that captures:
- What the user asked for
- Facts the user shared about themselves or their goals
- Conclusions and answers that were reached

Keep it under 150 words. Do not invent details."#
                .to_string(),

            user: r#"{{#if previous_summary}}Previous summary:
{{previous_summary}}

{{/if}}Conversation:
{{conversation}}

Write the updated summary."#
                .to_string(),
        }
    }
}

/// Prompts for team coordinators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamPrompts {
    pub coordinator: String,
}

impl Default for TeamPrompts {
    fn default() -> Self {
        Self {
            coordinator: r#"You are the leader of a team of AI agents: {{team_name}}.

You can delegate work to these members with the `delegate_task_to_member` tool:
{{members}}

Guidelines:
- Decide which members are needed and in which order
- Give each member a clear, self-contained task
- Pass earlier members' results along when a later member depends on them
- Combine the members' answers into the final response to the user"#
                .to_string(),
        }
    }
}

impl Prompts {
    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(custom_dir: Option<&str>, custom_variables: Option<&HashMap<String, String>>) -> crate::error::Result<Self> {
        let mut prompts = Prompts::default();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let summary_path = custom_path.join("summary.toml");
            if summary_path.exists() {
                let content = std::fs::read_to_string(&summary_path)?;
                prompts.summary = toml::from_str(&content)?;
            }

            let team_path = custom_path.join("team.toml");
            if team_path.exists() {
                let content = std::fs::read_to_string(&team_path)?;
                prompts.team = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    ///
    /// Supports `{{name}}` substitution and `{{#if name}}...{{/if}}` blocks, which are
    /// kept only when `name` is present and non-empty.
    pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
        let mut result = render_conditionals(template, vars);
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(&self, template: &str, vars: &HashMap<String, String>) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}

fn render_conditionals(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{#if ") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 6..];
        let Some(name_end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        let name = after[..name_end].trim();
        let body_start = &after[name_end + 2..];
        let Some(body_end) = body_start.find("{{/if}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        if vars.get(name).is_some_and(|v| !v.is_empty()) {
            out.push_str(&body_start[..body_end]);
        }
        rest = &body_start[body_end + 7..];
    }

    out.push_str(rest);
    out
}
