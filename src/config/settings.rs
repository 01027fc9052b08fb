//! Configuration settings for Troupe.

use crate::error::{Result, TroupeError};
use crate::model::ModelRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub database: DatabaseSettings,
    pub models: ModelSettings,
    pub server: ServerSettings,
    pub cli: CliSettings,
    pub mcp: McpSettings,
    pub prompts: PromptSettings,
    #[serde(rename = "agent")]
    pub agents: Vec<AgentSettings>,
    #[serde(rename = "team")]
    pub teams: Vec<TeamSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            database: DatabaseSettings::default(),
            models: ModelSettings::default(),
            server: ServerSettings::default(),
            cli: CliSettings::default(),
            mcp: McpSettings::default(),
            prompts: PromptSettings::default(),
            agents: vec![AgentSettings {
                name: "Assistant".to_string(),
                instructions: vec!["You are a helpful AI assistant.".to_string()],
                flags: AgentFlags {
                    markdown: true,
                    ..AgentFlags::default()
                },
                ..AgentSettings::default()
            }],
            teams: Vec::new(),
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.troupe".to_string(),
            log_level: "warn".to_string(),
        }
    }
}

/// Session store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Disable to run agents without any persistence.
    pub enabled: bool,
    /// Path to the SQLite database file.
    pub path: String,
    /// Table for agent and team sessions with their runs.
    pub session_table: String,
    /// Table for user memories.
    pub memory_table: String,
    /// Table for aggregated usage metrics.
    pub metrics_table: String,
    /// Table for evaluation records.
    pub eval_table: String,
    /// Table for knowledge content.
    pub knowledge_table: String,
    /// Message count after which a session summary is (re)generated.
    pub summary_threshold: usize,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "~/.troupe/troupe.db".to_string(),
            session_table: "sessions".to_string(),
            memory_table: "memory".to_string(),
            metrics_table: "metrics".to_string(),
            eval_table: "evals".to_string(),
            knowledge_table: "knowledge".to_string(),
            summary_threshold: 20,
        }
    }
}

/// Model provider settings shared by every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Model used when an agent or team does not name one (`provider:model-id`).
    pub default: String,
    /// Output token limit per model turn.
    pub max_tokens: u32,
    /// Sampling temperature (provider default when unset).
    pub temperature: Option<f32>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// API base URL overrides keyed by provider name.
    pub base_urls: HashMap<String, String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default: "anthropic:claude-sonnet-4-5".to_string(),
            max_tokens: 4096,
            temperature: None,
            timeout_secs: crate::openai::DEFAULT_TIMEOUT_SECS,
            base_urls: HashMap::new(),
        }
    }
}

/// HTTP application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Identifier reported by `GET /config`.
    pub id: String,
    pub description: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            id: "troupe".to_string(),
            description: "Troupe agent runtime".to_string(),
            host: "127.0.0.1".to_string(),
            port: 7777,
        }
    }
}

/// Interactive chat loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliSettings {
    /// Inputs that end the session.
    pub exit_on: Vec<String>,
    /// Match `exit_on` words case-sensitively.
    pub case_sensitive: bool,
    /// Print responses incrementally.
    pub stream: bool,
    /// Prompt label for the user.
    pub user_label: String,
    /// Banner title.
    pub title: String,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            exit_on: ["exit", "quit", "bye", "goodbye"].iter().map(|s| s.to_string()).collect(),
            case_sensitive: false,
            stream: true,
            user_label: "You".to_string(),
            title: "Troupe".to_string(),
        }
    }
}

/// External tool servers reached over MCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Connection timeout applied to each server.
    pub timeout_secs: u64,
    /// Skip servers that fail to connect instead of aborting startup.
    pub allow_partial_failure: bool,
    #[serde(rename = "server")]
    pub servers: Vec<McpServerSettings>,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            allow_partial_failure: false,
            servers: Vec::new(),
        }
    }
}

/// One MCP server launched as a child process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServerSettings {
    pub name: String,
    /// Executable, or a full command line such as `npx -y @mapbox/mcp-server`.
    pub command: String,
    pub args: Vec<String>,
    /// Extra environment for the child; values may reference `${VAR}`.
    pub env: HashMap<String, String>,
    /// Variables that must be set before the server is launched.
    pub required_env: Vec<String>,
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: HashMap<String, String>,
}

/// Context and persistence features shared by agents and teams.
///
/// Everything except `markdown` and `add_datetime_to_context` needs a session store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentFlags {
    /// Replay previous runs of the session into the prompt.
    pub add_history_to_context: bool,
    /// How many previous runs to replay.
    pub num_history_runs: usize,
    /// Offer a `get_chat_history` tool.
    #[serde(alias = "read_team_history")]
    pub read_chat_history: bool,
    /// Offer a `search_previous_sessions` tool.
    pub search_session_history: bool,
    /// How many previous sessions the search tool returns.
    pub num_history_sessions: usize,
    /// Summarize long sessions into the store.
    pub enable_session_summaries: bool,
    /// Load user memories into the prompt and offer `update_user_memory`.
    pub enable_user_memories: bool,
    /// Offer a `search_knowledge_base` tool.
    pub search_knowledge: bool,
    pub add_datetime_to_context: bool,
    /// Ask for markdown formatted answers.
    pub markdown: bool,
}

impl Default for AgentFlags {
    fn default() -> Self {
        Self {
            add_history_to_context: false,
            num_history_runs: 3,
            read_chat_history: false,
            search_session_history: false,
            num_history_sessions: 2,
            enable_session_summaries: false,
            enable_user_memories: false,
            search_knowledge: false,
            add_datetime_to_context: false,
            markdown: false,
        }
    }
}

impl AgentFlags {
    /// Whether any enabled feature reads from or writes to the store.
    pub fn uses_store(&self) -> bool {
        self.add_history_to_context
            || self.read_chat_history
            || self.search_session_history
            || self.enable_session_summaries
            || self.enable_user_memories
            || self.search_knowledge
    }
}

/// Declaration of a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Stable identifier; derived from `name` when empty.
    pub id: String,
    pub name: String,
    pub role: Option<String>,
    pub description: Option<String>,
    pub instructions: Vec<String>,
    /// `provider:model-id`; `models.default` when unset.
    pub model: Option<String>,
    /// Built-in toolkits: factorial, web_search, finance, github.
    pub tools: Vec<String>,
    /// Names of `[[mcp.server]]` entries whose tools this agent gets.
    pub mcp_servers: Vec<String>,
    #[serde(flatten)]
    pub flags: AgentFlags,
    /// Upper bound on model calls per run.
    pub max_steps: usize,
    /// Extra attempts after a failed model call.
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            role: None,
            description: None,
            instructions: Vec::new(),
            model: None,
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            flags: AgentFlags::default(),
            max_steps: 10,
            retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl AgentSettings {
    pub fn resolved_id(&self) -> String {
        if self.id.is_empty() {
            slugify(&self.name)
        } else {
            self.id.clone()
        }
    }
}

/// Declaration of a team coordinating several agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSettings {
    pub id: String,
    pub name: String,
    pub role: Option<String>,
    pub description: Option<String>,
    pub instructions: Vec<String>,
    pub model: Option<String>,
    /// Member agent ids (or names).
    pub members: Vec<String>,
    pub tools: Vec<String>,
    pub mcp_servers: Vec<String>,
    #[serde(flatten)]
    pub flags: AgentFlags,
    pub max_steps: usize,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: String::new(),
            role: None,
            description: None,
            instructions: Vec::new(),
            model: None,
            members: Vec::new(),
            tools: Vec::new(),
            mcp_servers: Vec::new(),
            flags: AgentFlags::default(),
            max_steps: 10,
            retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl TeamSettings {
    pub fn resolved_id(&self) -> String {
        if self.id.is_empty() {
            slugify(&self.name)
        } else {
            self.id.clone()
        }
    }
}

/// Lowercase a display name into an identifier: `Outline Agent` -> `outline-agent`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let settings = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else if path.is_some() {
            return Err(TroupeError::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        } else {
            Settings::default()
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| TroupeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross references: unique ids, team members, MCP server names, model refs.
    pub fn validate(&self) -> Result<()> {
        self.models.default.parse::<ModelRef>()?;
        for (provider, base_url) in &self.models.base_urls {
            url::Url::parse(base_url).map_err(|e| {
                TroupeError::Config(format!("Invalid base URL for '{}': {} ({})", provider, base_url, e))
            })?;
        }

        let servers: HashSet<&str> = self.mcp.servers.iter().map(|s| s.name.as_str()).collect();
        if servers.len() != self.mcp.servers.len() {
            return Err(TroupeError::Config("Duplicate MCP server name".to_string()));
        }
        for server in &self.mcp.servers {
            if server.command.trim().is_empty() {
                return Err(TroupeError::Config(format!("MCP server '{}' has no command", server.name)));
            }
        }

        let mut ids = HashSet::new();
        for agent in &self.agents {
            let id = agent.resolved_id();
            if id.is_empty() {
                return Err(TroupeError::Config("Agent without a name or id".to_string()));
            }
            if !ids.insert(id.clone()) {
                return Err(TroupeError::Config(format!("Duplicate agent or team id '{}'", id)));
            }
            if let Some(model) = &agent.model {
                model.parse::<ModelRef>()?;
            }
            check_server_refs(&id, &agent.mcp_servers, &servers)?;
            if agent.max_steps == 0 {
                return Err(TroupeError::Config(format!("Agent '{}' needs max_steps >= 1", id)));
            }
        }

        for team in &self.teams {
            let id = team.resolved_id();
            if id.is_empty() {
                return Err(TroupeError::Config("Team without a name or id".to_string()));
            }
            if !ids.insert(id.clone()) {
                return Err(TroupeError::Config(format!("Duplicate agent or team id '{}'", id)));
            }
            if team.members.is_empty() {
                return Err(TroupeError::Config(format!("Team '{}' has no members", id)));
            }
            for member in &team.members {
                if self.find_agent(member).is_none() {
                    return Err(TroupeError::Config(format!(
                        "Team '{}' references unknown agent '{}'",
                        id, member
                    )));
                }
            }
            if let Some(model) = &team.model {
                model.parse::<ModelRef>()?;
            }
            check_server_refs(&id, &team.mcp_servers, &servers)?;
            if team.max_steps == 0 {
                return Err(TroupeError::Config(format!("Team '{}' needs max_steps >= 1", id)));
            }
        }

        Ok(())
    }

    /// Find an agent by id or display name.
    pub fn find_agent(&self, key: &str) -> Option<&AgentSettings> {
        self.agents
            .iter()
            .find(|a| a.resolved_id() == key || a.name == key || a.resolved_id() == slugify(key))
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("troupe")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn database_path(&self) -> PathBuf {
        Self::expand_path(&self.database.path)
    }
}

fn check_server_refs(owner: &str, refs: &[String], servers: &HashSet<&str>) -> Result<()> {
    for name in refs {
        if !servers.contains(name.as_str()) {
            return Err(TroupeError::Config(format!(
                "'{}' references unknown MCP server '{}'",
                owner, name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_TEAM: &str = r#"
[models]
default = "anthropic:claude-sonnet-4-5"

[[mcp.server]]
name = "mapbox"
command = "npx -y @mapbox/mcp-server"
required_env = ["MAPBOX_ACCESS_TOKEN"]

[[agent]]
name = "Outline Agent"
role = "Create a short story outline based on a given topic"
instructions = ["Don't use icons and emojis"]
tools = ["web_search"]
add_history_to_context = true
num_history_runs = 2

[[agent]]
name = "Content Writer Agent"
role = "Write story based on a given outline"

[[team]]
name = "Content Team"
members = ["outline-agent", "Content Writer Agent"]
read_team_history = true
max_steps = 2
"#;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.agents.len(), 1);
        assert_eq!(settings.server.port, 7777);
        assert_eq!(settings.cli.exit_on, vec!["exit", "quit", "bye", "goodbye"]);
    }

    #[test]
    fn test_parse_team_config() {
        let settings = Settings::from_toml(CONTENT_TEAM).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.agents[0].resolved_id(), "outline-agent");
        assert!(settings.agents[0].flags.add_history_to_context);
        assert_eq!(settings.agents[0].flags.num_history_runs, 2);
        assert_eq!(settings.agents[1].max_steps, 10);

        let team = &settings.teams[0];
        assert_eq!(team.resolved_id(), "content-team");
        assert!(team.flags.read_chat_history);
        assert_eq!(team.max_steps, 2);
        assert_eq!(settings.mcp.servers[0].required_env, vec!["MAPBOX_ACCESS_TOKEN"]);
    }

    #[test]
    fn test_validate_rejects_unknown_member() {
        let mut settings = Settings::from_toml(CONTENT_TEAM).unwrap();
        settings.teams[0].members.push("editor".to_string());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("unknown agent 'editor'"));
    }

    #[test]
    fn test_validate_rejects_unknown_server() {
        let mut settings = Settings::from_toml(CONTENT_TEAM).unwrap();
        settings.agents[1].mcp_servers.push("github".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_base_url() {
        let mut settings = Settings::default();
        settings
            .models
            .base_urls
            .insert("openai".to_string(), "http://localhost:8080/v1".to_string());
        settings.validate().unwrap();

        settings.models.base_urls.insert("openai".to_string(), "not a url".to_string());
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid base URL"));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Outline Agent"), "outline-agent");
        assert_eq!(slugify("  Finance & Web Team "), "finance-web-team");
        assert_eq!(slugify("MultiMCPAgent"), "multimcpagent");
    }

    #[test]
    fn test_demo_configs_are_valid() {
        for demo in [
            include_str!("../../demos/assistant.toml"),
            include_str!("../../demos/content_team.toml"),
            include_str!("../../demos/finance_team.toml"),
            include_str!("../../demos/multi_mcp.toml"),
        ] {
            Settings::from_toml(demo).unwrap().validate().unwrap();
        }

        let settings = Settings::from_toml(include_str!("../../demos/multi_mcp.toml")).unwrap();
        assert_eq!(settings.mcp.servers.len(), 2);
        assert_eq!(settings.agents[0].retries, 3);
        assert_eq!(settings.agents[0].flags.num_history_runs, 10);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let path = PathBuf::from("/nonexistent/troupe/config.toml");
        assert!(Settings::load_from(Some(&path)).is_err());
    }
}
