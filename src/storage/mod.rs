//! Persistence for sessions, user memories, metrics, evaluations and knowledge.

mod sqlite;

pub use sqlite::{SessionFilter, SessionStore, TableNames};

use crate::model::{Message, Role, Usage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a session belongs to an agent or a team.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Agent,
    Team,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Agent => "agent",
            ComponentKind::Team => "team",
        }
    }
}

impl std::str::FromStr for ComponentKind {
    type Err = crate::error::TroupeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "agent" => Ok(ComponentKind::Agent),
            "team" => Ok(ComponentKind::Team),
            other => Err(crate::error::TroupeError::Storage(format!("Unknown component kind: {}", other))),
        }
    }
}

/// Usage counters of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub model_calls: u32,
    pub tool_calls: u32,
    pub duration_ms: u64,
}

impl RunMetrics {
    pub fn add_usage(&mut self, usage: &Usage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.total_tokens += usage.total_tokens;
    }

    /// Fold a member run's counters into a coordinator's.
    pub fn absorb(&mut self, other: &RunMetrics) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.model_calls += other.model_calls;
        self.tool_calls += other.tool_calls;
    }
}

/// A tool call made during a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: String,
    pub result: String,
    pub is_error: bool,
}

/// One exchange: a user input and everything the component did to answer it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub component_id: String,
    /// Team run that delegated this run, if any.
    #[serde(default)]
    pub parent_run_id: Option<String>,
    pub input: String,
    pub content: String,
    /// Messages of this run without the system prompt and replayed history.
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub metrics: RunMetrics,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

/// A persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub user_id: Option<String>,
    pub component_id: String,
    pub component_kind: ComponentKind,
    pub summary: Option<SessionSummary>,
    pub runs: Vec<RunRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(session_id: &str, user_id: Option<&str>, component_id: &str, component_kind: ComponentKind) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            user_id: user_id.map(str::to_string),
            component_id: component_id.to_string(),
            component_kind,
            summary: None,
            runs: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Runs that were started directly by the user (not delegated).
    pub fn top_level_runs(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter().filter(|r| r.parent_run_id.is_none())
    }

    pub fn message_count(&self) -> usize {
        self.top_level_runs().map(|r| r.messages.len()).sum()
    }

    /// User and assistant text of the top-level runs, oldest first.
    pub fn transcript(&self) -> Vec<(Role, String)> {
        self.top_level_runs()
            .flat_map(|r| r.messages.iter())
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.content.is_empty())
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }
}

/// Listing row for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: Option<String>,
    pub component_id: String,
    pub component_kind: ComponentKind,
    pub run_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A fact remembered about a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMemory {
    pub id: String,
    pub user_id: String,
    pub memory: String,
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Usage aggregated per component per day.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsRecord {
    pub date: String,
    pub component_id: String,
    pub runs: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub model_calls: u64,
    pub tool_calls: u64,
    pub duration_ms: u64,
}

/// Outcome of an evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRecord {
    pub id: String,
    pub component_id: String,
    pub input: String,
    pub expected: String,
    pub output: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub created_at: DateTime<Utc>,
}

/// A piece of reference content searchable by agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
