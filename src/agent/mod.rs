//! Agents: a model, instructions and tools bound into one conversational component.
//!
//! An agent answers a message by calling its model in a loop. Each model turn
//! may request tool calls; their results are fed back until the model answers
//! without tools or the step limit is reached. Teams reuse the same loop with a
//! coordinator agent whose tools delegate to members.

mod context;
mod history;
mod runner;

pub use crate::storage::ToolCallRecord;
pub use history::HistoryTools;

use crate::config::{AgentFlags, Prompts};
use crate::model::{ModelProvider, ModelRef};
use crate::storage::{ComponentKind, RunMetrics, RunRecord, SessionStore};
use crate::tools::{Tool, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Generate a session id such as `session_1a2b3c4d`.
pub fn new_session_id() -> String {
    format!("session_{}", short_id())
}

/// Generate a user id such as `user_1a2b3c4d`.
pub fn new_user_id() -> String {
    format!("user_{}", short_id())
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Caller supplied identity of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    pub user_id: Option<String>,
    /// Continue this session; a new one is generated when absent.
    pub session_id: Option<String>,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    pub run_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub component_id: String,
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub metrics: RunMetrics,
}

/// Progress of a run, as emitted by [`Agent::run_stream`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        session_id: String,
        component_id: String,
    },
    Content {
        delta: String,
    },
    ToolCallStarted {
        id: String,
        name: String,
        arguments: String,
    },
    ToolCallCompleted(ToolCallRecord),
    RunCompleted(RunOutput),
}

/// State shared by everything taking part in one run.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub component_id: String,
    pub store: Option<Arc<SessionStore>>,
    /// Runs of delegated members, persisted together with this run.
    pub(crate) child_runs: Arc<Mutex<Vec<RunRecord>>>,
}

/// Link from a delegated run to the run that started it.
#[derive(Clone)]
pub(crate) struct ParentRun {
    pub run_id: String,
    pub child_runs: Arc<Mutex<Vec<RunRecord>>>,
}

/// Supplies tools that depend on the run (session, user, parent run).
pub trait RunToolProvider: Send + Sync {
    fn tools_for_run(&self, ctx: &RunContext) -> Vec<Arc<dyn Tool>>;
}

/// Public description of an agent or team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub kind: ComponentKind,
    pub role: Option<String>,
    pub description: Option<String>,
    pub model: String,
    pub instructions: Vec<String>,
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
}

/// A configured agent. Cheap to clone.
#[derive(Clone)]
pub struct Agent {
    id: String,
    name: String,
    kind: ComponentKind,
    role: Option<String>,
    description: Option<String>,
    instructions: Vec<String>,
    /// Extra system prompt block (team coordination).
    addendum: Option<String>,
    model: Arc<dyn ModelProvider>,
    tools: ToolRegistry,
    run_tools: Vec<Arc<dyn RunToolProvider>>,
    store: Option<Arc<SessionStore>>,
    flags: AgentFlags,
    max_steps: usize,
    retries: u32,
    retry_delay: Duration,
    summary_threshold: usize,
    prompts: Arc<Prompts>,
}

impl Agent {
    /// Create an agent with default settings; the id is derived from the name.
    pub fn new(name: &str, model: Arc<dyn ModelProvider>) -> Self {
        Self {
            id: crate::config::slugify(name),
            name: name.to_string(),
            kind: ComponentKind::Agent,
            role: None,
            description: None,
            instructions: Vec::new(),
            addendum: None,
            model,
            tools: ToolRegistry::new(),
            run_tools: Vec::new(),
            store: None,
            flags: AgentFlags::default(),
            max_steps: 10,
            retries: 0,
            retry_delay: Duration::from_secs(1),
            summary_threshold: 20,
            prompts: Arc::new(Prompts::default()),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_instructions(mut self, instructions: Vec<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Attach the store used for history, memories, summaries and metrics.
    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_flags(mut self, flags: AgentFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Retry failed model calls `retries` times, waiting `delay * attempt` between tries.
    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_summary_threshold(mut self, threshold: usize) -> Self {
        self.summary_threshold = threshold;
        self
    }

    pub fn with_prompts(mut self, prompts: Arc<Prompts>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_run_tools(mut self, provider: Arc<dyn RunToolProvider>) -> Self {
        self.run_tools.push(provider);
        self
    }

    pub(crate) fn as_team(mut self, addendum: String) -> Self {
        self.kind = ComponentKind::Team;
        self.addendum = Some(addendum);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn model_ref(&self) -> &ModelRef {
        self.model.model_ref()
    }

    pub fn flags(&self) -> &AgentFlags {
        &self.flags
    }

    pub fn store(&self) -> Option<&Arc<SessionStore>> {
        self.store.as_ref()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.names().into_iter().map(str::to_string).collect()
    }

    /// Flags that need a store but will do nothing without one.
    pub fn inert_flags(&self) -> bool {
        self.store.is_none() && self.flags.uses_store()
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            role: self.role.clone(),
            description: self.description.clone(),
            model: self.model_ref().to_string(),
            instructions: self.instructions.clone(),
            tools: self.tool_names(),
            members: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scripted::ScriptedModel;

    #[test]
    fn test_generated_ids() {
        let session = new_session_id();
        assert!(session.starts_with("session_"));
        assert_eq!(session.len(), "session_".len() + 8);
        assert!(new_user_id().starts_with("user_"));
        assert_ne!(new_session_id(), new_session_id());
    }

    #[test]
    fn test_builder_and_info() {
        let agent = Agent::new("Finance Agent", Arc::new(ScriptedModel::new(vec![])))
            .with_role(Some("Get financial data".to_string()))
            .with_instructions(vec!["Always use tables to display data".to_string()])
            .with_max_steps(0);

        let info = agent.info();
        assert_eq!(info.id, "finance-agent");
        assert_eq!(info.kind, ComponentKind::Agent);
        assert_eq!(info.model, "openai:scripted");
        assert_eq!(agent.max_steps, 1);
    }

    #[test]
    fn test_inert_flags_without_store() {
        let flags = AgentFlags {
            add_history_to_context: true,
            ..AgentFlags::default()
        };
        let agent = Agent::new("a", Arc::new(ScriptedModel::new(vec![]))).with_flags(flags);
        assert!(agent.inert_flags());

        let agent = agent.with_store(Arc::new(SessionStore::in_memory().unwrap()));
        assert!(!agent.inert_flags());
    }

    #[test]
    fn test_run_event_serialization() {
        let event = RunEvent::Content {
            delta: "Hel".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "content");
        assert_eq!(json["delta"], "Hel");

        let record = ToolCallRecord {
            id: "call_1".to_string(),
            name: "factorial".to_string(),
            arguments: "{}".to_string(),
            result: "1".to_string(),
            is_error: false,
        };
        let json = serde_json::to_value(RunEvent::ToolCallCompleted(record)).unwrap();
        assert_eq!(json["event"], "tool_call_completed");
        assert_eq!(json["name"], "factorial");
    }
}
