//! Tools that let an agent read its own past: chat history, earlier sessions,
//! user memories and the knowledge base.

use super::{RunContext, RunToolProvider};
use crate::config::AgentFlags;
use crate::error::{Result, TroupeError};
use crate::storage::{SessionFilter, SessionStore};
use crate::tools::{required_str, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Number of knowledge entries returned per search.
const KNOWLEDGE_RESULTS: usize = 5;

/// Adds the history tools enabled by an agent's flags to every run that has a store.
pub struct HistoryTools {
    component_id: String,
    flags: AgentFlags,
}

impl HistoryTools {
    pub fn new(component_id: &str, flags: AgentFlags) -> Self {
        Self {
            component_id: component_id.to_string(),
            flags,
        }
    }
}

impl RunToolProvider for HistoryTools {
    fn tools_for_run(&self, ctx: &RunContext) -> Vec<Arc<dyn Tool>> {
        let Some(store) = &ctx.store else {
            return Vec::new();
        };

        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
        if self.flags.read_chat_history {
            tools.push(Arc::new(ChatHistoryTool {
                store: store.clone(),
                session_id: ctx.session_id.clone(),
            }));
        }
        if self.flags.search_session_history {
            tools.push(Arc::new(PreviousSessionsTool {
                store: store.clone(),
                component_id: self.component_id.clone(),
                user_id: ctx.user_id.clone(),
                session_id: ctx.session_id.clone(),
                default_limit: self.flags.num_history_sessions,
            }));
        }
        if self.flags.enable_user_memories {
            tools.push(Arc::new(UserMemoryTool {
                store: store.clone(),
                user_id: ctx.user_id.clone(),
            }));
        }
        if self.flags.search_knowledge {
            tools.push(Arc::new(KnowledgeSearchTool { store: store.clone() }));
        }
        tools
    }
}

fn optional_count(args: &Value, key: &str) -> Option<usize> {
    args.get(key).and_then(Value::as_u64).map(|n| n as usize)
}

/// Returns the conversation of the current session.
struct ChatHistoryTool {
    store: Arc<SessionStore>,
    session_id: String,
}

#[async_trait]
impl Tool for ChatHistoryTool {
    fn name(&self) -> &str {
        "get_chat_history"
    }

    fn description(&self) -> &str {
        "Get the messages exchanged with the user in this session, oldest first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "num_chats": {
                    "type": "integer",
                    "description": "Only return this many of the most recent user/assistant messages"
                }
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let Some(session) = self.store.get_session(&self.session_id)? else {
            return Ok("[]".to_string());
        };

        let transcript = session.transcript();
        let skip = optional_count(&args, "num_chats")
            .map(|n| transcript.len().saturating_sub(n))
            .unwrap_or(0);
        let messages: Vec<Value> = transcript
            .into_iter()
            .skip(skip)
            .map(|(role, content)| json!({ "role": role.to_string(), "content": content }))
            .collect();
        Ok(serde_json::to_string_pretty(&messages)?)
    }
}

/// Returns summaries or transcripts of the user's earlier sessions with this component.
struct PreviousSessionsTool {
    store: Arc<SessionStore>,
    component_id: String,
    user_id: Option<String>,
    session_id: String,
    default_limit: usize,
}

#[async_trait]
impl Tool for PreviousSessionsTool {
    fn name(&self) -> &str {
        "search_previous_sessions"
    }

    fn description(&self) -> &str {
        "Look up the user's previous sessions with you, most recent first."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "num_sessions": {
                    "type": "integer",
                    "description": "Number of previous sessions to return"
                }
            }
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let limit = optional_count(&args, "num_sessions").unwrap_or(self.default_limit);
        let filter = SessionFilter {
            component_id: Some(self.component_id.clone()),
            user_id: self.user_id.clone(),
            // One extra row in case the current session is among the newest.
            limit: Some(limit + 1),
        };

        let sessions: Vec<Value> = self
            .store
            .query_sessions(&filter)?
            .into_iter()
            .filter(|s| s.session_id != self.session_id)
            .take(limit)
            .map(|s| {
                let body = match &s.summary {
                    Some(summary) => json!({ "summary": summary.summary }),
                    None => json!({
                        "messages": s
                            .transcript()
                            .into_iter()
                            .map(|(role, content)| json!({ "role": role.to_string(), "content": content }))
                            .collect::<Vec<_>>()
                    }),
                };
                json!({
                    "session_id": s.session_id,
                    "updated_at": s.updated_at.to_rfc3339(),
                    "session": body,
                })
            })
            .collect();

        if sessions.is_empty() {
            return Ok("No previous sessions found.".to_string());
        }
        Ok(serde_json::to_string_pretty(&sessions)?)
    }
}

/// Saves a fact about the current user.
struct UserMemoryTool {
    store: Arc<SessionStore>,
    user_id: Option<String>,
}

#[async_trait]
impl Tool for UserMemoryTool {
    fn name(&self) -> &str {
        "update_user_memory"
    }

    fn description(&self) -> &str {
        "Remember a fact about the user for future conversations."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "memory": { "type": "string", "description": "The fact to remember" },
                "topics": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Topics the fact relates to"
                }
            },
            "required": ["memory"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let user_id = self
            .user_id
            .as_deref()
            .ok_or_else(|| TroupeError::Tool("No user id for this run; memories cannot be saved".to_string()))?;
        let memory = required_str(&args, "memory")?;
        let topics: Vec<String> = args
            .get("topics")
            .and_then(Value::as_array)
            .map(|t| t.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();

        let saved = self.store.add_memory(user_id, memory, &topics)?;
        Ok(format!("Memory saved ({})", saved.id))
    }
}

/// Keyword search over the knowledge table.
struct KnowledgeSearchTool {
    store: Arc<SessionStore>,
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the knowledge base for reference material relevant to a query."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let query = required_str(&args, "query")?;
        let entries = self.store.search_knowledge(query, KNOWLEDGE_RESULTS)?;
        if entries.is_empty() {
            return Ok(format!("No knowledge found for '{}'.", query));
        }
        let results: Vec<Value> = entries
            .into_iter()
            .map(|e| json!({ "name": e.name, "content": e.content }))
            .collect();
        Ok(serde_json::to_string_pretty(&results)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::RunContext;
    use crate::model::Message;
    use crate::storage::{ComponentKind, RunMetrics, RunRecord};
    use chrono::Utc;
    use std::sync::Mutex;

    fn ctx(store: Option<Arc<SessionStore>>, session_id: &str) -> RunContext {
        RunContext {
            run_id: "run_1".to_string(),
            session_id: session_id.to_string(),
            user_id: Some("user_1".to_string()),
            component_id: "assistant".to_string(),
            store,
            child_runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn all_flags() -> AgentFlags {
        AgentFlags {
            read_chat_history: true,
            search_session_history: true,
            enable_user_memories: true,
            search_knowledge: true,
            ..AgentFlags::default()
        }
    }

    fn record(input: &str) -> RunRecord {
        RunRecord {
            run_id: format!("run_{}", input),
            component_id: "assistant".to_string(),
            parent_run_id: None,
            input: input.to_string(),
            content: format!("answer to {}", input),
            messages: vec![Message::user(input), Message::assistant(format!("answer to {}", input))],
            tool_calls: Vec::new(),
            metrics: RunMetrics::default(),
            created_at: Utc::now(),
        }
    }

    fn tool(tools: &[Arc<dyn Tool>], name: &str) -> Arc<dyn Tool> {
        tools.iter().find(|t| t.name() == name).cloned().unwrap()
    }

    #[test]
    fn test_tools_follow_flags() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        let provider = HistoryTools::new("assistant", all_flags());
        assert!(provider.tools_for_run(&ctx(None, "s1")).is_empty());

        let names: Vec<String> = provider
            .tools_for_run(&ctx(Some(store.clone()), "s1"))
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["get_chat_history", "search_previous_sessions", "update_user_memory", "search_knowledge_base"]
        );

        let only_chat = HistoryTools::new(
            "assistant",
            AgentFlags {
                read_chat_history: true,
                ..AgentFlags::default()
            },
        );
        assert_eq!(only_chat.tools_for_run(&ctx(Some(store), "s1")).len(), 1);
    }

    #[tokio::test]
    async fn test_chat_history_limits_messages() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        for input in ["one", "two"] {
            store
                .append_run("s1", Some("user_1"), "assistant", ComponentKind::Agent, record(input))
                .unwrap();
        }
        let tools = HistoryTools::new("assistant", all_flags()).tools_for_run(&ctx(Some(store), "s1"));

        let history = tool(&tools, "get_chat_history").invoke(json!({"num_chats": 2})).await.unwrap();
        let history: Vec<Value> = serde_json::from_str(&history).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["content"], "two");
        assert_eq!(history[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn test_previous_sessions_skip_current() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        store
            .append_run("old", Some("user_1"), "assistant", ComponentKind::Agent, record("earlier"))
            .unwrap();
        store
            .append_run("s1", Some("user_1"), "assistant", ComponentKind::Agent, record("now"))
            .unwrap();
        store
            .append_run("other", Some("user_2"), "assistant", ComponentKind::Agent, record("someone else"))
            .unwrap();
        let tools = HistoryTools::new("assistant", all_flags()).tools_for_run(&ctx(Some(store), "s1"));

        let found = tool(&tools, "search_previous_sessions").invoke(json!({})).await.unwrap();
        assert!(found.contains("\"old\""));
        assert!(found.contains("earlier"));
        assert!(!found.contains("someone else"));
        assert!(!found.contains("\"s1\""));
    }

    #[tokio::test]
    async fn test_memory_and_knowledge_tools() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        store
            .add_knowledge("refunds", "Refunds are issued within 14 days of purchase.")
            .unwrap();
        let tools = HistoryTools::new("assistant", all_flags()).tools_for_run(&ctx(Some(store.clone()), "s1"));

        let saved = tool(&tools, "update_user_memory")
            .invoke(json!({"memory": "Prefers answers as tables", "topics": ["format"]}))
            .await
            .unwrap();
        assert!(saved.starts_with("Memory saved"));
        let memories = store.list_memories("user_1").unwrap();
        assert_eq!(memories[0].topics, vec!["format"]);

        let found = tool(&tools, "search_knowledge_base").invoke(json!({"query": "refunds"})).await.unwrap();
        assert!(found.contains("14 days"));
        let missing = tool(&tools, "search_knowledge_base").invoke(json!({"query": "shipping"})).await.unwrap();
        assert!(missing.starts_with("No knowledge found"));
    }

    #[tokio::test]
    async fn test_memory_needs_user() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        let mut run_ctx = ctx(Some(store), "s1");
        run_ctx.user_id = None;
        let tools = HistoryTools::new("assistant", all_flags()).tools_for_run(&run_ctx);

        let result = tool(&tools, "update_user_memory").invoke(json!({"memory": "x"})).await;
        assert!(matches!(result, Err(TroupeError::Tool(_))));
    }
}
