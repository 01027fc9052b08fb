//! Prompt assembly: system message, replayed history and the user message.

use super::{Agent, RunContext};
use crate::model::{Message, Role};
use crate::storage::{SessionRecord, UserMemory};
use chrono::Utc;
use std::collections::HashMap;

impl Agent {
    /// Template variables available in instructions.
    fn template_vars(&self, ctx: &RunContext) -> HashMap<String, String> {
        HashMap::from([
            ("user_id".to_string(), ctx.user_id.clone().unwrap_or_default()),
            ("session_id".to_string(), ctx.session_id.clone()),
            ("agent_name".to_string(), self.name.clone()),
            ("agent_id".to_string(), self.id.clone()),
        ])
    }

    /// Build the system prompt, or `None` when there is nothing to say.
    pub(super) fn system_prompt(
        &self,
        ctx: &RunContext,
        session: Option<&SessionRecord>,
        memories: &[UserMemory],
    ) -> Option<String> {
        let mut sections = Vec::new();

        if let Some(description) = &self.description {
            sections.push(description.clone());
        }
        if let Some(role) = &self.role {
            sections.push(format!("<your_role>\n{}\n</your_role>", role));
        }

        let vars = self.template_vars(ctx);
        let instructions: Vec<String> = self
            .instructions
            .iter()
            .map(|i| self.prompts.render_with_custom(i, &vars))
            .filter(|i| !i.trim().is_empty())
            .collect();
        match instructions.len() {
            0 => {}
            1 => sections.push(instructions[0].clone()),
            _ => sections.push(format!(
                "<instructions>\n{}\n</instructions>",
                instructions.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
            )),
        }

        if let Some(addendum) = &self.addendum {
            sections.push(addendum.clone());
        }

        let mut notes = Vec::new();
        if self.flags.markdown {
            notes.push("Use markdown to format your answers.".to_string());
        }
        if self.flags.add_datetime_to_context {
            notes.push(format!("The current time is {}.", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if !notes.is_empty() {
            sections.push(format!(
                "<additional_information>\n{}\n</additional_information>",
                notes.iter().map(|n| format!("- {}", n)).collect::<Vec<_>>().join("\n")
            ));
        }

        if self.flags.enable_user_memories && self.store.is_some() {
            if memories.is_empty() {
                sections.push(
                    "You have no memories about this user yet. Use `update_user_memory` to save facts worth remembering."
                        .to_string(),
                );
            } else {
                sections.push(format!(
                    "You have access to memories from previous interactions with this user:\n<memories_from_previous_interactions>\n{}\n</memories_from_previous_interactions>\nUse `update_user_memory` to save new facts.",
                    memories.iter().map(|m| format!("- {}", m.memory)).collect::<Vec<_>>().join("\n")
                ));
            }
        }

        if self.flags.enable_session_summaries {
            if let Some(summary) = session.and_then(|s| s.summary.as_ref()) {
                sections.push(format!(
                    "Here is a brief summary of your previous interactions:\n<summary_of_previous_interactions>\n{}\n</summary_of_previous_interactions>",
                    summary.summary
                ));
            }
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Messages of the last `num_history_runs` runs of this component in the session.
    pub(super) fn history_messages(&self, session: Option<&SessionRecord>) -> Vec<Message> {
        if !self.flags.add_history_to_context || self.flags.num_history_runs == 0 {
            return Vec::new();
        }
        let Some(session) = session else {
            return Vec::new();
        };

        let runs: Vec<_> = session.runs.iter().filter(|r| r.component_id == self.id).collect();
        let skip = runs.len().saturating_sub(self.flags.num_history_runs);
        runs.into_iter()
            .skip(skip)
            .flat_map(|r| r.messages.iter().filter(|m| m.role != Role::System).cloned())
            .collect()
    }

    /// Full request messages for a run: system, history, then the new input.
    pub(super) fn build_messages(
        &self,
        ctx: &RunContext,
        session: Option<&SessionRecord>,
        memories: &[UserMemory],
        input: &str,
    ) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(system) = self.system_prompt(ctx, session, memories) {
            messages.push(Message::system(system));
        }
        messages.extend(self.history_messages(session));
        messages.push(Message::user(input));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentFlags;
    use crate::model::scripted::ScriptedModel;
    use crate::storage::{ComponentKind, RunMetrics, RunRecord, SessionStore, SessionSummary};
    use std::sync::{Arc, Mutex};

    fn ctx() -> RunContext {
        RunContext {
            run_id: "run_1".to_string(),
            session_id: "session_abcd1234".to_string(),
            user_id: Some("user_1234abcd".to_string()),
            component_id: "assistant".to_string(),
            store: None,
            child_runs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn agent() -> Agent {
        Agent::new("Assistant", Arc::new(ScriptedModel::new(vec![])))
    }

    fn run(component_id: &str, input: &str) -> RunRecord {
        RunRecord {
            run_id: input.to_string(),
            component_id: component_id.to_string(),
            parent_run_id: None,
            input: input.to_string(),
            content: format!("re: {}", input),
            messages: vec![Message::user(input), Message::assistant(format!("re: {}", input))],
            tool_calls: Vec::new(),
            metrics: RunMetrics::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_instructions_are_templated() {
        let agent = agent().with_instructions(vec![
            "You are talking to {{user_id}}".to_string(),
            "Session: {{session_id}}".to_string(),
        ]);
        let prompt = agent.system_prompt(&ctx(), None, &[]).unwrap();
        assert!(prompt.contains("- You are talking to user_1234abcd"));
        assert!(prompt.contains("- Session: session_abcd1234"));
    }

    #[test]
    fn test_no_system_prompt_when_empty() {
        assert!(agent().system_prompt(&ctx(), None, &[]).is_none());
        let messages = agent().build_messages(&ctx(), None, &[], "hi");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn test_flags_add_sections() {
        let agent = agent()
            .with_role(Some("Research the web".to_string()))
            .with_flags(AgentFlags {
                markdown: true,
                add_datetime_to_context: true,
                enable_session_summaries: true,
                ..AgentFlags::default()
            });
        let mut session = SessionRecord::new("s", None, "assistant", ComponentKind::Agent);
        session.summary = Some(SessionSummary {
            summary: "Talked about stocks".to_string(),
            updated_at: Utc::now(),
        });

        let prompt = agent.system_prompt(&ctx(), Some(&session), &[]).unwrap();
        assert!(prompt.contains("<your_role>\nResearch the web\n</your_role>"));
        assert!(prompt.contains("markdown"));
        assert!(prompt.contains("The current time is"));
        assert!(prompt.contains("Talked about stocks"));
    }

    #[test]
    fn test_memories_need_store() {
        let memory = UserMemory {
            id: "m".to_string(),
            user_id: "u".to_string(),
            memory: "Likes tables".to_string(),
            topics: Vec::new(),
            created_at: Utc::now(),
        };
        let flags = AgentFlags {
            enable_user_memories: true,
            ..AgentFlags::default()
        };

        let without_store = agent().with_flags(flags.clone());
        assert!(without_store.system_prompt(&ctx(), None, &[memory.clone()]).is_none());

        let with_store = agent()
            .with_flags(flags)
            .with_store(Arc::new(SessionStore::in_memory().unwrap()));
        let prompt = with_store.system_prompt(&ctx(), None, &[memory]).unwrap();
        assert!(prompt.contains("- Likes tables"));
    }

    #[test]
    fn test_history_keeps_last_runs_of_component() {
        let agent = agent().with_flags(AgentFlags {
            add_history_to_context: true,
            num_history_runs: 2,
            ..AgentFlags::default()
        });
        let mut session = SessionRecord::new("s", None, "assistant", ComponentKind::Agent);
        session.runs = vec![
            run("assistant", "one"),
            run("writer", "member"),
            run("assistant", "two"),
            run("assistant", "three"),
        ];

        let history = agent.history_messages(Some(&session));
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "re: two", "three", "re: three"]);

        let disabled = agent.clone().with_flags(AgentFlags::default());
        assert!(disabled.history_messages(Some(&session)).is_empty());
    }
}
