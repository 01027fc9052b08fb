//! Teams: a coordinator agent that delegates work to member agents.
//!
//! The coordinator runs the ordinary agent loop. Its extra tool,
//! `delegate_task_to_member`, runs a member in the same session and hands the
//! member's answer back to the coordinator. Which members are asked, and in
//! which order, is left to the coordinator's model.

use crate::agent::{Agent, AgentInfo, ParentRun, RunContext, RunEvent, RunOptions, RunOutput, RunToolProvider};
use crate::config::Prompts;
use crate::error::{Result, TroupeError};
use crate::storage::ComponentKind;
use crate::tools::{required_str, Tool};
use async_trait::async_trait;
use futures::Stream;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::info;

/// Name of the delegation tool given to coordinators.
pub const DELEGATE_TOOL: &str = "delegate_task_to_member";

/// A coordinator bound to its members. Cheap to clone.
#[derive(Clone)]
pub struct Team {
    coordinator: Agent,
    members: Arc<Vec<Agent>>,
}

impl Team {
    /// Turn `coordinator` into the leader of `members`.
    pub fn new(coordinator: Agent, members: Vec<Agent>, prompts: &Prompts) -> Result<Self> {
        if members.is_empty() {
            return Err(TroupeError::Team(format!("Team {} has no members", coordinator.name())));
        }
        let mut seen = HashSet::new();
        for member in &members {
            if !seen.insert(member.id()) {
                return Err(TroupeError::Team(format!(
                    "Team {} lists member {} twice",
                    coordinator.name(),
                    member.id()
                )));
            }
        }

        let roster = members
            .iter()
            .map(|m| match m.role() {
                Some(role) => format!("- {} ({}): {}", m.id(), m.name(), role),
                None => format!("- {} ({})", m.id(), m.name()),
            })
            .collect::<Vec<_>>()
            .join("\n");
        let vars = HashMap::from([
            ("team_name".to_string(), coordinator.name().to_string()),
            ("members".to_string(), roster),
        ]);
        let addendum = prompts.render_with_custom(&prompts.team.coordinator, &vars);

        let members = Arc::new(members);
        let coordinator = coordinator
            .as_team(addendum)
            .with_run_tools(Arc::new(Delegation {
                members: members.clone(),
            }));
        info!("Built team {} with {} member(s)", coordinator.id(), members.len());

        Ok(Self { coordinator, members })
    }

    pub fn id(&self) -> &str {
        self.coordinator.id()
    }

    pub fn name(&self) -> &str {
        self.coordinator.name()
    }

    pub fn coordinator(&self) -> &Agent {
        &self.coordinator
    }

    pub fn members(&self) -> &[Agent] {
        &self.members
    }

    pub fn member(&self, id: &str) -> Option<&Agent> {
        find_member(&self.members, id)
    }

    pub fn info(&self) -> AgentInfo {
        let mut info = self.coordinator.info();
        info.kind = ComponentKind::Team;
        info.members = self.members.iter().map(|m| m.id().to_string()).collect();
        info
    }

    pub async fn run(&self, input: &str, options: RunOptions) -> Result<RunOutput> {
        self.coordinator.run(input, options).await
    }

    pub fn run_stream(
        &self,
        input: &str,
        options: RunOptions,
    ) -> impl Stream<Item = Result<RunEvent>> + Send + 'static {
        self.coordinator.run_stream(input, options)
    }
}

fn find_member<'a>(members: &'a [Agent], id: &str) -> Option<&'a Agent> {
    members
        .iter()
        .find(|m| m.id() == id)
        .or_else(|| members.iter().find(|m| m.name().eq_ignore_ascii_case(id)))
}

/// Gives each coordinator run a delegation tool bound to that run.
struct Delegation {
    members: Arc<Vec<Agent>>,
}

impl RunToolProvider for Delegation {
    fn tools_for_run(&self, ctx: &RunContext) -> Vec<Arc<dyn Tool>> {
        vec![Arc::new(DelegateTool {
            members: self.members.clone(),
            parent: ParentRun {
                run_id: ctx.run_id.clone(),
                child_runs: ctx.child_runs.clone(),
            },
            options: RunOptions {
                user_id: ctx.user_id.clone(),
                session_id: Some(ctx.session_id.clone()),
            },
        })]
    }
}

struct DelegateTool {
    members: Arc<Vec<Agent>>,
    parent: ParentRun,
    options: RunOptions,
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        DELEGATE_TOOL
    }

    fn description(&self) -> &str {
        "Send a task to a team member and get their answer back."
    }

    fn parameters(&self) -> Value {
        let ids: Vec<&str> = self.members.iter().map(|m| m.id()).collect();
        json!({
            "type": "object",
            "properties": {
                "member_id": {
                    "type": "string",
                    "enum": ids,
                    "description": "Id of the member to delegate to"
                },
                "task": {
                    "type": "string",
                    "description": "A clear, self-contained description of the work"
                }
            },
            "required": ["member_id", "task"]
        })
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let member_id = required_str(&args, "member_id")?;
        let task = required_str(&args, "task")?;
        let member = find_member(&self.members, member_id).ok_or_else(|| {
            TroupeError::InvalidArgument(format!(
                "Unknown member '{}' (members: {})",
                member_id,
                self.members.iter().map(|m| m.id()).collect::<Vec<_>>().join(", ")
            ))
        })?;

        info!("Delegating to {}: {}", member.id(), task);
        let output = member
            .run_inner(task, self.options.clone(), Some(self.parent.clone()))
            .await?;
        Ok(output.content)
    }
}
