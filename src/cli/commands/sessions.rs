//! Session inspection commands.

use super::open_store;
use crate::cli::{Output, SessionsAction};
use crate::config::Settings;
use crate::model::Role;
use crate::storage::SessionFilter;
use console::style;

/// Run a sessions subcommand.
pub fn run_sessions(action: &SessionsAction, settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    match action {
        SessionsAction::List { target, user, limit } => {
            let sessions = store.list_sessions(&SessionFilter {
                component_id: target.clone(),
                user_id: user.clone(),
                limit: Some(*limit),
            })?;
            if sessions.is_empty() {
                Output::info("No sessions stored yet.");
                return Ok(());
            }
            Output::header(&format!("Sessions ({})", sessions.len()));
            println!();
            for session in &sessions {
                Output::session_info(session);
            }
        }

        SessionsAction::Show { session_id } => {
            let session = store
                .get_session(session_id)?
                .ok_or_else(|| anyhow::anyhow!("Session not found: {}", session_id))?;

            Output::header(&format!("Session {}", session.session_id));
            Output::kv("Component", &format!("{} ({})", session.component_id, session.component_kind.as_str()));
            if let Some(user_id) = &session.user_id {
                Output::kv("User", user_id);
            }
            Output::kv("Created", &session.created_at.format("%Y-%m-%d %H:%M:%S").to_string());
            if let Some(summary) = &session.summary {
                Output::kv("Summary", &summary.summary);
            }
            println!();

            for run in &session.runs {
                if let Some(parent) = &run.parent_run_id {
                    println!("{}", style(format!("  [{} for run {}]", run.component_id, parent)).dim());
                    continue;
                }
                for message in &run.messages {
                    match message.role {
                        Role::User => println!("{} {}", style("You:").green().bold(), message.content),
                        Role::Assistant if !message.content.is_empty() => {
                            println!("{} {}\n", style(format!("{}:", run.component_id)).cyan().bold(), message.content)
                        }
                        Role::Tool => Output::tool_call(message.name.as_deref().unwrap_or("tool"), false),
                        _ => {}
                    }
                }
            }
        }

        SessionsAction::Delete { session_id } => {
            if store.delete_session(session_id)? {
                Output::success(&format!("Deleted session {}", session_id));
            } else {
                anyhow::bail!("Session not found: {}", session_id);
            }
        }
    }

    Ok(())
}
