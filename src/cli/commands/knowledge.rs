//! Knowledge base commands.

use super::open_store;
use crate::cli::output::content_preview;
use crate::cli::{KnowledgeAction, Output};
use crate::config::Settings;
use std::path::Path;

/// Run a knowledge subcommand.
pub fn run_knowledge(action: &KnowledgeAction, settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    match action {
        KnowledgeAction::Add { source, name, text } => {
            let (name, content) = if *text {
                let name = name
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("--name is required with --text"))?;
                (name, source.clone())
            } else {
                let path = Settings::expand_path(source);
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
                let name = name.clone().unwrap_or_else(|| file_name(&path));
                (name, content)
            };
            if content.trim().is_empty() {
                anyhow::bail!("Refusing to add empty content");
            }

            let entry = store.add_knowledge(&name, &content)?;
            Output::success(&format!("Added '{}' ({} chars, id {})", entry.name, content.len(), entry.id));
        }

        KnowledgeAction::List => {
            let entries = store.list_knowledge()?;
            if entries.is_empty() {
                Output::info("The knowledge base is empty. Add content with: troupe knowledge add <file>");
                return Ok(());
            }
            Output::header(&format!("Knowledge ({})", entries.len()));
            println!();
            for entry in &entries {
                Output::list_item(&format!("{} ({})", entry.name, entry.id));
                println!("    {}", content_preview(&entry.content, 80));
            }
        }

        KnowledgeAction::Remove { id } => {
            if store.remove_knowledge(id)? {
                Output::success(&format!("Removed {}", id));
            } else {
                anyhow::bail!("No knowledge entry with id or name '{}'", id);
            }
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
