//! Configuration module for Troupe.
//!
//! Handles loading settings, checking required environment variables and prompt templates.

mod env;
mod prompts;
mod settings;

pub use env::{expand_env, EnvRequirements, EnvSnapshot, GITHUB_TOKEN_ENV};
pub use prompts::{Prompts, SummaryPrompts, TeamPrompts};
pub use settings::{
    slugify, AgentFlags, AgentSettings, CliSettings, DatabaseSettings, GeneralSettings, McpServerSettings,
    McpSettings, ModelSettings, PromptSettings, ServerSettings, Settings, TeamSettings,
};
