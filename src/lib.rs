//! Troupe - agents, teams and MCP tools
//!
//! Declare LLM agents and teams in a TOML file, give them built-in toolkits and
//! tools from MCP servers, and talk to them from the terminal or over HTTP.
//!
//! # Overview
//!
//! - An [`agent::Agent`] runs a model/tool loop with a bounded number of steps,
//!   retries on transient provider errors and streams its progress as events.
//! - A [`team::Team`] is a coordinator agent that delegates tasks to member agents.
//! - Sessions, user memories, metrics and evaluations live in a SQLite
//!   [`storage::SessionStore`].
//! - MCP servers are launched as child processes and spoken to over stdio
//!   ([`mcp::MultiMcpTools`]).
//!
//! # Architecture
//!
//! - `config` - Settings, prompt templates and required environment variables
//! - `model` - Model providers (OpenAI-compatible, Anthropic) behind one trait
//! - `tools` - Tool trait, registry and built-in toolkits
//! - `mcp` - MCP client over stdio
//! - `storage` - SQLite session store
//! - `agent` - The run loop
//! - `team` - Delegation to member agents
//! - `runtime` - Builds everything from settings and owns its lifetime
//! - `server` - HTTP API
//! - `cli` - Terminal front end
//!
//! # Example
//!
//! ```rust,no_run
//! use troupe::agent::RunOptions;
//! use troupe::config::Settings;
//! use troupe::runtime::Runtime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let runtime = Runtime::build(settings).await?;
//!
//!     let target = runtime.target(None)?;
//!     let output = target.run("What is 12 * 7?", RunOptions::default()).await?;
//!     println!("{}", output.content);
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod mcp;
pub mod model;
pub mod openai;
pub mod runtime;
pub mod server;
pub mod storage;
pub mod team;
pub mod tools;

pub use error::{Result, TroupeError};
