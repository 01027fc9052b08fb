//! CLI module for Troupe.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Troupe - agents, teams and MCP tools
///
/// Declare agents and teams in a TOML file, then chat with them in the terminal
/// or serve them over HTTP.
#[derive(Parser, Debug)]
#[command(name = "troupe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TROUPE_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve agents and teams over HTTP
    Serve {
        /// Host to bind to (defaults to [server] host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to [server] port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Start an interactive chat with an agent or team
    Chat {
        /// Agent or team id (defaults to the first team, else the first agent)
        #[arg(short, long)]
        target: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// User id (generated when omitted)
        #[arg(short, long)]
        user: Option<String>,

        /// Print responses only once they are complete
        #[arg(long)]
        no_stream: bool,
    },

    /// Send a single message and print the answer
    Run {
        /// The message to send
        message: String,

        /// Agent or team id (defaults to the first team, else the first agent)
        #[arg(short, long)]
        target: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// User id
        #[arg(short, long)]
        user: Option<String>,

        /// Print the full run output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Manage knowledge base content
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Run and list evaluations
    Eval {
        #[command(subcommand)]
        action: EvalAction,
    },

    /// Check environment and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SessionsAction {
    /// List sessions, newest first
    List {
        /// Only sessions of this agent or team
        #[arg(short, long)]
        target: Option<String>,

        /// Only sessions of this user
        #[arg(short, long)]
        user: Option<String>,

        /// Maximum number of sessions
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the conversation of a session
    Show {
        session_id: String,
    },

    /// Delete a session
    Delete {
        session_id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Add a file (or inline text) to the knowledge base
    Add {
        /// Path of a text file, or the content itself with --text
        source: String,

        /// Entry name (defaults to the file name)
        #[arg(short, long)]
        name: Option<String>,

        /// Treat SOURCE as the content instead of a path
        #[arg(long)]
        text: bool,
    },

    /// List knowledge entries
    List,

    /// Remove an entry by id or name
    Remove {
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum EvalAction {
    /// Run an agent or team on an input and check the answer
    Run {
        /// The input message
        input: String,

        /// Text the answer must contain (case-insensitive)
        #[arg(short, long)]
        expected: String,

        /// Agent or team id
        #[arg(short, long)]
        target: Option<String>,
    },

    /// List recorded evaluations
    List {
        /// Only evaluations of this agent or team
        #[arg(short, long)]
        target: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the current configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show configuration file path
    Path,
}
