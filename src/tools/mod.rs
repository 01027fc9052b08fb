//! Tools that agents can call.
//!
//! Built-in toolkits and MCP tools share the [`Tool`] trait and are handed to
//! agents through a [`ToolRegistry`].

mod finance;
mod github;
mod math;
mod web_search;

pub use finance::{FinanceTool, FinanceToolKind};
pub use github::{GithubClient, GithubOperation, GithubTool};
pub use math::{factorial, FactorialTool};
pub use web_search::WebSearchTool;

use crate::config::{EnvSnapshot, GITHUB_TOKEN_ENV};
use crate::error::{Result, TroupeError};
use crate::model::ToolDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A callable capability exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    /// Run the tool with parsed arguments and return text for the model.
    async fn invoke(&self, args: Value) -> Result<String>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Result of a tool invocation as seen by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

/// Ordered collection of tools with unique names.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; names must be unique.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        if self.get(tool.name()).is_some() {
            return Err(TroupeError::Config(format!("Duplicate tool name: {}", tool.name())));
        }
        self.tools.push(tool);
        Ok(())
    }

    pub fn extend<I>(&mut self, tools: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        for tool in tools {
            self.register(tool)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Invoke a tool by name with raw JSON arguments.
    ///
    /// Unknown tools, malformed arguments and tool failures are reported back
    /// as error text so the model can react to them.
    pub async fn invoke(&self, name: &str, raw_args: &str) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            warn!("Model requested unknown tool: {}", name);
            return ToolOutcome {
                content: format!("Error: unknown tool '{}'", name),
                is_error: true,
            };
        };

        let args: Value = if raw_args.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(raw_args) {
                Ok(args) => args,
                Err(e) => {
                    return ToolOutcome {
                        content: format!("Error: invalid arguments for '{}': {}", name, e),
                        is_error: true,
                    }
                }
            }
        };

        debug!("Invoking tool {} with {}", name, args);
        match tool.invoke(args).await {
            Ok(content) => ToolOutcome {
                content,
                is_error: false,
            },
            Err(e) => {
                warn!("Tool {} failed: {}", name, e);
                ToolOutcome {
                    content: format!("Error: {}", e),
                    is_error: true,
                }
            }
        }
    }
}

/// Names accepted in an agent's `tools` list.
pub const BUILTIN_TOOLKITS: &[&str] = &["factorial", "web_search", "finance", "github"];

/// Build the tools of a built-in toolkit.
pub fn builtin_toolkit(name: &str, http: &reqwest::Client, env: &EnvSnapshot) -> Result<Vec<Arc<dyn Tool>>> {
    let tools: Vec<Arc<dyn Tool>> = match name {
        "factorial" | "math" => vec![Arc::new(FactorialTool)],
        "web_search" | "duckduckgo" => vec![Arc::new(WebSearchTool::new(http.clone()))],
        "finance" | "yfinance" => FinanceToolKind::ALL
            .iter()
            .map(|kind| Arc::new(FinanceTool::new(*kind, http.clone())) as Arc<dyn Tool>)
            .collect(),
        "github" => {
            let token = env
                .get(GITHUB_TOKEN_ENV)
                .ok_or_else(|| TroupeError::MissingEnv(vec![GITHUB_TOKEN_ENV.to_string()]))?;
            let client = Arc::new(GithubClient::new(http.clone(), token));
            GithubOperation::ALL
                .iter()
                .map(|op| Arc::new(GithubTool::new(*op, client.clone())) as Arc<dyn Tool>)
                .collect()
        }
        other => {
            return Err(TroupeError::Config(format!(
                "Unknown toolkit '{}' (available: {})",
                other,
                BUILTIN_TOOLKITS.join(", ")
            )))
        }
    };
    Ok(tools)
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| TroupeError::InvalidArgument(format!("Missing '{}' argument", key)))
}
