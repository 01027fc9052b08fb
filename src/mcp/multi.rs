//! Several MCP servers exposed as one set of tools.

use super::client::McpClient;
use super::protocol::McpToolInfo;
use super::transport::{McpServerSpec, McpTransport, StdioTransport};
use crate::error::{Result, TroupeError};
use crate::tools::Tool;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Default connection timeout per server.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// A remote tool served over MCP.
pub struct McpTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
}

impl McpTool {
    pub fn server(&self) -> &str {
        self.client.name()
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        self.info.description.as_deref().unwrap_or_default()
    }

    fn parameters(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        self.client.call_tool(&self.info.name, args).await
    }
}

/// Open connections to a set of MCP servers.
pub struct MultiMcpTools {
    clients: Vec<Arc<McpClient>>,
    failed: Vec<(String, String)>,
}

impl MultiMcpTools {
    /// Launch every server over stdio. Any failure aborts and closes the
    /// connections that were already opened.
    pub async fn connect(specs: &[McpServerSpec], timeout: Duration) -> Result<Self> {
        Self::connect_with(specs, timeout, false, |spec| {
            Ok(Box::new(StdioTransport::spawn(spec)?) as Box<dyn McpTransport>)
        })
        .await
    }

    /// Connect with an explicit partial failure policy and transport factory.
    #[instrument(skip_all, fields(servers = specs.len()))]
    pub async fn connect_with<F>(
        specs: &[McpServerSpec],
        timeout: Duration,
        allow_partial_failure: bool,
        open: F,
    ) -> Result<Self>
    where
        F: Fn(&McpServerSpec) -> Result<Box<dyn McpTransport>>,
    {
        let mut tools = Self {
            clients: Vec::with_capacity(specs.len()),
            failed: Vec::new(),
        };

        for spec in specs {
            let attempt = async {
                let transport = open(spec)?;
                McpClient::connect(&spec.name, transport).await
            };
            let result = match tokio::time::timeout(timeout, attempt).await {
                Ok(result) => result,
                Err(_) => Err(TroupeError::Mcp(format!(
                    "Timed out after {}s connecting to MCP server '{}'",
                    timeout.as_secs_f32(),
                    spec.name
                ))),
            };

            match result {
                Ok(client) => tools.clients.push(Arc::new(client)),
                Err(e) if allow_partial_failure => {
                    warn!("Skipping MCP server {}: {}", spec.name, e);
                    tools.failed.push((spec.name.clone(), e.to_string()));
                }
                Err(e) => {
                    if let Err(close_err) = tools.close().await {
                        warn!("Failed to close MCP servers after error: {}", close_err);
                    }
                    return Err(e);
                }
            }
        }

        info!("Connected to {} MCP server(s)", tools.clients.len());
        Ok(tools)
    }

    /// Connect, run `f`, and close every connection whatever `f` returned.
    pub async fn scoped<F, Fut, T>(specs: &[McpServerSpec], timeout: Duration, f: F) -> Result<T>
    where
        F: FnOnce(Arc<MultiMcpTools>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let tools = Arc::new(Self::connect(specs, timeout).await?);
        Self::run_scoped(tools, f).await
    }

    async fn run_scoped<F, Fut, T>(tools: Arc<MultiMcpTools>, f: F) -> Result<T>
    where
        F: FnOnce(Arc<MultiMcpTools>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = f(tools.clone()).await;
        let closed = tools.close().await;
        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!("Failed to close MCP servers: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Every remote tool, in server order.
    pub fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.clients.iter().flat_map(|c| Self::client_tools(c)).collect()
    }

    /// Tools of a single server.
    pub fn tools_for(&self, server: &str) -> Vec<Arc<dyn Tool>> {
        self.clients
            .iter()
            .filter(|c| c.name() == server)
            .flat_map(|c| Self::client_tools(c))
            .collect()
    }

    fn client_tools(client: &Arc<McpClient>) -> Vec<Arc<dyn Tool>> {
        client
            .tools()
            .iter()
            .map(|info| {
                Arc::new(McpTool {
                    client: client.clone(),
                    info: info.clone(),
                }) as Arc<dyn Tool>
            })
            .collect()
    }

    pub fn clients(&self) -> &[Arc<McpClient>] {
        &self.clients
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    /// Servers skipped under a partial failure policy, with the reason.
    pub fn failed(&self) -> &[(String, String)] {
        &self.failed
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Close every connection. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for client in &self.clients {
            if let Err(e) = client.close().await {
                warn!("Failed to close MCP server {}: {}", client.name(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::super::transport::fake::{FakeLog, FakeTransport};
    use super::*;

    fn spec(name: &str) -> McpServerSpec {
        McpServerSpec {
            name: name.to_string(),
            program: "fake".to_string(),
            ..McpServerSpec::default()
        }
    }

    async fn connect_fakes(
        names: &[&str],
        log: &Arc<FakeLog>,
        broken: Option<&str>,
        allow_partial_failure: bool,
    ) -> Result<MultiMcpTools> {
        let specs: Vec<McpServerSpec> = names.iter().map(|n| spec(n)).collect();
        let broken = broken.map(str::to_string);
        MultiMcpTools::connect_with(&specs, Duration::from_secs(5), allow_partial_failure, |spec| {
            let mut transport = FakeTransport::new(&[format!("{}_search", spec.name).as_str()], log.clone());
            transport.fail_initialize = broken.as_deref() == Some(spec.name.as_str());
            Ok(Box::new(transport) as Box<dyn McpTransport>)
        })
        .await
    }

    #[tokio::test]
    async fn test_tools_from_all_servers() {
        let log = Arc::new(FakeLog::default());
        let tools = connect_fakes(&["github", "perplexity"], &log, None, false).await.unwrap();

        let names: Vec<String> = tools.tools().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["github_search", "perplexity_search"]);
        assert_eq!(tools.tools_for("perplexity").len(), 1);

        let result = tools.tools()[0].invoke(serde_json::json!({"q": "rust"})).await.unwrap();
        assert!(result.starts_with("github_search"));
    }

    #[tokio::test]
    async fn test_failure_closes_opened_connections() {
        let log = Arc::new(FakeLog::default());
        let result = connect_fakes(&["github", "perplexity", "mapbox"], &log, Some("perplexity"), false).await;

        assert!(result.is_err());
        // github was opened then torn down; perplexity closed itself after the failed handshake.
        assert_eq!(log.close_count(), 2);
        // mapbox was never started.
        assert_eq!(log.methods().len(), 4);
    }

    #[tokio::test]
    async fn test_partial_failure_policy_skips_server() {
        let log = Arc::new(FakeLog::default());
        let tools = connect_fakes(&["github", "perplexity"], &log, Some("perplexity"), true)
            .await
            .unwrap();

        assert_eq!(tools.server_names(), vec!["github"]);
        assert_eq!(tools.failed()[0].0, "perplexity");
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let log = Arc::new(FakeLog::default());
        let result = MultiMcpTools::connect_with(&[spec("slow")], Duration::from_millis(50), false, |_| {
            let mut transport = FakeTransport::new(&[], log.clone());
            transport.hang = true;
            Ok(Box::new(transport) as Box<dyn McpTransport>)
        })
        .await;

        let err = result.err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("Timed out"));
    }

    #[tokio::test]
    async fn test_scoped_teardown_runs_once_on_success_and_failure() {
        let log = Arc::new(FakeLog::default());
        let tools = Arc::new(connect_fakes(&["github"], &log, None, false).await.unwrap());
        let value = MultiMcpTools::run_scoped(tools.clone(), |t| async move { Ok(t.tools().len()) })
            .await
            .unwrap();
        assert_eq!(value, 1);
        assert_eq!(log.close_count(), 1);

        let log = Arc::new(FakeLog::default());
        let tools = Arc::new(connect_fakes(&["github"], &log, None, false).await.unwrap());
        let result: Result<()> =
            MultiMcpTools::run_scoped(tools.clone(), |_| async { Err(TroupeError::Agent("work failed".to_string())) })
                .await;
        assert!(matches!(result, Err(TroupeError::Agent(_))));
        assert_eq!(log.close_count(), 1);

        tools.close().await.unwrap();
        assert_eq!(log.close_count(), 1);
    }

    #[tokio::test]
    async fn test_scoped_connects_runs_and_reports() {
        let value = MultiMcpTools::scoped(&[], Duration::from_secs(1), |tools| async move {
            assert!(tools.server_names().is_empty());
            Ok(tools.tools().len() + 7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);

        let result: Result<()> = MultiMcpTools::scoped(&[], Duration::from_secs(1), |_| async {
            Err(TroupeError::Agent("work failed".to_string()))
        })
        .await;
        assert!(matches!(result, Err(TroupeError::Agent(_))));

        let missing = McpServerSpec {
            name: "ghost".to_string(),
            program: "troupe-test-no-such-program".to_string(),
            ..McpServerSpec::default()
        };
        let ran = std::sync::atomic::AtomicBool::new(false);
        let result = MultiMcpTools::scoped(&[missing], Duration::from_secs(1), |_| async {
            ran.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(TroupeError::Mcp(_))));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }
}
