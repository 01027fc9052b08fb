//! Transports carrying JSON-RPC messages to an MCP server.

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::config::{expand_env, McpServerSettings};
use crate::error::{Result, TroupeError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

/// Maximum bytes for a single JSON-RPC response line.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Timeout for a single request once connected.
const RECV_TIMEOUT_SECS: u64 = 120;

/// Grace period for a server to exit after its stdin is closed.
const EXIT_GRACE_MS: u64 = 2000;

/// A server launched as a child process.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct McpServerSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub required_env: Vec<String>,
}

impl McpServerSpec {
    /// Build a spec from settings, splitting a full command line into program and
    /// arguments and expanding `${VAR}` references in the environment values.
    pub fn from_settings(settings: &McpServerSettings) -> Result<Self> {
        let mut parts = settings.command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| TroupeError::Config(format!("MCP server '{}' has no command", settings.name)))?;
        let mut args: Vec<String> = parts.collect();
        args.extend(settings.args.iter().cloned());

        let mut env = HashMap::with_capacity(settings.env.len());
        for (key, value) in &settings.env {
            env.insert(key.clone(), expand_env(value)?);
        }

        Ok(Self {
            name: settings.name.clone(),
            program,
            args,
            env,
            required_env: settings.required_env.clone(),
        })
    }

    /// The command line as typed.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Abstract transport for MCP communication.
#[async_trait]
pub trait McpTransport: Send {
    /// Send a message that expects no response.
    async fn send(&mut self, message: &JsonRpcRequest) -> Result<()>;

    /// Send a request and wait for its response.
    async fn request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Close the connection.
    async fn close(&mut self) -> Result<()>;
}

/// Stdio-based transport (spawn local process).
pub struct StdioTransport {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    recv_timeout: Duration,
}

impl StdioTransport {
    pub fn spawn(spec: &McpServerSpec) -> Result<Self> {
        debug!("Spawning MCP server {}: {}", spec.name, spec.command_line());

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TroupeError::Mcp(format!("Failed to spawn MCP server '{}': {}", spec.name, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TroupeError::Mcp(format!("No stdin on MCP server '{}'", spec.name)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TroupeError::Mcp(format!("No stdout on MCP server '{}'", spec.name)))?;

        Ok(Self {
            name: spec.name.clone(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            recv_timeout: Duration::from_secs(RECV_TIMEOUT_SECS),
        })
    }

    async fn send_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| TroupeError::Mcp(format!("MCP server '{}' is closed", self.name)))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn recv_line(&mut self) -> Result<String> {
        read_line_bounded(&mut self.stdout, MAX_LINE_BYTES)
            .await?
            .ok_or_else(|| TroupeError::Mcp(format!("MCP server '{}' closed stdout", self.name)))
    }
}

/// Read one `\n` terminated line, failing as soon as it grows past `max` bytes
/// instead of buffering it whole. `None` at end of input.
async fn read_line_bounded<R>(reader: &mut R, max: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }

        let (content, consumed, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i, i + 1, true),
            None => (available.len(), available.len(), false),
        };
        if line.len() + content > max {
            return Err(TroupeError::Mcp(format!("MCP response exceeds {} bytes", max)));
        }
        line.extend_from_slice(&available[..content]);
        reader.consume(consumed);
        if done {
            break;
        }
    }

    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map(Some)
        .map_err(|e| TroupeError::Mcp(format!("MCP response is not UTF-8: {}", e)))
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn send(&mut self, message: &JsonRpcRequest) -> Result<()> {
        let line = serde_json::to_string(message)?;
        self.send_line(&line).await
    }

    async fn request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = request
            .id
            .ok_or_else(|| TroupeError::Mcp("Requests need an id".to_string()))?;
        self.send(request).await?;

        let deadline = tokio::time::Instant::now() + self.recv_timeout;
        loop {
            let line = tokio::time::timeout_at(deadline, self.recv_line())
                .await
                .map_err(|_| {
                    TroupeError::Mcp(format!("Timeout waiting for '{}' from MCP server '{}'", request.method, self.name))
                })??;

            let response: JsonRpcResponse = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    debug!("MCP {}: skipping non JSON-RPC output: {}", self.name, line);
                    continue;
                }
            };
            if response.answers(id) {
                return Ok(response);
            }
            debug!("MCP {}: skipping message while waiting for response {}", self.name, id);
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }
        match tokio::time::timeout(Duration::from_millis(EXIT_GRACE_MS), self.child.wait()).await {
            Ok(Ok(status)) => debug!("MCP server {} exited with {}", self.name, status),
            _ => {
                warn!("MCP server {} did not exit, killing it", self.name);
                let _ = self.child.kill().await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-process server used by tests.

    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared observations of a fake server.
    #[derive(Default)]
    pub(crate) struct FakeLog {
        pub closes: AtomicUsize,
        pub methods: Mutex<Vec<String>>,
    }

    impl FakeLog {
        pub fn close_count(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }

        pub fn methods(&self) -> Vec<String> {
            self.methods.lock().unwrap().clone()
        }
    }

    /// Answers `initialize`, `tools/list` and `tools/call` for a fixed tool list.
    pub(crate) struct FakeTransport {
        pub tools: Vec<Value>,
        pub log: Arc<FakeLog>,
        pub fail_initialize: bool,
        pub hang: bool,
    }

    impl FakeTransport {
        pub fn new(tool_names: &[&str], log: Arc<FakeLog>) -> Self {
            Self {
                tools: tool_names
                    .iter()
                    .map(|name| json!({"name": name, "description": format!("{} tool", name), "inputSchema": {"type": "object"}}))
                    .collect(),
                log,
                fail_initialize: false,
                hang: false,
            }
        }
    }

    #[async_trait]
    impl McpTransport for FakeTransport {
        async fn send(&mut self, message: &JsonRpcRequest) -> Result<()> {
            self.log.methods.lock().unwrap().push(message.method.clone());
            Ok(())
        }

        async fn request(&mut self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
            self.log.methods.lock().unwrap().push(request.method.clone());
            if self.hang {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }

            let body = match request.method.as_str() {
                "initialize" if self.fail_initialize => {
                    json!({"id": request.id, "error": {"code": -32603, "message": "boom"}})
                }
                "initialize" => json!({
                    "id": request.id,
                    "result": {"protocolVersion": "2024-11-05", "serverInfo": {"name": "fake", "version": "1"}}
                }),
                "tools/list" => json!({"id": request.id, "result": {"tools": self.tools}}),
                "tools/call" => {
                    let params = request.params.clone().unwrap_or_default();
                    let name = params["name"].as_str().unwrap_or_default().to_string();
                    if name == "explode" {
                        json!({"id": request.id, "result": {"content": [{"type": "text", "text": "it broke"}], "isError": true}})
                    } else {
                        json!({"id": request.id, "result": {"content": [{"type": "text", "text": format!("{} -> {}", name, params["arguments"])}]}})
                    }
                }
                other => json!({"id": request.id, "error": {"code": -32601, "message": format!("Unknown method {}", other)}}),
            };
            Ok(serde_json::from_value(body)?)
        }

        async fn close(&mut self) -> Result<()> {
            self.log.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_bounded() {
        let mut input: &[u8] = b"{\"id\":1}\r\nsecond\ntail";
        assert_eq!(read_line_bounded(&mut input, 64).await.unwrap().as_deref(), Some("{\"id\":1}"));
        assert_eq!(read_line_bounded(&mut input, 64).await.unwrap().as_deref(), Some("second"));
        assert_eq!(read_line_bounded(&mut input, 64).await.unwrap().as_deref(), Some("tail"));
        assert!(read_line_bounded(&mut input, 64).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_bounded_rejects_long_lines() {
        let long = format!("{}\n", "x".repeat(100));
        let mut reader = BufReader::with_capacity(8, long.as_bytes());
        let err = read_line_bounded(&mut reader, 32).await.unwrap_err();
        assert!(err.to_string().contains("exceeds 32 bytes"));

        let mut exact: &[u8] = b"0123456789\n";
        assert_eq!(read_line_bounded(&mut exact, 10).await.unwrap().as_deref(), Some("0123456789"));
    }

    #[test]
    fn test_spec_splits_command_line() {
        let settings = McpServerSettings {
            name: "github".to_string(),
            command: "npx -y @modelcontextprotocol/server-github".to_string(),
            args: vec!["--verbose".to_string()],
            env: HashMap::from([("TOKEN".to_string(), "literal".to_string())]),
            required_env: vec!["GITHUB_PERSONAL_ACCESS_TOKEN".to_string()],
        };
        let spec = McpServerSpec::from_settings(&settings).unwrap();
        assert_eq!(spec.program, "npx");
        assert_eq!(spec.args, vec!["-y", "@modelcontextprotocol/server-github", "--verbose"]);
        assert_eq!(spec.env["TOKEN"], "literal");
        assert_eq!(spec.command_line(), "npx -y @modelcontextprotocol/server-github --verbose");
    }

    #[test]
    fn test_spec_rejects_unset_env_reference() {
        let settings = McpServerSettings {
            name: "perplexity".to_string(),
            command: "npx -y server-perplexity-ask".to_string(),
            env: HashMap::from([(
                "PERPLEXITY_API_KEY".to_string(),
                "${TROUPE_TEST_UNSET_PERPLEXITY_KEY}".to_string(),
            )]),
            ..McpServerSettings::default()
        };
        assert!(matches!(
            McpServerSpec::from_settings(&settings),
            Err(TroupeError::MissingEnv(_))
        ));
    }

    #[tokio::test]
    async fn test_stdio_spawn_failure_is_reported() {
        let spec = McpServerSpec {
            name: "ghost".to_string(),
            program: "/nonexistent/troupe-mcp-server".to_string(),
            ..McpServerSpec::default()
        };
        let err = StdioTransport::spawn(&spec).err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("ghost"));
    }
}
