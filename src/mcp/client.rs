//! A connected MCP server session.

use super::protocol::{
    CallToolResult, InitializeParams, InitializeResult, JsonRpcRequest, McpToolInfo, ToolsListResult,
};
use super::transport::McpTransport;
use crate::error::{Result, TroupeError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Upper bound on `tools/list` pages.
const MAX_LIST_PAGES: usize = 20;

/// Client for one MCP server. Requests are serialized over the transport.
pub struct McpClient {
    server: String,
    transport: Mutex<Box<dyn McpTransport>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    server_info: Option<String>,
    tools: Vec<McpToolInfo>,
}

impl McpClient {
    /// Run the handshake (`initialize`, `notifications/initialized`) and list the tools.
    ///
    /// The transport is closed when the handshake fails.
    #[instrument(skip(transport))]
    pub async fn connect(server: &str, transport: Box<dyn McpTransport>) -> Result<Self> {
        let mut client = Self {
            server: server.to_string(),
            transport: Mutex::new(transport),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            server_info: None,
            tools: Vec::new(),
        };

        match client.handshake().await {
            Ok(()) => {
                info!("Connected to MCP server {} ({} tools)", client.server, client.tools.len());
                Ok(client)
            }
            Err(e) => {
                if let Err(close_err) = client.close().await {
                    warn!("Failed to close MCP server {}: {}", client.server, close_err);
                }
                Err(e)
            }
        }
    }

    async fn handshake(&mut self) -> Result<()> {
        let init = self
            .request("initialize", Some(serde_json::to_value(InitializeParams::default())?))
            .await?;
        let init: InitializeResult = serde_json::from_value(init)?;
        debug!("MCP server {} speaks protocol {}", self.server, init.protocol_version);
        self.server_info = init.server_info.map(|i| format!("{} {}", i.name, i.version).trim().to_string());

        self.transport
            .lock()
            .await
            .send(&JsonRpcRequest::notification("notifications/initialized"))
            .await?;

        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page: ToolsListResult = serde_json::from_value(self.request("tools/list", params).await?)?;
            self.tools.extend(page.tools);
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(())
    }

    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.is_closed() {
            return Err(TroupeError::Mcp(format!("MCP server '{}' is closed", self.server)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let response = self.transport.lock().await.request(&request).await?;
        response
            .into_result()
            .map_err(|e| TroupeError::Mcp(format!("{} {}: {}", self.server, method, e)))
    }

    pub fn name(&self) -> &str {
        &self.server
    }

    /// `name version` reported by the server, if any.
    pub fn server_info(&self) -> Option<&str> {
        self.server_info.as_deref()
    }

    pub fn tools(&self) -> &[McpToolInfo] {
        &self.tools
    }

    /// Call a remote tool and return its flattened text content.
    #[instrument(skip(self, arguments), fields(server = %self.server))]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", Some(json!({ "name": name, "arguments": arguments })))
            .await?;
        let result: CallToolResult = serde_json::from_value(result)?;
        let text = result.text();
        if result.is_error {
            return Err(TroupeError::Tool(format!("{}: {}", name, text)));
        }
        Ok(text)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the connection. Only the first call reaches the transport.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing MCP server {}", self.server);
        self.transport.lock().await.close().await
    }
}
