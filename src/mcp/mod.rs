//! MCP (Model Context Protocol) client.
//!
//! Launches tool servers as child processes and speaks JSON-RPC 2.0 with
//! them over stdio. Their tools are exposed to agents through [`McpTool`].

mod client;
mod multi;
mod protocol;
mod transport;

pub use client::McpClient;
pub use multi::{McpTool, MultiMcpTools, DEFAULT_CONNECT_TIMEOUT_SECS};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpToolInfo, PROTOCOL_VERSION};
pub use transport::{McpServerSpec, McpTransport, StdioTransport};
