//! Model Context Protocol (MCP) Integration
//!
//! Starts MCP servers over stdio and exposes their tools to flows through
//! the [`ToolProvider`](fast_protocol::ToolProvider) capability.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use std::path::PathBuf;
use thiserror::Error;

/// stdio JSON-RPC client for one server
pub mod client;
/// Server configuration files
pub mod config;
/// Server lifecycle
pub mod manager;
/// Tool registry and argument validation
pub mod registry;

pub use client::McpClient;
pub use config::*;
pub use manager::McpManager;
pub use registry::*;

/// Errors from server configuration and the JSON-RPC transport
#[derive(Debug, Error)]
pub enum McpError {
    /// Reading a config directory or file failed
    #[error("IO error at {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid JSON
    #[error("Failed to parse MCP config {path}: {source}")]
    Config {
        /// Offending file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// The server process could not be started
    #[error("Failed to start MCP server '{server}': {source}")]
    Spawn {
        /// Server name
        server: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The server replied with a JSON-RPC error
    #[error("MCP error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// The server did not answer in time
    #[error("MCP request '{method}' timed out after {seconds}s")]
    Timeout {
        /// Request method
        method: String,
        /// Limit that elapsed
        seconds: u64,
    },

    /// Unexpected message shape
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// The server exited or closed its pipes
    #[error("MCP server '{0}' closed the connection")]
    Closed(String),
}
