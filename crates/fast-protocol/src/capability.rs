use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{ChatTurn, ToolDeclaration};

/// Callback receiving streamed text increments
pub type ChunkSink<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// Everything a generation provider needs for one call
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    /// Model name
    pub model: &'a str,
    /// System prompt, empty when the flow defines none
    pub system_prompt: &'a str,
    /// Conversation so far, oldest first
    pub history: &'a [ChatTurn],
    /// Tools the model may call
    pub tools: &'a [ToolDeclaration],
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Arguments object
    #[serde(default)]
    pub args: Value,
    /// Opaque provider token that must accompany the call when it is sent back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl ToolCall {
    /// A call without a provider signature
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
            thought_signature: None,
        }
    }
}

/// Outcome of one generation call
#[derive(Debug, Clone, PartialEq)]
pub enum Generation {
    /// Final text
    Text(String),
    /// The model wants a tool run before answering
    ToolCall(ToolCall),
}

/// Generation provider failures
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Network or transport problem
    #[error("Request failed: {0}")]
    Transport(String),
    /// Provider answered with an error status or error body
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Sanitized message
        message: String,
    },
    /// The prompt was refused by the provider
    #[error("Prompt blocked: {0}")]
    Blocked(String),
    /// The response had no usable candidate
    #[error("No response from model")]
    Empty,
    /// The response did not have the expected shape
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Tool provider failures
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found
    #[error("Tool not found: {0}")]
    NotFound(String),
    /// Invalid arguments provided
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// Schema compilation failed
    #[error("Schema error: {0}")]
    SchemaError(String),
    /// The tool ran and failed
    #[error("Execution error: {0}")]
    ExecutionError(String),
    /// The tool did not answer in time
    #[error("Tool '{name}' timed out after {seconds}s")]
    Timeout {
        /// Tool name
        name: String,
        /// Elapsed bound in seconds
        seconds: u64,
    },
}

/// Produces text or tool calls from a conversation.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run one generation.
    ///
    /// When `on_chunk` is given and the provider supports streaming, text
    /// increments are forwarded as they arrive; the returned text is still
    /// the full concatenation.
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: Option<&ChunkSink<'_>>,
    ) -> Result<Generation, GenerationError>;
}

/// Executes named, schema-described tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Tools currently available
    async fn declarations(&self) -> Vec<ToolDeclaration>;

    /// Invoke a tool by name
    async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError>;
}

/// A tool provider with no tools
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolProvider for NoTools {
    async fn declarations(&self) -> Vec<ToolDeclaration> {
        Vec::new()
    }

    async fn invoke(&self, name: &str, _args: Value) -> Result<Value, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }
}
