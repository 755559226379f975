use async_trait::async_trait;
use fast_protocol::{ToolDeclaration, ToolError, ToolProvider};
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// A handler function for a tool.
pub type ToolHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>> + Send + Sync>;

/// Registry of every tool offered by the running servers, keyed by tool name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, RegisteredTool>>>,
}

/// A registered tool with its schema validator
pub struct RegisteredTool {
    /// Declaration advertised to the model
    pub declaration: ToolDeclaration,
    /// Async handler function
    pub handler: ToolHandler,
    /// Server that registered this tool
    pub server: String,
    /// Compiled JSON schema for validation
    schema_validator: Option<Validator>,
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a JSON schema for validation. Tools without a schema accept
    /// any arguments.
    fn compile_schema(schema: &Value) -> Result<Option<Validator>, ToolError> {
        if schema.is_null() {
            return Ok(None);
        }
        jsonschema::validator_for(schema)
            .map(Some)
            .map_err(|e| ToolError::SchemaError(e.to_string()))
    }

    /// Register a tool from a server.
    ///
    /// Returns `Ok(false)` when a tool of that name is already registered;
    /// the first registration is kept. Fails if the schema does not compile.
    pub async fn register_tool(
        &self,
        server: &str,
        declaration: ToolDeclaration,
        handler: ToolHandler,
    ) -> Result<bool, ToolError> {
        let mut tools = self.tools.write().await;
        if let Some(existing) = tools.get(&declaration.name) {
            warn!(
                "Tool '{}' from server '{}' shadows the one from '{}'; keeping the first",
                declaration.name, server, existing.server
            );
            return Ok(false);
        }

        let schema_validator = match Self::compile_schema(&declaration.input_schema) {
            Ok(validator) => {
                debug!("Compiled schema for tool: {}", declaration.name);
                validator
            }
            Err(e) => {
                warn!(
                    "Failed to compile schema for tool {}: {}. Tool cannot be registered.",
                    declaration.name, e
                );
                return Err(e);
            }
        };

        tools.insert(
            declaration.name.clone(),
            RegisteredTool {
                declaration,
                handler,
                server: server.to_string(),
                schema_validator,
            },
        );
        Ok(true)
    }

    /// All registered declarations, sorted by name.
    pub async fn list_tools(&self) -> Vec<ToolDeclaration> {
        let tools = self.tools.read().await;
        let mut list: Vec<ToolDeclaration> = tools.values().map(|t| t.declaration.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Validate arguments against the tool's input schema
    fn validate_args(tool: &RegisteredTool, args: &Value) -> Result<(), ToolError> {
        let Some(validator) = &tool.schema_validator else {
            debug!(
                "No schema validator for tool {}, skipping validation",
                tool.declaration.name
            );
            return Ok(());
        };

        let error_messages: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();
        if error_messages.is_empty() {
            debug!("Arguments validated successfully for tool: {}", tool.declaration.name);
            return Ok(());
        }
        let error_msg = error_messages.join("; ");
        warn!("Validation failed for tool {}: {}", tool.declaration.name, error_msg);
        Err(ToolError::InvalidArguments(error_msg))
    }

    /// Call a tool by name, validating arguments against its input schema first.
    #[instrument(skip(self, args))]
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let call = {
            let tools = self.tools.read().await;
            let tool = tools
                .get(name)
                .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
            Self::validate_args(tool, &args)?;
            (tool.handler)(args)
        };
        call.await
    }

    /// Number of registered tools
    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Whether no tools are registered
    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }
}

#[async_trait]
impl ToolProvider for ToolRegistry {
    async fn declarations(&self) -> Vec<ToolDeclaration> {
        self.list_tools().await
    }

    async fn invoke(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        self.call_tool(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_handler() -> ToolHandler {
        Box::new(|args| Box::pin(async move { Ok(json!({ "received": args })) }))
    }

    fn counting_tool(name: &str) -> ToolDeclaration {
        ToolDeclaration {
            name: name.to_string(),
            description: "A test tool".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "count": { "type": "integer", "minimum": 0 }
                },
                "required": ["count"]
            }),
        }
    }

    #[tokio::test]
    async fn test_register_and_list_tool() {
        let registry = ToolRegistry::new();
        registry
            .register_tool("test_server", counting_tool("test_tool"), create_test_handler())
            .await
            .expect("Failed to register tool");

        let tools = registry.list_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "test_tool");
        assert_eq!(registry.declarations().await, tools);
    }

    #[tokio::test]
    async fn test_validate_args_success() {
        let registry = ToolRegistry::new();
        registry
            .register_tool("test_server", counting_tool("test_tool"), create_test_handler())
            .await
            .expect("Failed to register tool");

        let result = registry.invoke("test_tool", json!({ "count": 5 })).await;
        assert_eq!(result.expect("call"), json!({ "received": { "count": 5 } }));
    }

    #[tokio::test]
    async fn test_validate_args_failure() {
        let registry = ToolRegistry::new();
        registry
            .register_tool("test_server", counting_tool("test_tool"), create_test_handler())
            .await
            .expect("Failed to register tool");

        // Negative count violates minimum
        let result = registry.call_tool("test_tool", json!({ "count": -1 })).await;
        let err = result.expect_err("validation should fail");
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        assert!(err.to_string().contains("Invalid arguments"));
    }

    #[tokio::test]
    async fn test_tool_not_found() {
        let registry = ToolRegistry::new();
        let result = registry.call_tool("nonexistent", json!({})).await;
        assert!(result.expect_err("missing").to_string().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_register_invalid_schema() {
        let registry = ToolRegistry::new();
        let def = ToolDeclaration {
            name: "invalid_tool".to_string(),
            description: "A tool with invalid schema".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "count": { "type": "unknown_type" }
                }
            }),
        };

        let err = registry
            .register_tool("test_server", def, create_test_handler())
            .await
            .expect_err("registration should fail");
        assert!(matches!(err, ToolError::SchemaError(_)), "got {err:?}");
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_duplicate_name_keeps_first() {
        let registry = ToolRegistry::new();
        let first = registry
            .register_tool("a", counting_tool("dup"), create_test_handler())
            .await
            .expect("register");
        let second = registry
            .register_tool(
                "b",
                counting_tool("dup"),
                Box::new(|_| Box::pin(async { Ok(json!("second")) })),
            )
            .await
            .expect("register");

        assert!(first);
        assert!(!second);
        assert_eq!(registry.len().await, 1);
        let out = registry.call_tool("dup", json!({ "count": 1 })).await.expect("call");
        assert_eq!(out, json!({ "received": { "count": 1 } }));
    }

    #[tokio::test]
    async fn test_tool_without_schema_accepts_anything() {
        let registry = ToolRegistry::new();
        let def = ToolDeclaration {
            name: "free".to_string(),
            description: String::new(),
            input_schema: Value::Null,
        };
        registry
            .register_tool("s", def, create_test_handler())
            .await
            .expect("register");
        assert!(registry.call_tool("free", json!("anything")).await.is_ok());
    }
}
