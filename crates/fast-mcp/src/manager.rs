use crate::{McpClient, McpError, McpServerConfig, ToolHandler, ToolRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Running MCP servers and the registry of their tools.
pub struct McpManager {
    registry: ToolRegistry,
    clients: Vec<Arc<McpClient>>,
}

impl McpManager {
    /// Start each server, register its tools, and keep the ones that came up.
    ///
    /// A server that fails to start or initialize is logged and skipped.
    pub async fn start(configs: &[McpServerConfig]) -> Self {
        let registry = ToolRegistry::new();
        let mut clients = Vec::new();

        for config in configs {
            match connect(config, &registry).await {
                Ok(client) => clients.push(client),
                Err(e) => warn!("MCP server '{}' unavailable: {}", config.name, e),
            }
        }

        info!(
            "{} MCP server(s) running, {} tool(s) registered",
            clients.len(),
            registry.len().await
        );
        Self { registry, clients }
    }

    /// Registry backed by the running servers
    pub fn registry(&self) -> ToolRegistry {
        self.registry.clone()
    }

    /// Names of the running servers
    pub fn servers(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    /// Kill every server process.
    pub async fn shutdown(self) {
        for client in &self.clients {
            client.shutdown().await;
        }
    }
}

async fn connect(
    config: &McpServerConfig,
    registry: &ToolRegistry,
) -> Result<Arc<McpClient>, McpError> {
    let client = Arc::new(McpClient::spawn(config)?);
    let tools = match initialize_and_list(&client).await {
        Ok(tools) => tools,
        Err(e) => {
            client.shutdown().await;
            return Err(e);
        }
    };

    for declaration in tools {
        let name = declaration.name.clone();
        let handler_client = Arc::clone(&client);
        let tool_name = name.clone();
        let handler: ToolHandler = Box::new(move |args| {
            let client = Arc::clone(&handler_client);
            let tool_name = tool_name.clone();
            Box::pin(async move { client.call_tool(&tool_name, args).await })
        });
        if let Err(e) = registry.register_tool(&config.name, declaration, handler).await {
            warn!("Skipping tool '{}' from '{}': {}", name, config.name, e);
        }
    }
    Ok(client)
}

async fn initialize_and_list(
    client: &McpClient,
) -> Result<Vec<fast_protocol::ToolDeclaration>, McpError> {
    client.initialize().await?;
    client.list_tools().await
}
