use crate::McpError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

/// How to launch one MCP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Name flows refer to in `mcp_servers`
    pub name: String,
    /// Executable
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Load every `*.json` server config in `dir`, sorted by name.
///
/// `allowed` restricts the result to the named servers; `None` keeps all.
/// A missing directory yields no servers. Files that fail to parse are
/// skipped with a warning.
pub fn load_server_configs(
    dir: &Path,
    allowed: Option<&[String]>,
) -> Result<Vec<McpServerConfig>, McpError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut configs = Vec::new();
    for entry in WalkDir::new(dir)
        .follow_links(false)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_config(path) {
            Ok(config) => configs.push(config),
            Err(e) => warn!("Skipping MCP config: {}", e),
        }
    }

    if let Some(allowed) = allowed {
        for name in allowed {
            if !configs.iter().any(|c| &c.name == name) {
                warn!("Flow requests unknown MCP server '{}'", name);
            }
        }
        configs.retain(|c| allowed.contains(&c.name));
    }
    configs.sort_by(|a, b| a.name.cmp(&b.name));

    info!("Selected {} MCP server config(s) from {}", configs.len(), dir.display());
    Ok(configs)
}

fn read_config(path: &Path) -> Result<McpServerConfig, McpError> {
    let text = std::fs::read_to_string(path).map_err(|source| McpError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| McpError::Config {
        path: path.to_path_buf(),
        source,
    })
}
