//! File system layout.
//!
//! ```text
//! ./flows/<name>.json            flows next to the working directory
//! ~/fast-flows/flows/<name>.json per-user flows
//! ~/fast-flows/logs/             session logs
//! ~/fast-flows/mcp/*.json        MCP server configs
//! ~/.fast_key                    API key file
//! ```

use crate::{CoreError, Result};
use std::path::{Path, PathBuf};

/// Resolved locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastPaths {
    /// `./flows`
    pub local_flows: PathBuf,
    /// `~/fast-flows`
    pub user_root: PathBuf,
    /// `~/.fast_key`
    pub key_file: PathBuf,
}

impl FastPaths {
    /// Layout for the current directory and the user's home.
    pub fn discover() -> Result<Self> {
        let home = dirs::home_dir().ok_or(CoreError::NoHomeDir)?;
        Ok(Self::with_roots(Path::new("."), &home))
    }

    /// Layout under explicit roots
    pub fn with_roots(work_dir: &Path, home: &Path) -> Self {
        Self {
            local_flows: work_dir.join("flows"),
            user_root: home.join("fast-flows"),
            key_file: home.join(".fast_key"),
        }
    }

    /// `~/fast-flows/flows`
    pub fn user_flows(&self) -> PathBuf {
        self.user_root.join("flows")
    }

    /// `~/fast-flows/logs`
    pub fn logs(&self) -> PathBuf {
        self.user_root.join("logs")
    }

    /// `~/fast-flows/mcp`
    pub fn mcp_configs(&self) -> PathBuf {
        self.user_root.join("mcp")
    }
}
