//! Fast Core - the services around the flow engine
//!
//! # Modules
//!
//! - [`paths`] - where flows, logs, MCP configs and the API key live
//! - [`loader`] - flow discovery and parsing
//! - [`config`] - API key and environment switches
//! - [`clipboard`] - system clipboard access through platform commands
//! - [`session`] - session logs written after a successful run

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

pub mod clipboard;
pub mod config;
pub mod loader;
pub mod paths;
pub mod session;

pub use clipboard::SystemClipboard;
pub use loader::{FlowEntry, FlowSource, LoadError};
pub use paths::FastPaths;
pub use session::{SessionLog, SessionWriter};

use std::path::PathBuf;
use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum CoreError {
    /// File system operation failed
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Loading a flow failed
    #[error(transparent)]
    Load(#[from] LoadError),

    /// No API key in the environment or key file
    #[error("No API key found (checked environment variable {env} and file {})", file.display())]
    MissingApiKey {
        /// Environment variable checked
        env: &'static str,
        /// Key file checked
        file: PathBuf,
    },

    /// The home directory could not be determined
    #[error("Could not determine the home directory")]
    NoHomeDir,

    /// No clipboard command worked
    #[error("Clipboard unavailable: {0}")]
    Clipboard(String),
}

/// Result type alias using [`CoreError`]
pub type Result<T> = std::result::Result<T, CoreError>;
