//! Fast Protocol - shared types for the fast flow runner
//!
//! This crate holds the definitions every other crate agrees on:
//!
//! - [`models`] - flow and step definitions as they appear on disk, the typed
//!   step variants the engine dispatches on, and chat transcripts
//! - [`capability`] - the two external capabilities the engine drives: a
//!   [`Generator`] that produces text or tool calls, and a [`ToolProvider`]
//!   that executes named tools
//!
//! # Example
//!
//! ```rust
//! use fast_protocol::models::{FlowDefinition, StepKind};
//!
//! let flow: FlowDefinition = serde_json::from_str(
//!     r#"{"model": "gemini-2.0-flash", "steps": [{"id": "a", "prompt": "hi"}]}"#,
//! ).unwrap();
//! let step = flow.steps[0].to_step().unwrap();
//! assert!(matches!(step.kind, StepKind::Text));
//! ```

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Capability traits for generation and tool providers
pub mod capability;
/// Flow, step and transcript models
pub mod models;

pub use capability::*;
pub use models::*;
