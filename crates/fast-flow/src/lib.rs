//! Flow Execution Engine
//!
//! Runs a declarative flow: every step is a task, started together, that
//! waits for the results its `{{tags}}` reference, checks its `if` guard and
//! then produces a text result. Ordering is inferred from the tags alone.
//!
//! ```text
//! FlowDefinition --FlowPlan::build--> FlowPlan --FlowEngine::run--> FlowRun
//!                  (ids, types,                  (ResultStore,
//!                   guards, cycles)               one task per step)
//! ```
//!
//! Progress goes out as [`FlowEvent`]s and human input comes back through
//! [`InputRequest`]s, both on the channels created by [`FlowIo::channel`].

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// `if` guard parsing and evaluation
pub mod condition;
/// Generation and tool-call loop
pub mod converse;
/// Dependency inference and cycle detection
pub mod deps;
/// The scheduler
pub mod engine;
/// Error types
pub mod error;
/// Presentation events and human input
pub mod events;
/// Per-type step execution
pub mod executor;
/// Flow validation
pub mod plan;
/// Shared step results
pub mod store;
/// Tag substitution
pub mod template;

pub use condition::{should_run, Guard};
pub use converse::{ConverseOutcome, Conversation};
pub use deps::blocking_deps;
pub use engine::{EngineSettings, FlowEngine, FlowRun};
pub use error::{ConfigError, FlowError, StepError};
pub use events::{
    ExecutionState, FileEntry, FlowEvent, FlowIo, InputKind, InputRequest, Presentation,
    StepStates,
};
pub use executor::StepOutcome;
pub use plan::FlowPlan;
pub use store::ResultStore;
pub use template::{fill, Ambient};
