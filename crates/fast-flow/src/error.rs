use fast_protocol::{GenerationError, StepDefinitionError, ToolError};
use std::path::PathBuf;
use thiserror::Error;

/// Problems with a flow definition, detected before any step runs
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The flow has no steps
    #[error("flow has no steps")]
    EmptyFlow,
    /// Two steps share an id
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),
    /// A step uses a name reserved for ambient tags
    #[error("step id '{0}' is reserved")]
    ReservedId(String),
    /// A step definition is incomplete or has an unknown type
    #[error(transparent)]
    InvalidStep(#[from] StepDefinitionError),
    /// The `if` guard is not `left == right` or `left != right`
    #[error("step '{step_id}' has unsupported guard '{guard}': expected exactly one '==' or '!='")]
    UnsupportedGuard {
        /// Step id
        step_id: String,
        /// The raw guard
        guard: String,
    },
    /// A step references its own result
    #[error("step '{0}' references its own result")]
    SelfReference(String),
    /// Steps wait on each other in a loop
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Why a single step could not produce a result
#[derive(Debug, Error)]
pub enum StepError {
    /// The generation provider failed
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),
    /// A tool invocation failed
    #[error("tool failed: {0}")]
    Tool(#[from] ToolError),
    /// File system access failed
    #[error("{action} '{}': {source}", path.display())]
    Io {
        /// What was attempted
        action: &'static str,
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The model kept asking for tools past the configured bound
    #[error("tool call loop exceeded {0} rounds")]
    ToolLoopExceeded(u32),
    /// The step finished without any text
    #[error("step produced an empty result")]
    EmptyResult,
    /// The presentation layer went away, or gave no answer, while the step
    /// waited for a human
    #[error("no human input available")]
    InputClosed,
    /// A selector source directory has no files
    #[error("no files to select in '{}'", .0.display())]
    NothingToSelect(PathBuf),
    /// The human picked a file that is not in the offered list
    #[error("'{0}' is not one of the offered files")]
    UnknownSelection(String),
}

/// Outcome of a failed flow run
#[derive(Debug, Error)]
pub enum FlowError {
    /// The flow definition is invalid
    #[error("invalid flow: {0}")]
    Config(#[from] ConfigError),
    /// A step failed; every other step was stopped
    #[error("step '{step_id}' failed: {source}")]
    StepFailed {
        /// Id of the failing step
        step_id: String,
        /// Cause
        #[source]
        source: StepError,
    },
    /// A step task ended without reporting
    #[error("step task aborted: {0}")]
    TaskAborted(String),
}

impl FlowError {
    /// Id of the step that failed, if a step failed
    pub fn step_id(&self) -> Option<&str> {
        match self {
            FlowError::StepFailed { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}
