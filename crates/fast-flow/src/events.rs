//! Progress events sent to the presentation layer and human-input requests
//! coming back from it.

use crate::error::StepError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Lifecycle of a single step as seen by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Not started, possibly waiting on dependencies
    Pending,
    /// Executing
    Running,
    /// Blocked on a human
    Waiting,
    /// Finished with a result
    Done,
    /// Finished without a result
    Failed,
}

/// A state change that the lifecycle does not allow
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid transition for step '{step_id}': {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// Step id
    pub step_id: String,
    /// Current state
    pub from: ExecutionState,
    /// Requested state
    pub to: ExecutionState,
}

impl ExecutionState {
    /// Whether `self -> next` is allowed
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Waiting)
                | (Waiting, Running)
                | (Running, Done)
                | (Running, Failed)
        )
    }

    /// Whether the step is finished
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Done | ExecutionState::Failed)
    }
}

/// Something that happened during a run
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    /// Dependencies are satisfied and the step began
    StepStarted {
        /// Step id
        step_id: String,
    },
    /// The step is blocked on human input
    StepWaiting {
        /// Step id
        step_id: String,
    },
    /// Human input arrived and the step continues
    StepResumed {
        /// Step id
        step_id: String,
    },
    /// Text to show the human (a filled interaction prompt or a model reply)
    StepOutput {
        /// Step id
        step_id: String,
        /// Text
        text: String,
    },
    /// Streamed increment of a generation
    StepChunk {
        /// Step id
        step_id: String,
        /// Increment
        text: String,
    },
    /// A tool call is about to run
    ToolCallStarted {
        /// Step id
        step_id: String,
        /// Tool name
        tool: String,
    },
    /// A tool call returned
    ToolCallFinished {
        /// Step id
        step_id: String,
        /// Tool name
        tool: String,
        /// Whether the tool succeeded
        success: bool,
    },
    /// The step published its result
    StepDone {
        /// Step id
        step_id: String,
        /// The result
        result: String,
        /// The guard was false
        skipped: bool,
    },
    /// The step failed and the run is stopping
    StepFailed {
        /// Step id
        step_id: String,
        /// Error description
        error: String,
    },
}

impl FlowEvent {
    /// Step this event belongs to
    pub fn step_id(&self) -> &str {
        match self {
            FlowEvent::StepStarted { step_id }
            | FlowEvent::StepWaiting { step_id }
            | FlowEvent::StepResumed { step_id }
            | FlowEvent::StepOutput { step_id, .. }
            | FlowEvent::StepChunk { step_id, .. }
            | FlowEvent::ToolCallStarted { step_id, .. }
            | FlowEvent::ToolCallFinished { step_id, .. }
            | FlowEvent::StepDone { step_id, .. }
            | FlowEvent::StepFailed { step_id, .. } => step_id,
        }
    }

    /// State the step enters with this event, if any
    pub fn state(&self) -> Option<ExecutionState> {
        match self {
            FlowEvent::StepStarted { .. } | FlowEvent::StepResumed { .. } => {
                Some(ExecutionState::Running)
            }
            FlowEvent::StepWaiting { .. } => Some(ExecutionState::Waiting),
            FlowEvent::StepDone { .. } => Some(ExecutionState::Done),
            FlowEvent::StepFailed { .. } => Some(ExecutionState::Failed),
            _ => None,
        }
    }
}

/// Per-step state table driven by events
#[derive(Debug, Clone, Default)]
pub struct StepStates {
    states: HashMap<String, ExecutionState>,
}

impl StepStates {
    /// All ids start `Pending`
    pub fn new<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            states: ids
                .into_iter()
                .map(|id| (id.to_string(), ExecutionState::Pending))
                .collect(),
        }
    }

    /// Apply the state change carried by `event`, if any.
    pub fn apply(&mut self, event: &FlowEvent) -> Result<(), InvalidTransition> {
        let Some(next) = event.state() else {
            return Ok(());
        };
        let current = self
            .states
            .entry(event.step_id().to_string())
            .or_insert(ExecutionState::Pending);
        if !current.can_transition_to(next) {
            return Err(InvalidTransition {
                step_id: event.step_id().to_string(),
                from: *current,
                to: next,
            });
        }
        *current = next;
        Ok(())
    }

    /// Current state of a step
    pub fn get(&self, step_id: &str) -> Option<ExecutionState> {
        self.states.get(step_id).copied()
    }
}

/// A file offered by a selector step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File name within the source directory
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Local>,
}

impl FileEntry {
    /// `2024-05-01 14:03 • 2.5 KB`
    pub fn description(&self) -> String {
        let size = if self.size > 1024 {
            format!("{:.1} KB", self.size as f64 / 1024.0)
        } else {
            format!("{} B", self.size)
        };
        format!("{} • {}", self.modified.format("%Y-%m-%d %H:%M"), size)
    }
}

/// What the step needs from the human
#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
    /// Free text
    Text {
        /// Prompt shown with the request, may be empty
        prompt: String,
        /// The answer is the step's result; there is no end-of-interaction command
        single: bool,
    },
    /// Pick one of the listed files, answered with its name
    Select {
        /// Prompt shown with the list
        prompt: String,
        /// Candidates, newest first
        files: Vec<FileEntry>,
    },
}

/// A request for human input, addressed to one step
#[derive(Debug)]
pub struct InputRequest {
    /// Requesting step
    pub step_id: String,
    /// What is asked
    pub kind: InputKind,
    /// Where the answer goes
    pub reply: oneshot::Sender<String>,
}

/// Engine side of the presentation channels
#[derive(Debug, Clone)]
pub struct FlowIo {
    events: mpsc::UnboundedSender<FlowEvent>,
    input: mpsc::Sender<InputRequest>,
}

/// Presentation side of the channels
#[derive(Debug)]
pub struct Presentation {
    /// Progress events
    pub events: mpsc::UnboundedReceiver<FlowEvent>,
    /// Human-input requests, answered one at a time
    pub input: mpsc::Receiver<InputRequest>,
}

impl FlowIo {
    /// Connected engine and presentation ends
    pub fn channel() -> (Self, Presentation) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::channel(16);
        (
            Self {
                events: events_tx,
                input: input_tx,
            },
            Presentation {
                events: events_rx,
                input: input_rx,
            },
        )
    }

    /// Send a progress event. A missing listener is not an error.
    pub fn emit(&self, event: FlowEvent) {
        if let Err(e) = self.events.send(event) {
            trace!(step = e.0.step_id(), "No listener for flow event");
        }
    }

    /// Ask the human and wait for the answer.
    ///
    /// Emits `StepWaiting` before the request and `StepResumed` once it is
    /// answered or abandoned.
    pub async fn ask(&self, step_id: &str, kind: InputKind) -> Result<String, StepError> {
        let (reply, answer) = oneshot::channel();
        self.emit(FlowEvent::StepWaiting {
            step_id: step_id.to_string(),
        });
        let request = InputRequest {
            step_id: step_id.to_string(),
            kind,
            reply,
        };
        let outcome = match self.input.send(request).await {
            Ok(()) => answer.await.map_err(|_| StepError::InputClosed),
            Err(_) => Err(StepError::InputClosed),
        };
        self.emit(FlowEvent::StepResumed {
            step_id: step_id.to_string(),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_waiting_only_from_running() {
        use ExecutionState::*;
        assert!(Running.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Running));
        assert!(!Pending.can_transition_to(Waiting));
        assert!(!Waiting.can_transition_to(Done));
        assert!(!Done.can_transition_to(Running));
    }

    #[test]
    fn test_step_states_follow_events() {
        let mut states = StepStates::new(["a"]);
        let id = || "a".to_string();
        states
            .apply(&FlowEvent::StepStarted { step_id: id() })
            .expect("start");
        states
            .apply(&FlowEvent::StepWaiting { step_id: id() })
            .expect("wait");
        assert_eq!(states.get("a"), Some(ExecutionState::Waiting));

        let err = states
            .apply(&FlowEvent::StepDone {
                step_id: id(),
                result: "x".into(),
                skipped: false,
            })
            .unwrap_err();
        assert_eq!(err.from, ExecutionState::Waiting);
    }

    #[test]
    fn test_file_entry_description() {
        let modified = Local
            .with_ymd_and_hms(2024, 5, 1, 14, 3, 0)
            .single()
            .expect("valid time");
        let small = FileEntry {
            name: "a.txt".into(),
            size: 512,
            modified,
        };
        let large = FileEntry {
            name: "b.txt".into(),
            size: 2560,
            ..small.clone()
        };
        assert_eq!(small.description(), "2024-05-01 14:03 • 512 B");
        assert_eq!(large.description(), "2024-05-01 14:03 • 2.5 KB");
    }

    #[tokio::test]
    async fn test_ask_round_trip() {
        let (io, mut presentation) = FlowIo::channel();
        let responder = tokio::spawn(async move {
            let request = presentation.input.recv().await.expect("request");
            assert_eq!(request.step_id, "s");
            request.reply.send("answer".into()).expect("reply");
            presentation
        });

        let answer = io
            .ask(
                "s",
                InputKind::Text {
                    prompt: String::new(),
                    single: false,
                },
            )
            .await
            .expect("answer");
        assert_eq!(answer, "answer");

        let mut presentation = responder.await.expect("joined");
        assert!(matches!(
            presentation.events.recv().await,
            Some(FlowEvent::StepWaiting { .. })
        ));
        assert!(matches!(
            presentation.events.recv().await,
            Some(FlowEvent::StepResumed { .. })
        ));
    }

    #[tokio::test]
    async fn test_ask_without_presentation_fails() {
        let (io, presentation) = FlowIo::channel();
        drop(presentation);
        let text = InputKind::Text {
            prompt: String::new(),
            single: false,
        };
        let result = io.ask("s", text).await;
        assert!(matches!(result, Err(StepError::InputClosed)));
    }
}
