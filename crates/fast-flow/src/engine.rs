use crate::error::{FlowError, StepError};
use crate::events::{FlowEvent, FlowIo};
use crate::executor::{StepOutcome, StepRunner};
use crate::plan::{FlowPlan, PlannedStep};
use crate::store::ResultStore;
use crate::template::Ambient;
use fast_protocol::{ChatTurn, FlowDefinition, Generator, ToolProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

/// Default bound on tool calls within one generation loop
pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 16;
/// Default per-call tool timeout
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Tool calls allowed before a step fails with `ToolLoopExceeded`
    pub max_tool_rounds: u32,
    /// Upper bound for a single tool call
    pub tool_timeout: Duration,
    /// Stream text steps to the presentation layer
    pub streaming: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            streaming: true,
        }
    }
}

/// Results of a completed run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowRun {
    /// Step id to result
    pub results: HashMap<String, String>,
    /// Step id to transcript, for steps that kept one
    pub transcripts: HashMap<String, Vec<ChatTurn>>,
}

impl FlowRun {
    /// Result of one step
    pub fn result(&self, step_id: &str) -> Option<&str> {
        self.results.get(step_id).map(String::as_str)
    }

    /// Copy of `flow` with each step's `output` and `history` filled in
    pub fn annotate(&self, flow: &FlowDefinition) -> FlowDefinition {
        let mut annotated = flow.clone();
        for step in &mut annotated.steps {
            step.output = self.results.get(&step.id).cloned();
            step.history = self.transcripts.get(&step.id).cloned();
        }
        annotated
    }
}

enum TaskExit {
    Done(Option<Vec<ChatTurn>>),
    Failed(StepError),
    Stopped,
}

/// Runs flows: one task per step, each gated on the results it references
#[derive(Clone)]
pub struct FlowEngine {
    generator: Arc<dyn Generator>,
    tools: Arc<dyn ToolProvider>,
    settings: EngineSettings,
}

impl FlowEngine {
    /// Create an engine with default settings
    pub fn new(generator: Arc<dyn Generator>, tools: Arc<dyn ToolProvider>) -> Self {
        Self {
            generator,
            tools,
            settings: EngineSettings::default(),
        }
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current settings
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Execute a plan to completion.
    ///
    /// Every step starts at once and waits for its dependencies in the
    /// result store. The first failing step closes the store and aborts all
    /// other tasks, so nothing publishes after a failure.
    #[instrument(skip_all, fields(steps = plan.steps.len()))]
    pub async fn run(
        &self,
        plan: FlowPlan,
        ambient: Ambient,
        io: FlowIo,
    ) -> Result<FlowRun, FlowError> {
        let store = ResultStore::new();
        let runner = Arc::new(StepRunner {
            model: plan.model,
            system_prompt: plan.system_prompt,
            store: store.clone(),
            ambient,
            generator: self.generator.clone(),
            tools: self.tools.clone(),
            io,
            settings: self.settings.clone(),
        });

        info!("Starting flow execution");
        let mut tasks = JoinSet::new();
        for planned in plan.steps {
            let runner = runner.clone();
            tasks.spawn(async move {
                let step_id = planned.step.id.clone();
                (step_id, run_step(&runner, &planned).await)
            });
        }

        let mut transcripts = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (step_id, exit) = match joined {
                Ok(pair) => pair,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    error!(error = %e, "Step task panicked");
                    store.close();
                    tasks.abort_all();
                    return Err(FlowError::TaskAborted(e.to_string()));
                }
            };

            match exit {
                TaskExit::Done(Some(transcript)) => {
                    transcripts.insert(step_id, transcript);
                }
                TaskExit::Done(None) | TaskExit::Stopped => {}
                // The failing task already closed the store and reported itself.
                TaskExit::Failed(source) => {
                    tasks.abort_all();
                    return Err(FlowError::StepFailed { step_id, source });
                }
            }
        }

        info!("Flow completed");
        Ok(FlowRun {
            results: store.snapshot(),
            transcripts,
        })
    }
}

async fn run_step(runner: &StepRunner, planned: &PlannedStep) -> TaskExit {
    let step_id = &planned.step.id;
    if runner.store.wait_for(&planned.deps).await.is_err() {
        return TaskExit::Stopped;
    }

    runner.io.emit(FlowEvent::StepStarted {
        step_id: step_id.clone(),
    });

    let outcome = match runner.execute(planned).await {
        Ok(outcome) if outcome.result.is_empty() => {
            return fail(runner, step_id, StepError::EmptyResult)
        }
        Ok(outcome) => outcome,
        Err(e) => return fail(runner, step_id, e),
    };

    let StepOutcome {
        result,
        transcript,
        skipped,
    } = outcome;
    let published = runner.store.publish_then(step_id, result.clone(), || {
        runner.io.emit(FlowEvent::StepDone {
            step_id: step_id.clone(),
            result,
            skipped,
        })
    });
    if let Err(e) = published {
        warn!(step = %step_id, error = %e, "Result not published");
        return TaskExit::Stopped;
    }
    TaskExit::Done(transcript)
}

/// Stop the run on the first failure. Steps that are still pending never
/// publish once the store is closed, and a later failure is only logged.
fn fail(runner: &StepRunner, step_id: &str, source: StepError) -> TaskExit {
    let first = runner.store.close_then(|| {
        runner.io.emit(FlowEvent::StepFailed {
            step_id: step_id.to_string(),
            error: source.to_string(),
        })
    });
    if first {
        error!(step = %step_id, error = %source, "Step failed, stopping flow");
        TaskExit::Failed(source)
    } else {
        warn!(step = %step_id, error = %source, "Step failed after the flow stopped");
        TaskExit::Stopped
    }
}
