use crate::engine::EngineSettings;
use crate::error::StepError;
use crate::events::{FlowEvent, FlowIo};
use fast_protocol::{
    ChatTurn, ChunkSink, Generation, GenerationRequest, Generator, ToolDeclaration, ToolError,
    ToolProvider,
};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

/// Text answer plus every turn added while producing it
#[derive(Debug, Clone, PartialEq)]
pub struct ConverseOutcome {
    /// Final model text
    pub text: String,
    /// Tool calls, tool results and the final model turn, in order
    pub turns: Vec<ChatTurn>,
}

/// Drives the generation provider and the tool provider for one step
pub struct Conversation<'a> {
    pub(crate) step_id: &'a str,
    pub(crate) generator: &'a dyn Generator,
    pub(crate) tools: &'a dyn ToolProvider,
    pub(crate) io: &'a FlowIo,
    pub(crate) settings: &'a EngineSettings,
}

impl<'a> Conversation<'a> {
    /// A conversation for `step_id`
    pub fn new(
        step_id: &'a str,
        generator: &'a dyn Generator,
        tools: &'a dyn ToolProvider,
        io: &'a FlowIo,
        settings: &'a EngineSettings,
    ) -> Self {
        Self {
            step_id,
            generator,
            tools,
            io,
            settings,
        }
    }

    /// Generate until the model answers with text.
    ///
    /// Each tool call the model makes is run, and both the call and its
    /// response are appended before asking again. A failing tool does not
    /// end the loop: its error goes back to the model as the response.
    #[instrument(skip(self, system_prompt, history), fields(step = self.step_id))]
    pub async fn converse(
        &self,
        model: &str,
        system_prompt: &str,
        history: &[ChatTurn],
        stream: bool,
    ) -> Result<ConverseOutcome, StepError> {
        let declarations: Vec<ToolDeclaration> = self.tools.declarations().await;
        let mut working = history.to_vec();
        let start = working.len();
        let mut rounds = 0u32;

        let forward = |text: &str| {
            self.io.emit(FlowEvent::StepChunk {
                step_id: self.step_id.to_string(),
                text: text.to_string(),
            })
        };
        let on_chunk: Option<&ChunkSink<'_>> = if stream { Some(&forward) } else { None };

        loop {
            let request = GenerationRequest {
                model,
                system_prompt,
                history: &working,
                tools: &declarations,
            };
            match self.generator.generate(request, on_chunk).await? {
                Generation::Text(text) => {
                    debug!(rounds, "Model answered with text");
                    working.push(ChatTurn::model(text.clone()));
                    return Ok(ConverseOutcome {
                        text,
                        turns: working.split_off(start),
                    });
                }
                Generation::ToolCall(call) => {
                    if rounds >= self.settings.max_tool_rounds {
                        warn!(rounds, "Tool call loop bound reached");
                        return Err(StepError::ToolLoopExceeded(self.settings.max_tool_rounds));
                    }
                    rounds += 1;

                    let response = match self.invoke_tool(&call.name, call.args.clone()).await {
                        Ok(value) => value,
                        Err(e) => json!({ "error": e.to_string() }),
                    };
                    let name = call.name.clone();
                    working.push(ChatTurn::from(call));
                    working.push(ChatTurn::tool_result(name, response));
                }
            }
        }
    }

    /// Run one tool with the configured timeout, reporting start and finish.
    pub async fn invoke_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        self.io.emit(FlowEvent::ToolCallStarted {
            step_id: self.step_id.to_string(),
            tool: name.to_string(),
        });
        info!(step = self.step_id, tool = name, "Calling tool");

        let timeout = self.settings.tool_timeout;
        let outcome = match tokio::time::timeout(timeout, self.tools.invoke(name, args)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                name: name.to_string(),
                seconds: timeout.as_secs(),
            }),
        };

        if let Err(e) = &outcome {
            warn!(step = self.step_id, tool = name, error = %e, "Tool call failed");
        }
        self.io.emit(FlowEvent::ToolCallFinished {
            step_id: self.step_id.to_string(),
            tool: name.to_string(),
            success: outcome.is_ok(),
        });
        outcome
    }
}
