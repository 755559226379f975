//! Offline generator used with `MOCK_FLOW=true`.

use async_trait::async_trait;
use fast_protocol::{
    ChunkSink, Generation, GenerationError, GenerationRequest, Generator, Role,
};
use tracing::debug;

/// Answers every request with `Mocked response for: <last user text>`
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: Option<&ChunkSink<'_>>,
    ) -> Result<Generation, GenerationError> {
        let prompt = request
            .history
            .iter()
            .rev()
            .filter(|t| t.role == Role::User)
            .find_map(|t| t.text())
            .unwrap_or_default();
        let text = format!("Mocked response for: {prompt}");
        debug!(model = request.model, "Echoing prompt");
        if let Some(sink) = on_chunk {
            sink(&text);
        }
        Ok(Generation::Text(text))
    }
}
