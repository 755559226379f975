//! Gemini provider client
//!
//! Implements the [`Generator`] capability on top of the Gemini REST API.
//!
//! # Features
//! - Conversations with function calling through `generateContent`
//! - Streamed text through `streamGenerateContent?alt=sse` when the caller
//!   supplies a chunk callback
//! - API key kept in a [`SecretString`], sent as a header, never logged
//! - An offline [`EchoGenerator`] for dry runs

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

use async_trait::async_trait;
use fast_protocol::{ChunkSink, Generation, GenerationError, GenerationRequest, Generator};
use futures::StreamExt;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, instrument};
use url::Url;

pub mod echo;
mod wire;

pub use echo::EchoGenerator;

use wire::{
    system_instruction, to_contents, to_tool_sets, ApiErrorEnvelope, GenerateRequest,
    GenerateResponse, ResponseAccumulator,
};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Overrides [`DEFAULT_BASE_URL`]
pub const BASE_URL_ENV: &str = "FAST_GEMINI_BASE_URL";
/// Overrides the request timeout, in seconds
pub const TIMEOUT_ENV: &str = "FAST_TIMEOUT_SECONDS";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Client construction errors
#[derive(Debug, Error)]
pub enum GeminiError {
    /// The base URL does not parse
    #[error("Invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        /// The URL given
        url: String,
        /// Parse error
        #[source]
        source: url::ParseError,
    },
    /// The API key cannot be sent as a header
    #[error("API key contains invalid characters")]
    InvalidApiKey,
    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration for the client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub base_url: String,
    /// API key
    pub api_key: SecretString,
    /// Bound on a whole request, or on the gap between two chunks of a stream
    pub timeout_seconds: u64,
}

impl ClientConfig {
    /// Configuration from the environment with the given key
    pub fn new(api_key: SecretString) -> Self {
        Self {
            base_url: std::env::var(BASE_URL_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            timeout_seconds: get_default_timeout(),
        }
    }
}

/// Timeout from `FAST_TIMEOUT_SECONDS`, 120 seconds when unset or invalid
fn get_default_timeout() -> u64 {
    std::env::var(TIMEOUT_ENV)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(120)
}

/// Gemini REST client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl GeminiClient {
    /// Create a client
    pub fn new(config: ClientConfig) -> Result<Self, GeminiError> {
        let mut root = config.base_url.trim_end_matches('/').to_string();
        root.push('/');
        let base_url = Url::parse(&root).map_err(|source| GeminiError::InvalidBaseUrl {
            url: config.base_url.clone(),
            source,
        })?;

        let mut key = HeaderValue::from_str(config.api_key.expose_secret())
            .map_err(|_| GeminiError::InvalidApiKey)?;
        key.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // A client-wide timeout would also cut off long streams, so it is
        // applied per request in `send` and per chunk while streaming.
        let timeout = Duration::from_secs(config.timeout_seconds);
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            base_url,
            http,
            timeout,
        })
    }

    fn endpoint(&self, model: &str, stream: bool) -> Result<Url, GenerationError> {
        let path = if stream {
            format!("models/{model}:streamGenerateContent")
        } else {
            format!("models/{model}:generateContent")
        };
        let mut url = self
            .base_url
            .join(&path)
            .map_err(|e| GenerationError::Malformed(format!("invalid model name: {e}")))?;
        if stream {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(url)
    }

    /// POST `body`. Without `stream` the timeout covers reading the body too.
    async fn send(
        &self,
        url: Url,
        body: &GenerateRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        debug!("Sending request to {}", url.path());
        let mut builder = self.http.post(url).json(body);
        if !stream {
            builder = builder.timeout(self.timeout);
        }
        let response = tokio::time::timeout(self.timeout, builder.send())
            .await
            .map_err(|_| self.timed_out("response"))?
            .map_err(|e| GenerationError::Transport(sanitize_error_message(&e.to_string())))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let error_text = response.text().await.unwrap_or_default();
        error!("API error ({}): {}", status, sanitize_error_message(&error_text));
        let message = match serde_json::from_str::<ApiErrorEnvelope>(&error_text) {
            Ok(envelope) => {
                let status_name = envelope.error.status.unwrap_or_default();
                sanitize_error_message(&format!("{} {}", status_name, envelope.error.message))
                    .trim()
                    .to_string()
            }
            Err(_) => status.canonical_reason().unwrap_or("Unknown error").to_string(),
        };
        Err(GenerationError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn generate_once(&self, model: &str, body: &GenerateRequest) -> Result<Generation, GenerationError> {
        let response = self.send(self.endpoint(model, false)?, body, false).await?;
        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(sanitize_error_message(&e.to_string())))?;

        let mut acc = ResponseAccumulator::default();
        acc.absorb(parsed);
        acc.finish()
    }

    async fn generate_streaming(
        &self,
        model: &str,
        body: &GenerateRequest,
        on_chunk: &ChunkSink<'_>,
    ) -> Result<Generation, GenerationError> {
        let response = self.send(self.endpoint(model, true)?, body, true).await?;
        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut acc = ResponseAccumulator::default();

        loop {
            let next = tokio::time::timeout(self.timeout, stream.next())
                .await
                .map_err(|_| self.timed_out("next stream chunk"))?;
            let Some(chunk) = next else {
                break;
            };
            let chunk =
                chunk.map_err(|e| GenerationError::Transport(sanitize_error_message(&e.to_string())))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                handle_sse_line(&line, &mut acc, on_chunk)?;
            }
        }
        if !buffer.is_empty() {
            handle_sse_line(&buffer, &mut acc, on_chunk)?;
        }
        acc.finish()
    }

    fn timed_out(&self, waiting_for: &str) -> GenerationError {
        GenerationError::Transport(format!(
            "no {} within {}s",
            waiting_for,
            self.timeout.as_secs()
        ))
    }
}

fn handle_sse_line(
    line: &[u8],
    acc: &mut ResponseAccumulator,
    on_chunk: &ChunkSink<'_>,
) -> Result<(), GenerationError> {
    let line = String::from_utf8_lossy(line);
    let Some(data) = line.trim_end_matches(['\r', '\n']).strip_prefix("data:") else {
        return Ok(());
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(());
    }
    let response: GenerateResponse = serde_json::from_str(data)
        .map_err(|e| GenerationError::Malformed(format!("bad stream event: {e}")))?;
    let delta = acc.absorb(response);
    if !delta.is_empty() {
        on_chunk(&delta);
    }
    Ok(())
}

#[async_trait]
impl Generator for GeminiClient {
    #[instrument(skip(self, request, on_chunk), fields(model = request.model, turns = request.history.len()))]
    async fn generate(
        &self,
        request: GenerationRequest<'_>,
        on_chunk: Option<&ChunkSink<'_>>,
    ) -> Result<Generation, GenerationError> {
        let body = GenerateRequest {
            contents: to_contents(request.history),
            system_instruction: system_instruction(request.system_prompt),
            tools: to_tool_sets(request.tools),
        };

        let outcome = match on_chunk {
            Some(sink) => self.generate_streaming(request.model, &body, sink).await,
            None => self.generate_once(request.model, &body).await,
        };
        match &outcome {
            Ok(Generation::Text(text)) => info!(chars = text.len(), "Generation complete"),
            Ok(Generation::ToolCall(call)) => info!(tool = %call.name, "Model requested a tool"),
            Err(e) => error!(error = %e, "Generation failed"),
        }
        outcome
    }
}

/// Redact credentials from provider error text and bound its length.
fn sanitize_error_message(message: &str) -> String {
    let patterns = [
        (r"(?i)(key|token|secret|password)=[^&\s\x22']+", "$1=***"),
        (r"AIza[0-9A-Za-z_-]{35}", "AIza***"),
        (r"(?i)bearer\s+[A-Za-z0-9._-]+", "Bearer ***"),
        (r"[A-Za-z0-9_-]{32,}", "***REDACTED***"),
    ];

    let mut sanitized = message.to_string();
    for (pattern, replacement) in patterns {
        if let Ok(re) = Regex::new(pattern) {
            sanitized = re.replace_all(&sanitized, replacement).into_owned();
        }
    }

    const LIMIT: usize = 256;
    if sanitized.chars().count() > LIMIT {
        let truncated: String = sanitized.chars().take(LIMIT).collect();
        format!("{truncated}... [truncated]")
    } else {
        sanitized
    }
}
