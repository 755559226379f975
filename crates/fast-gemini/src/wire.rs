//! `generateContent` request and response bodies, and their mapping to and
//! from the shared chat model.

use fast_protocol::{
    ChatTurn, Generation, GenerationError, Role, ToolCall, ToolDeclaration, TurnContent,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Schema keys the function declaration endpoint rejects
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["$schema", "additionalProperties"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSet>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolSet {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    /// Sits beside `functionCall` and must be echoed back with it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Map a transcript to `contents`, merging consecutive turns of one role.
pub(crate) fn to_contents(history: &[ChatTurn]) -> Vec<Content> {
    let mut contents: Vec<Content> = Vec::new();
    for turn in history {
        let role = match turn.role {
            Role::User => "user",
            Role::Model => "model",
        };
        let part = match &turn.content {
            TurnContent::Text { text } => Part::text(text.clone()),
            TurnContent::ToolCall {
                name,
                args,
                thought_signature,
            } => Part {
                function_call: Some(FunctionCall {
                    name: name.clone(),
                    args: args.clone(),
                }),
                thought_signature: thought_signature.clone(),
                ..Part::default()
            },
            TurnContent::ToolResult { name, response } => Part {
                function_response: Some(FunctionResponse {
                    name: name.clone(),
                    response: as_object(response),
                }),
                ..Part::default()
            },
        };

        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.push(part),
            _ => contents.push(Content {
                role: Some(role.to_string()),
                parts: vec![part],
            }),
        }
    }
    contents
}

/// Function responses must be objects.
fn as_object(value: &Value) -> Value {
    match value {
        Value::Object(_) => value.clone(),
        other => json!({ "result": other }),
    }
}

pub(crate) fn system_instruction(system_prompt: &str) -> Option<Content> {
    (!system_prompt.trim().is_empty()).then(|| Content {
        role: None,
        parts: vec![Part::text(system_prompt)],
    })
}

pub(crate) fn to_tool_sets(tools: &[ToolDeclaration]) -> Vec<ToolSet> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![ToolSet {
        function_declarations: tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: sanitize_schema(&t.input_schema),
            })
            .collect(),
    }]
}

/// Drop schema keys the API rejects. Schemas without properties are omitted.
pub(crate) fn sanitize_schema(schema: &Value) -> Option<Value> {
    fn clean(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), clean(v)))
                    .collect::<Map<_, _>>(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(clean).collect()),
            other => other.clone(),
        }
    }

    let has_properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|p| !p.is_empty());
    has_properties.then(|| clean(schema))
}

/// Accumulates the parts of one or more responses (several for a stream).
#[derive(Debug, Default)]
pub(crate) struct ResponseAccumulator {
    text: String,
    tool_call: Option<ToolCall>,
    saw_candidate: bool,
    block_reason: Option<String>,
    finish_reason: Option<String>,
}

impl ResponseAccumulator {
    /// Absorb one response, returning its new visible text.
    pub fn absorb(&mut self, response: GenerateResponse) -> String {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            self.block_reason = Some(reason);
        }

        let mut delta = String::new();
        if let Some(candidate) = response.candidates.into_iter().next() {
            self.saw_candidate = true;
            if candidate.finish_reason.is_some() {
                self.finish_reason = candidate.finish_reason;
            }
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(call) = part.function_call {
                    if self.tool_call.is_none() {
                        self.tool_call = Some(ToolCall {
                            name: call.name,
                            args: call.args,
                            thought_signature: part.thought_signature,
                        });
                    }
                } else if let Some(text) = part.text {
                    if part.thought != Some(true) {
                        delta.push_str(&text);
                    }
                }
            }
        }
        self.text.push_str(&delta);
        delta
    }

    /// Final outcome
    pub fn finish(self) -> Result<Generation, GenerationError> {
        if let Some(call) = self.tool_call {
            return Ok(Generation::ToolCall(call));
        }
        if !self.text.is_empty() {
            return Ok(Generation::Text(self.text));
        }
        if let Some(reason) = self.block_reason {
            return Err(GenerationError::Blocked(reason));
        }
        match (self.saw_candidate, self.finish_reason) {
            (true, Some(reason)) if reason != "STOP" => Err(GenerationError::Blocked(reason)),
            _ => Err(GenerationError::Empty),
        }
    }
}
