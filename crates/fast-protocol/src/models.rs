use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::capability::ToolCall;

/// Reply a human sends to close an open-ended interaction step.
pub const END_OF_INTERACTION: &str = "__END_INTERACTION__";

/// Result recorded for a step whose `if` guard evaluated to false.
pub const SKIPPED_RESULT: &str = "Skipped (Condition met)";

/// A flow document as read from `<name>.json`
///
/// Unknown top-level keys are kept in `extra` so that a session log written
/// from this definition carries the original document forward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowDefinition {
    /// Model used by every step without its own override
    pub model: String,
    /// System prompt sent with every generation request
    #[serde(default, alias = "systemPrompt")]
    pub system_prompt: String,
    /// MCP servers to start for this flow (all configured servers when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<Vec<String>>,
    /// Ordered steps
    pub steps: Vec<StepDefinition>,
    /// Keys this version does not interpret
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// One step exactly as written in the flow document
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepDefinition {
    /// Unique step identifier, also the template tag name of its result
    pub id: String,
    /// `text`, `interaction`, `selector`, `file_write` or `tool` (default `text`)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Templated prompt
    #[serde(default)]
    pub prompt: String,
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Conversation tab grouping, passed through untouched
    #[serde(default, alias = "tabId", skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
    /// Templated guard (`left == right` or `left != right`)
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Interaction: `1` means a single human reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    /// Selector: templated directory to pick a file from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// File write: templated destination path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// File write: templated file body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool: tool name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool: arguments, string leaves are templated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Final result, filled in only in session logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Transcript, filled in only in session logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ChatTurn>>,
}

/// Why a [`StepDefinition`] cannot be turned into a [`Step`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepDefinitionError {
    /// Step has an empty id
    #[error("step at position {0} has no id")]
    MissingId(usize),
    /// `type` is not one of the supported step types
    #[error("step '{id}' has unknown type '{kind}'")]
    UnknownType {
        /// Step id
        id: String,
        /// The unrecognized type
        kind: String,
    },
    /// A field required by the step type is missing
    #[error("step '{id}' of type '{kind}' requires field '{field}'")]
    MissingField {
        /// Step id
        id: String,
        /// Step type
        kind: &'static str,
        /// Missing field name
        field: &'static str,
    },
    /// Tool arguments are not a JSON object
    #[error("step '{0}' has 'args' that is not a JSON object")]
    InvalidArgs(String),
}

/// Type-specific behaviour of a step
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    /// One generation call with the filled prompt
    Text,
    /// Human input, either a single reply or an open-ended chat
    Interaction {
        /// `Some(1)` selects the single-reply mode
        max_turns: Option<u32>,
    },
    /// Human picks a file from a directory; its contents are the result
    Selector {
        /// Templated directory
        source: String,
    },
    /// Write a file
    FileWrite {
        /// Templated path
        filename: String,
        /// Templated body
        content: String,
    },
    /// Invoke a tool from the tool provider
    Tool {
        /// Tool name
        tool: String,
        /// Arguments with templated string leaves
        args: Map<String, Value>,
    },
}

impl StepKind {
    /// Name used in flow documents
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Text => "text",
            StepKind::Interaction { .. } => "interaction",
            StepKind::Selector { .. } => "selector",
            StepKind::FileWrite { .. } => "file_write",
            StepKind::Tool { .. } => "tool",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated step ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique identifier
    pub id: String,
    /// Variant with its type-specific fields
    pub kind: StepKind,
    /// Templated prompt
    pub prompt: String,
    /// Model override
    pub model: Option<String>,
    /// Conversation tab grouping
    pub tab_id: Option<String>,
    /// Templated guard
    pub guard: Option<String>,
}

impl Step {
    /// Every string of this step that goes through template substitution.
    pub fn templatable_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.prompt.as_str()];
        if let Some(guard) = &self.guard {
            fields.push(guard);
        }
        match &self.kind {
            StepKind::Text | StepKind::Interaction { .. } => {}
            StepKind::Selector { source } => fields.push(source),
            StepKind::FileWrite { filename, content } => {
                fields.push(filename);
                fields.push(content);
            }
            StepKind::Tool { args, .. } => {
                for value in args.values() {
                    collect_strings(value, &mut fields);
                }
            }
        }
        fields
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

impl StepDefinition {
    /// Convert to the typed representation.
    pub fn to_step(&self) -> Result<Step, StepDefinitionError> {
        let kind = match self.kind.as_deref().unwrap_or("text") {
            "text" | "" => StepKind::Text,
            "interaction" => StepKind::Interaction {
                max_turns: self.max_turns,
            },
            "selector" => StepKind::Selector {
                source: self.require(self.source.as_ref(), "selector", "source")?,
            },
            "file_write" => StepKind::FileWrite {
                filename: self.require(self.filename.as_ref(), "file_write", "filename")?,
                content: self.content.clone().unwrap_or_default(),
            },
            "tool" => {
                let tool = self.require(self.tool.as_ref(), "tool", "tool")?;
                let args = match &self.args {
                    None | Some(Value::Null) => Map::new(),
                    Some(Value::Object(map)) => map.clone(),
                    Some(_) => return Err(StepDefinitionError::InvalidArgs(self.id.clone())),
                };
                StepKind::Tool { tool, args }
            }
            other => {
                return Err(StepDefinitionError::UnknownType {
                    id: self.id.clone(),
                    kind: other.to_string(),
                })
            }
        };

        Ok(Step {
            id: self.id.clone(),
            kind,
            prompt: self.prompt.clone(),
            model: self.model.clone().filter(|m| !m.is_empty()),
            tab_id: self.tab_id.clone(),
            guard: self.guard.clone().filter(|g| !g.trim().is_empty()),
        })
    }

    fn require(
        &self,
        value: Option<&String>,
        kind: &'static str,
        field: &'static str,
    ) -> Result<String, StepDefinitionError> {
        value
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| StepDefinitionError::MissingField {
                id: self.id.clone(),
                kind,
                field,
            })
    }
}

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The human, or tool results fed back to the model
    User,
    /// The generation provider
    Model,
}

/// Payload of a chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// The model asked for a tool
    ToolCall {
        /// Tool name
        name: String,
        /// Arguments as sent by the model
        args: Value,
        /// Provider token returned with the call, replayed verbatim
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    /// A tool's answer to a preceding call
    ToolResult {
        /// Tool name
        name: String,
        /// Response body, `{"error": ...}` when the call failed
        response: Value,
    },
}

/// One turn of a transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Author
    pub role: Role,
    /// Payload
    #[serde(flatten)]
    pub content: TurnContent,
}

impl ChatTurn {
    /// Text written by the human
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text { text: text.into() },
        }
    }

    /// Text written by the model
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::Text { text: text.into() },
        }
    }

    /// Tool request emitted by the model
    pub fn tool_call(name: impl Into<String>, args: Value) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::ToolCall {
                name: name.into(),
                args,
                thought_signature: None,
            },
        }
    }

    /// Tool answer fed back to the model
    pub fn tool_result(name: impl Into<String>, response: Value) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::ToolResult {
                name: name.into(),
                response,
            },
        }
    }

    /// Text of the turn, if it is a text turn
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            TurnContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl From<ToolCall> for ChatTurn {
    fn from(call: ToolCall) -> Self {
        Self {
            role: Role::Model,
            content: TurnContent::ToolCall {
                name: call.name,
                args: call.args,
                thought_signature: call.thought_signature,
            },
        }
    }
}

/// A tool advertised to the generation provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Unique tool name
    pub name: String,
    /// What the tool does
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments object
    #[serde(default, alias = "inputSchema")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse_step(value: Value) -> StepDefinition {
        serde_json::from_value(value).expect("valid step json")
    }

    #[test]
    fn test_type_defaults_to_text() {
        let step = parse_step(json!({"id": "a", "prompt": "hi"}))
            .to_step()
            .expect("text step");
        assert_eq!(step.kind, StepKind::Text);
        assert_eq!(step.prompt, "hi");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse_step(json!({"id": "a", "type": "shell"}))
            .to_step()
            .unwrap_err();
        assert!(matches!(err, StepDefinitionError::UnknownType { .. }));
    }

    #[test]
    fn test_selector_requires_source() {
        let err = parse_step(json!({"id": "pick", "type": "selector"}))
            .to_step()
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "step 'pick' of type 'selector' requires field 'source'"
        );
    }

    #[test]
    fn test_tool_args_must_be_object() {
        let err = parse_step(json!({"id": "t", "type": "tool", "tool": "x", "args": [1]}))
            .to_step()
            .unwrap_err();
        assert_eq!(err, StepDefinitionError::InvalidArgs("t".into()));
    }

    #[test]
    fn test_templatable_fields_cover_every_variant_field() {
        let step = parse_step(json!({
            "id": "t",
            "type": "tool",
            "tool": "search",
            "prompt": "p",
            "if": "{{a}} == yes",
            "args": {"q": "{{b}}", "nested": {"list": ["{{c}}", 3]}}
        }))
        .to_step()
        .expect("tool step");

        let mut fields = step.templatable_fields();
        fields.sort();
        assert_eq!(fields, vec!["p", "{{a}} == yes", "{{b}}", "{{c}}"]);
    }

    #[test]
    fn test_wire_names_survive_round_trip() {
        let step = parse_step(json!({
            "id": "w",
            "type": "file_write",
            "tabId": "t1",
            "if": "a != b",
            "filename": "out.json",
            "content": "{{x}}"
        }));
        assert_eq!(step.tab_id.as_deref(), Some("t1"));

        let back = serde_json::to_value(&step).expect("serialize");
        assert_eq!(back["if"], "a != b");
        assert_eq!(back["type"], "file_write");
        assert_eq!(back["tab_id"], "t1");
        assert!(back.get("output").is_none());
    }

    #[test]
    fn test_chat_turn_serialization() {
        let turn = ChatTurn::tool_call("search", json!({"q": "rust"}));
        let value = serde_json::to_value(&turn).expect("serialize");
        assert_eq!(
            value,
            json!({"role": "model", "type": "tool_call", "name": "search", "args": {"q": "rust"}})
        );
        let back: ChatTurn = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, turn);
    }

    #[test]
    fn test_tool_call_turn_keeps_signature() {
        let call = ToolCall {
            thought_signature: Some("sig-1".into()),
            ..ToolCall::new("search", json!({}))
        };
        let value = serde_json::to_value(ChatTurn::from(call)).expect("serialize");
        assert_eq!(value["thought_signature"], "sig-1");
        let back: ChatTurn = serde_json::from_value(value).expect("deserialize");
        assert!(matches!(
            back.content,
            TurnContent::ToolCall { thought_signature: Some(ref s), .. } if s == "sig-1"
        ));
    }

    #[test]
    fn test_flow_keeps_unknown_keys() {
        let flow: FlowDefinition = serde_json::from_value(json!({
            "model": "m",
            "steps": [{"id": "a"}],
            "description": "kept"
        }))
        .expect("flow");
        assert_eq!(flow.system_prompt, "");
        assert_eq!(flow.extra["description"], "kept");
    }
}
