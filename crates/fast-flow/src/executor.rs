//! Per-type step behaviour.

use crate::converse::Conversation;
use crate::engine::EngineSettings;
use crate::error::StepError;
use crate::events::{FileEntry, FlowEvent, FlowIo, InputKind};
use crate::plan::PlannedStep;
use crate::store::ResultStore;
use crate::template::Ambient;
use chrono::{DateTime, Local};
use fast_protocol::{
    ChatTurn, Generator, Role, StepKind, ToolProvider, TurnContent, END_OF_INTERACTION,
    SKIPPED_RESULT,
};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Extensions whose content is unwrapped from a Markdown code fence before writing
const STRUCTURED_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "xml", "csv"];

/// What a step produced
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Result text
    pub result: String,
    /// Conversation, for interaction steps and steps that used tools
    pub transcript: Option<Vec<ChatTurn>>,
    /// The guard was false
    pub skipped: bool,
}

impl StepOutcome {
    fn text(result: String) -> Self {
        Self {
            result,
            transcript: None,
            skipped: false,
        }
    }
}

/// Everything a step needs while it runs, shared by all step tasks
pub(crate) struct StepRunner {
    pub model: String,
    pub system_prompt: String,
    pub store: ResultStore,
    pub ambient: Ambient,
    pub generator: Arc<dyn Generator>,
    pub tools: Arc<dyn ToolProvider>,
    pub io: FlowIo,
    pub settings: EngineSettings,
}

impl StepRunner {
    fn fill(&self, text: &str) -> String {
        self.store.fill(text, &self.ambient)
    }

    fn conversation<'a>(&'a self, step_id: &'a str) -> Conversation<'a> {
        Conversation::new(
            step_id,
            self.generator.as_ref(),
            self.tools.as_ref(),
            &self.io,
            &self.settings,
        )
    }

    /// Evaluate the guard, then dispatch on the step type.
    #[instrument(skip(self, planned), fields(step = %planned.step.id, kind = %planned.step.kind))]
    pub async fn execute(&self, planned: &PlannedStep) -> Result<StepOutcome, StepError> {
        let step = &planned.step;
        if let Some(guard) = &planned.guard {
            if !guard.evaluate(|side| self.fill(side)) {
                info!("Guard is false, skipping");
                return Ok(StepOutcome {
                    result: SKIPPED_RESULT.to_string(),
                    transcript: None,
                    skipped: true,
                });
            }
        }

        let model = step.model.as_deref().unwrap_or(&self.model);
        match &step.kind {
            StepKind::Text => self.run_text(&step.id, model, &step.prompt).await,
            StepKind::Interaction { max_turns } => {
                self.run_interaction(&step.id, model, &step.prompt, *max_turns)
                    .await
            }
            StepKind::Selector { source } => {
                self.run_selector(&step.id, &step.prompt, source).await
            }
            StepKind::FileWrite { filename, content } => {
                self.run_file_write(filename, content).await
            }
            StepKind::Tool { tool, args } => self.run_tool(&step.id, tool, args).await,
        }
    }

    async fn run_text(
        &self,
        step_id: &str,
        model: &str,
        prompt: &str,
    ) -> Result<StepOutcome, StepError> {
        let history = vec![ChatTurn::user(self.fill(prompt))];
        let outcome = self
            .conversation(step_id)
            .converse(model, &self.system_prompt, &history, self.settings.streaming)
            .await?;

        let used_tools = outcome.turns.len() > 1;
        Ok(StepOutcome {
            result: outcome.text,
            transcript: used_tools.then(|| [history, outcome.turns].concat()),
            skipped: false,
        })
    }

    async fn run_interaction(
        &self,
        step_id: &str,
        model: &str,
        prompt: &str,
        max_turns: Option<u32>,
    ) -> Result<StepOutcome, StepError> {
        let filled = self.fill(prompt);
        if !filled.is_empty() {
            self.io.emit(FlowEvent::StepOutput {
                step_id: step_id.to_string(),
                text: filled.clone(),
            });
        }

        if max_turns == Some(1) {
            let answer = self
                .io
                .ask(
                    step_id,
                    InputKind::Text {
                        prompt: filled,
                        single: true,
                    },
                )
                .await?;
            if answer == END_OF_INTERACTION {
                return Err(StepError::InputClosed);
            }
            return Ok(StepOutcome::text(answer));
        }

        let mut history = Vec::new();
        if !filled.is_empty() {
            history.push(ChatTurn::model(filled));
        }

        let conversation = self.conversation(step_id);
        loop {
            let answer = self
                .io
                .ask(
                    step_id,
                    InputKind::Text {
                        prompt: String::new(),
                        single: false,
                    },
                )
                .await?;
            if answer == END_OF_INTERACTION {
                debug!(turns = history.len(), "Interaction ended by user");
                break;
            }

            history.push(ChatTurn::user(answer));
            let outcome = conversation
                .converse(model, &self.system_prompt, &history, false)
                .await?;
            self.io.emit(FlowEvent::StepOutput {
                step_id: step_id.to_string(),
                text: outcome.text,
            });
            history.extend(outcome.turns);
        }

        Ok(StepOutcome {
            result: render_transcript(&history),
            transcript: Some(history),
            skipped: false,
        })
    }

    async fn run_selector(
        &self,
        step_id: &str,
        prompt: &str,
        source: &str,
    ) -> Result<StepOutcome, StepError> {
        let dir = expand_home(&self.fill(source));
        let files = list_files(&dir).await?;
        if files.is_empty() {
            return Err(StepError::NothingToSelect(dir));
        }

        let selected = self
            .io
            .ask(
                step_id,
                InputKind::Select {
                    prompt: self.fill(prompt),
                    files: files.clone(),
                },
            )
            .await?;
        if !files.iter().any(|f| f.name == selected) {
            return Err(StepError::UnknownSelection(selected));
        }

        let path = dir.join(&selected);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StepError::Io {
                action: "reading",
                path,
                source,
            })?;
        Ok(StepOutcome::text(contents))
    }

    async fn run_file_write(
        &self,
        filename: &str,
        content: &str,
    ) -> Result<StepOutcome, StepError> {
        let path = expand_home(&self.fill(filename));
        let mut content = self.fill(content);
        let structured = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| STRUCTURED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if structured {
            content = strip_code_fence(&content).to_string();
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StepError::Io {
                    action: "creating directory",
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|source| StepError::Io {
                action: "writing",
                path: path.clone(),
                source,
            })?;

        info!(path = %path.display(), bytes = content.len(), "File written");
        Ok(StepOutcome::text(format!("File saved to {}", path.display())))
    }

    async fn run_tool(
        &self,
        step_id: &str,
        tool: &str,
        args: &Map<String, Value>,
    ) -> Result<StepOutcome, StepError> {
        let args = Value::Object(
            args.iter()
                .map(|(k, v)| (k.clone(), self.fill_value(v)))
                .collect(),
        );
        let response = self.conversation(step_id).invoke_tool(tool, args).await?;
        let result = match response {
            Value::String(text) => text,
            other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
        };
        Ok(StepOutcome::text(result))
    }

    fn fill_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.fill(s)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.fill_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.fill_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Render a transcript as `User:`/`AI:` lines.
pub fn render_transcript(turns: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Model => "AI",
        };
        let body = match &turn.content {
            TurnContent::Text { text } => text.clone(),
            TurnContent::ToolCall { name, .. } => format!("[tool call: {name}]"),
            TurnContent::ToolResult { name, .. } => format!("[tool result: {name}]"),
        };
        out.push_str(&format!("{speaker}: {body}\n"));
    }
    out
}

/// Remove a surrounding Markdown code fence, if there is one.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim_end()
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Regular files in `dir`, newest first.
async fn list_files(dir: &Path) -> Result<Vec<FileEntry>, StepError> {
    let io_err = |source: std::io::Error| StepError::Io {
        action: "listing",
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let metadata = entry.metadata().await.map_err(io_err)?;
        if metadata.is_dir() {
            continue;
        }
        let modified: DateTime<Local> = metadata.modified().map_err(io_err)?.into();
        files.push(FileEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified,
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("  ```\nx: 1\n```\n"), "x: 1");
        assert_eq!(strip_code_fence("plain"), "plain");
    }

    #[test]
    fn test_render_transcript_uses_placeholders_for_tools() {
        let turns = vec![
            ChatTurn::model("Draft ready"),
            ChatTurn::user("shorter"),
            ChatTurn::tool_call("search", json!({})),
            ChatTurn::tool_result("search", json!({"ok": true})),
            ChatTurn::model("Done"),
        ];
        assert_eq!(
            render_transcript(&turns),
            "AI: Draft ready\nUser: shorter\nAI: [tool call: search]\nUser: [tool result: search]\nAI: Done\n"
        );
    }

    #[test]
    fn test_expand_home_leaves_other_paths() {
        assert_eq!(expand_home("./out/a.txt"), PathBuf::from("./out/a.txt"));
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/notes"), home.join("notes"));
        }
    }

    #[tokio::test]
    async fn test_list_files_skips_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "a").expect("write");
        std::fs::create_dir(dir.path().join("sub")).expect("mkdir");

        let files = list_files(dir.path()).await.expect("listing");
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt"]);
        assert_eq!(files[0].size, 1);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_io_error() {
        let result = list_files(Path::new("/definitely/not/here")).await;
        assert!(matches!(result, Err(StepError::Io { action: "listing", .. })));
    }
}
