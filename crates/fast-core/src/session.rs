//! Session logs: the flow definition with every step's output and
//! transcript merged in, plus the run's inputs. Written once, never read
//! back by the engine.

use crate::{CoreError, Result};
use chrono::{DateTime, Local};
use fast_flow::FlowRun;
use fast_protocol::FlowDefinition;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// One persisted run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLog {
    /// When the run finished
    pub timestamp: DateTime<Local>,
    /// Flow name as given on the command line
    pub flow_name: String,
    /// Command-line input
    pub input: String,
    /// Clipboard text at start
    pub clipboard: String,
    /// The flow, steps annotated with `output` and `history`
    #[serde(flatten)]
    pub flow: FlowDefinition,
}

impl SessionLog {
    /// Build a log for a finished run
    pub fn new(
        flow_name: &str,
        input: &str,
        clipboard: &str,
        flow: &FlowDefinition,
        run: &FlowRun,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            flow_name: flow_name.to_string(),
            input: input.to_string(),
            clipboard: clipboard.to_string(),
            flow: run.annotate(flow),
        }
    }

    /// `2024-05-01_14-03-59_<flow>.json`. Path separators in the flow name
    /// become `_` so the log always lands directly in the logs directory.
    pub fn file_name(&self) -> String {
        let flow_name = self.flow_name.replace(['/', '\\'], "_");
        format!(
            "{}_{}.json",
            self.timestamp.format("%Y-%m-%d_%H-%M-%S"),
            flow_name
        )
    }

    /// Step id to recorded output
    pub fn outputs(&self) -> HashMap<String, String> {
        self.flow
            .steps
            .iter()
            .filter_map(|s| s.output.clone().map(|o| (s.id.clone(), o)))
            .collect()
    }
}

/// Writes session logs into a directory
pub struct SessionWriter {
    dir: PathBuf,
}

impl SessionWriter {
    /// Writer for `dir`, created on first write
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Write the log as pretty JSON and return its path.
    #[instrument(skip(self, log), fields(flow = %log.flow_name))]
    pub async fn write(&self, log: &SessionLog) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| CoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
        let path = self.dir.join(log.file_name());
        let json = serde_json::to_string_pretty(log)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| CoreError::Io {
                path: path.clone(),
                source,
            })?;
        info!("Wrote session log: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn log_for(flow_name: &str) -> SessionLog {
        let flow: FlowDefinition =
            serde_json::from_str(r#"{"model": "m", "steps": [{"id": "a"}]}"#).expect("flow");
        let mut log = SessionLog::new(flow_name, "", "", &flow, &FlowRun::default());
        log.timestamp = Local
            .with_ymd_and_hms(2024, 5, 1, 14, 3, 59)
            .single()
            .expect("valid time");
        log
    }

    #[test]
    fn test_file_name_format() {
        assert_eq!(log_for("draft").file_name(), "2024-05-01_14-03-59_draft.json");
    }

    #[test]
    fn test_file_name_flattens_path_separators() {
        assert_eq!(
            log_for("sub/x").file_name(),
            "2024-05-01_14-03-59_sub_x.json"
        );
        assert_eq!(
            log_for("..\\up").file_name(),
            "2024-05-01_14-03-59_.._up.json"
        );
    }

    #[tokio::test]
    async fn test_nested_flow_name_writes_into_logs_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let written = SessionWriter::new(dir.path())
            .write(&log_for("sub/x"))
            .await
            .expect("log written");
        assert_eq!(written.parent(), Some(dir.path()));
        assert!(written.exists());
    }
}
