//! System clipboard through platform commands (`pbpaste`/`pbcopy`,
//! `wl-paste`/`wl-copy`, `xclip`, `xsel`).
//!
//! The first command that runs successfully wins. Reading never fails: an
//! unavailable clipboard reads as empty text.

use crate::{CoreError, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// A program plus its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardCommand {
    program: String,
    args: Vec<String>,
}

impl ClipboardCommand {
    /// A command line
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }
}

/// Clipboard backed by external commands
#[derive(Debug, Clone)]
pub struct SystemClipboard {
    readers: Vec<ClipboardCommand>,
    writers: Vec<ClipboardCommand>,
}

impl Default for SystemClipboard {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            Self::new(
                vec![ClipboardCommand::new("pbpaste", &[])],
                vec![ClipboardCommand::new("pbcopy", &[])],
            )
        } else {
            Self::new(
                vec![
                    ClipboardCommand::new("wl-paste", &["--no-newline"]),
                    ClipboardCommand::new("xclip", &["-selection", "clipboard", "-o"]),
                    ClipboardCommand::new("xsel", &["--clipboard", "--output"]),
                ],
                vec![
                    ClipboardCommand::new("wl-copy", &[]),
                    ClipboardCommand::new("xclip", &["-selection", "clipboard", "-i"]),
                    ClipboardCommand::new("xsel", &["--clipboard", "--input"]),
                ],
            )
        }
    }
}

impl SystemClipboard {
    /// Clipboard using the given commands, tried in order
    pub fn new(readers: Vec<ClipboardCommand>, writers: Vec<ClipboardCommand>) -> Self {
        Self { readers, writers }
    }

    /// Current clipboard text, empty when no reader works.
    pub async fn read(&self) -> String {
        for reader in &self.readers {
            match reader.command().stderr(Stdio::null()).output().await {
                Ok(output) if output.status.success() => {
                    debug!(program = %reader.program, bytes = output.stdout.len(), "Read clipboard");
                    return String::from_utf8_lossy(&output.stdout).into_owned();
                }
                Ok(output) => debug!(program = %reader.program, status = %output.status, "Clipboard reader failed"),
                Err(e) => debug!(program = %reader.program, error = %e, "Clipboard reader unavailable"),
            }
        }
        warn!("No clipboard reader available, using empty clipboard");
        String::new()
    }

    /// Replace the clipboard text.
    pub async fn write(&self, text: &str) -> Result<()> {
        let mut last_error = String::from("no clipboard writer configured");
        for writer in &self.writers {
            match Self::pipe_into(writer, text).await {
                Ok(()) => {
                    debug!(program = %writer.program, "Wrote clipboard");
                    return Ok(());
                }
                Err(e) => {
                    debug!(program = %writer.program, error = %e, "Clipboard writer failed");
                    last_error = format!("{}: {e}", writer.program);
                }
            }
        }
        Err(CoreError::Clipboard(last_error))
    }

    async fn pipe_into(writer: &ClipboardCommand, text: &str) -> std::io::Result<()> {
        let mut child = writer
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }
        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(std::io::Error::other(format!("exited with {status}")))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: String) -> ClipboardCommand {
        ClipboardCommand::new("sh", &["-c", &script])
    }

    #[tokio::test]
    async fn test_write_then_read_through_commands() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = dir.path().join("clip");
        let path = store.display().to_string();
        let clipboard = SystemClipboard::new(
            vec![sh(format!("cat '{path}'"))],
            vec![sh(format!("cat > '{path}'"))],
        );

        clipboard.write("copied text").await.expect("write");
        assert_eq!(clipboard.read().await, "copied text");
    }

    #[tokio::test]
    async fn test_falls_back_to_next_command() {
        let clipboard = SystemClipboard::new(
            vec![
                ClipboardCommand::new("fast-no-such-program", &[]),
                sh("printf second".to_string()),
            ],
            Vec::new(),
        );
        assert_eq!(clipboard.read().await, "second");
    }

    #[tokio::test]
    async fn test_unavailable_clipboard() {
        let clipboard = SystemClipboard::new(vec![sh("exit 1".into())], vec![sh("exit 1".into())]);
        assert_eq!(clipboard.read().await, "");
        assert!(matches!(
            clipboard.write("x").await,
            Err(CoreError::Clipboard(_))
        ));
    }
}
