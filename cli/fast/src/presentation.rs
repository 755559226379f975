//! Terminal rendering of flow events and the stdin side of human input.

use console::style;
use fast_flow::{FileEntry, FlowEvent, InputKind, InputRequest, Presentation, StepStates};
use fast_protocol::END_OF_INTERACTION;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Typed by the user to end an open interaction
pub const DONE_COMMAND: &str = "/done";

const PREVIEW_WIDTH: usize = 60;

/// One spinner per running step, plus the prompts for human input
pub struct Terminal {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
    streams: HashMap<String, String>,
    states: StepStates,
}

impl Terminal {
    /// Renderer for the given step ids
    pub fn new<'a>(step_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(ProgressDrawTarget::stdout()),
            bars: HashMap::new(),
            streams: HashMap::new(),
            states: StepStates::new(step_ids),
        }
    }

    /// Update the display for one event
    pub fn render(&mut self, event: &FlowEvent) {
        if let Err(e) = self.states.apply(event) {
            warn!("{}", e);
        }

        match event {
            FlowEvent::StepStarted { step_id } => {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.cyan} {prefix:.bold} {wide_msg:.dim}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar.set_prefix(step_id.clone());
                bar.set_message("running");
                bar.enable_steady_tick(Duration::from_millis(100));
                self.bars.insert(step_id.clone(), bar);
            }
            FlowEvent::StepWaiting { step_id } => self.message(step_id, "waiting for input".into()),
            FlowEvent::StepResumed { step_id } => self.message(step_id, "running".into()),
            FlowEvent::StepOutput { step_id, text } => {
                self.print(format!("{}\n{}", style(format!("[{step_id}]")).cyan().bold(), text));
            }
            FlowEvent::StepChunk { step_id, text } => {
                let stream = self.streams.entry(step_id.clone()).or_default();
                stream.push_str(text);
                let preview = tail(stream.lines().last().unwrap_or_default(), PREVIEW_WIDTH);
                self.message(step_id, preview);
            }
            FlowEvent::ToolCallStarted { step_id, tool } => {
                self.message(step_id, format!("calling {tool}…"));
            }
            FlowEvent::ToolCallFinished {
                step_id,
                tool,
                success,
            } => {
                let mark = if *success {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                self.print(format!("  {} {} {}", mark, style(step_id).dim(), tool));
            }
            FlowEvent::StepDone {
                step_id, skipped, ..
            } => {
                self.streams.remove(step_id);
                if let Some(bar) = self.bars.remove(step_id) {
                    bar.set_style(finished_style());
                    bar.set_prefix(format!("{} {}", style("✓").green(), step_id));
                    bar.finish_with_message(if *skipped { "skipped" } else { "done" });
                }
            }
            FlowEvent::StepFailed { step_id, error } => {
                if let Some(bar) = self.bars.remove(step_id) {
                    bar.set_style(finished_style());
                    bar.set_prefix(format!("{} {}", style("✗").red(), step_id));
                    bar.abandon_with_message(style(error).red().to_string());
                }
            }
        }
    }

    /// Answer one input request from stdin. Spinners are hidden meanwhile.
    pub async fn answer(&mut self, request: InputRequest) {
        self.multi.set_draw_target(ProgressDrawTarget::hidden());
        let answer = match &request.kind {
            InputKind::Text { single, .. } => ask_text(&request.step_id, *single).await,
            InputKind::Select { prompt, files } => ask_selection(&request.step_id, prompt, files).await,
        };
        self.multi.set_draw_target(ProgressDrawTarget::stdout());

        match answer {
            Some(answer) => {
                if request.reply.send(answer).is_err() {
                    warn!(step = %request.step_id, "Step stopped before its input arrived");
                }
            }
            // Dropping the reply fails the step with `InputClosed`.
            None => warn!(step = %request.step_id, "No input available"),
        }
    }

    /// Remove every spinner from the screen
    pub fn clear(&self) {
        if let Err(e) = self.multi.clear() {
            warn!("Failed to clear progress display: {}", e);
        }
    }

    fn message(&self, step_id: &str, message: String) {
        if let Some(bar) = self.bars.get(step_id) {
            bar.set_message(message);
        }
    }

    fn print(&self, text: String) {
        if self.multi.println(&text).is_err() {
            println!("{text}");
        }
    }
}

fn finished_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {prefix:.bold} {wide_msg:.dim}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Render events and answer input requests until the engine hangs up.
///
/// Requests are answered one at a time, so concurrent interactive steps take
/// turns at the prompt.
pub async fn present(mut presentation: Presentation, mut terminal: Terminal) -> Terminal {
    loop {
        tokio::select! {
            Some(event) = presentation.events.recv() => terminal.render(&event),
            Some(request) = presentation.input.recv() => terminal.answer(request).await,
            else => break,
        }
    }
    terminal
}

async fn ask_text(step_id: &str, single: bool) -> Option<String> {
    let label = style(format!("[{step_id}]")).cyan().bold();
    if single {
        println!("{label}");
    } else {
        println!("{} {}", label, style(format!("(type {DONE_COMMAND} to finish)")).dim());
    }

    match read_line(&format!("{} ", style("›").bold())).await {
        Some(line) => Some(text_answer(&line, single)),
        // A single answer is the step's result, so EOF leaves the step without one.
        None if single => None,
        // EOF ends an open interaction the same way `/done` does.
        None => Some(END_OF_INTERACTION.to_string()),
    }
}

async fn ask_selection(step_id: &str, prompt: &str, files: &[FileEntry]) -> Option<String> {
    println!("{}", style(format!("[{step_id}]")).cyan().bold());
    if !prompt.is_empty() {
        println!("{prompt}");
    }
    for (index, file) in files.iter().enumerate() {
        println!(
            "  {:>3}. {}  {}",
            index + 1,
            file.name,
            style(file.description()).dim()
        );
    }

    loop {
        let line = read_line(&format!("{} ", style("select ›").bold())).await?;
        match parse_selection(&line, files) {
            Some(name) => return Some(name),
            None => println!(
                "{}",
                style(format!("Enter a number from 1 to {} or a file name", files.len())).yellow()
            ),
        }
    }
}

/// `/done` ends an open interaction; anything else is passed through trimmed.
pub fn text_answer(line: &str, single: bool) -> String {
    let trimmed = line.trim();
    if !single && trimmed == DONE_COMMAND {
        END_OF_INTERACTION.to_string()
    } else {
        trimmed.to_string()
    }
}

/// A 1-based index into `files` or one of their names.
pub fn parse_selection(line: &str, files: &[FileEntry]) -> Option<String> {
    let trimmed = line.trim();
    if let Ok(index) = trimmed.parse::<usize>() {
        return index
            .checked_sub(1)
            .and_then(|i| files.get(i))
            .map(|f| f.name.clone());
    }
    files
        .iter()
        .find(|f| f.name == trimmed)
        .map(|f| f.name.clone())
}

fn tail(text: &str, width: usize) -> String {
    let count = text.chars().count();
    if count <= width {
        text.to_string()
    } else {
        let skipped: String = text.chars().skip(count - width).collect();
        format!("…{skipped}")
    }
}

/// Read one line from stdin without blocking the runtime. `None` on EOF.
async fn read_line(prompt: &str) -> Option<String> {
    use std::io::{BufRead, Write};

    print!("{prompt}");
    let _ = std::io::stdout().flush();
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line),
        }
    })
    .await
    .ok()
    .flatten();
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use pretty_assertions::assert_eq;

    fn files() -> Vec<FileEntry> {
        ["notes.md", "draft.txt"]
            .into_iter()
            .map(|name| FileEntry {
                name: name.to_string(),
                size: 10,
                modified: Local::now(),
            })
            .collect()
    }

    #[test]
    fn test_selection_by_index_or_name() {
        let files = files();
        assert_eq!(parse_selection("1", &files), Some("notes.md".to_string()));
        assert_eq!(parse_selection(" 2\n", &files), Some("draft.txt".to_string()));
        assert_eq!(parse_selection("draft.txt", &files), Some("draft.txt".to_string()));
        assert_eq!(parse_selection("0", &files), None);
        assert_eq!(parse_selection("3", &files), None);
        assert_eq!(parse_selection("other.md", &files), None);
    }

    #[test]
    fn test_done_maps_to_end_token() {
        assert_eq!(text_answer("/done\n", false), END_OF_INTERACTION);
        assert_eq!(text_answer("  more please \n", false), "more please");
    }

    #[test]
    fn test_single_answer_keeps_done_as_text() {
        assert_eq!(text_answer("/done\n", true), "/done");
        assert_eq!(text_answer(" report.md\n", true), "report.md");
    }

    #[test]
    fn test_tail_keeps_end_of_line() {
        assert_eq!(tail("short", 10), "short");
        assert_eq!(tail("abcdefghij", 4), "…ghij");
    }
}
