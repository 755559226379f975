use fast_core::session::{SessionLog, SessionWriter};
use fast_flow::FlowRun;
use fast_protocol::{ChatTurn, FlowDefinition};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashMap;

fn sample_flow() -> FlowDefinition {
    serde_json::from_value(json!({
        "model": "gemini-2.0-flash",
        "system_prompt": "Be brief.",
        "mcp_servers": ["files"],
        "steps": [
            {"id": "draft", "prompt": "Write about {{input}}"},
            {"id": "review", "type": "interaction", "prompt": "{{draft}}"},
            {"id": "save", "type": "file_write", "filename": "./out.md", "content": "{{review}}"}
        ],
        "author": "someone"
    }))
    .expect("flow json")
}

fn sample_run() -> FlowRun {
    let results = HashMap::from([
        ("draft".to_string(), "A draft".to_string()),
        ("review".to_string(), "AI: A draft\nUser: ok\nAI: fine\n".to_string()),
        ("save".to_string(), "File saved to ./out.md".to_string()),
    ]);
    let transcripts = HashMap::from([(
        "review".to_string(),
        vec![
            ChatTurn::model("A draft"),
            ChatTurn::user("ok"),
            ChatTurn::model("fine"),
        ],
    )]);
    FlowRun {
        results,
        transcripts,
    }
}

#[tokio::test]
async fn test_session_log_round_trip_reproduces_results() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let flow = sample_flow();
    let run = sample_run();

    let log = SessionLog::new("blog", "rust", "clipboard text", &flow, &run);
    let path = SessionWriter::new(dir.path().join("logs")).write(&log).await?;

    assert!(path.starts_with(dir.path().join("logs")));
    assert!(path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("_blog.json")));

    let reloaded: SessionLog = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(reloaded.outputs(), run.results);
    assert_eq!(reloaded.flow_name, "blog");
    assert_eq!(reloaded.input, "rust");
    assert_eq!(reloaded.clipboard, "clipboard text");
    assert_eq!(reloaded.flow.steps[1].history, run.transcripts.get("review").cloned());
    assert_eq!(reloaded.flow.steps[0].history, None);
    assert_eq!(reloaded.flow.extra["author"], "someone");
    assert_eq!(reloaded.flow.mcp_servers, Some(vec!["files".to_string()]));
    Ok(())
}

#[tokio::test]
async fn test_session_log_keeps_flow_shape() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let log = SessionLog::new("blog", "", "", &sample_flow(), &sample_run());
    let path = SessionWriter::new(dir.path()).write(&log).await?;

    let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    assert_eq!(raw["model"], "gemini-2.0-flash");
    assert_eq!(raw["flow_name"], "blog");
    assert_eq!(raw["steps"][0]["output"], "A draft");
    assert_eq!(raw["steps"][2]["type"], "file_write");
    assert!(raw["timestamp"].is_string());
    Ok(())
}
