use fast_gemini::{ClientConfig, GeminiClient};
use fast_protocol::{
    ChatTurn, Generation, GenerationError, GenerationRequest, Generator, ToolCall,
    ToolDeclaration,
};
use mockito::{Matcher, Server};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

fn client_for(server: &Server) -> GeminiClient {
    client_with_timeout(server, 5)
}

fn client_with_timeout(server: &Server, timeout_seconds: u64) -> GeminiClient {
    GeminiClient::new(ClientConfig {
        base_url: server.url(),
        api_key: SecretString::from("test-key"),
        timeout_seconds,
    })
    .expect("client")
}

fn sse_event(text: &str) -> String {
    let event = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]});
    format!("data: {event}\r\n\r\n")
}

fn request<'a>(history: &'a [ChatTurn], tools: &'a [ToolDeclaration]) -> GenerationRequest<'a> {
    GenerationRequest {
        model: "gemini-test",
        system_prompt: "You are terse.",
        history,
        tools,
    }
}

#[tokio::test]
async fn test_generate_text() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_header("x-goog-api-key", "test-key")
        .match_body(Matcher::PartialJson(json!({
            "contents": [{"role": "user", "parts": [{"text": "Hello"}]}],
            "systemInstruction": {"parts": [{"text": "You are terse."}]}
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Hi"}, {"text": " there"}]},
                    "finishReason": "STOP"
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let history = vec![ChatTurn::user("Hello")];
    let outcome = client_for(&server).generate(request(&history, &[]), None).await?;

    assert_eq!(outcome, Generation::Text("Hi there".into()));
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_generate_declares_tools_and_returns_call() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .match_body(Matcher::PartialJson(json!({
            "tools": [{"functionDeclarations": [{
                "name": "read_file",
                "description": "Read a file",
                "parameters": {"type": "object", "properties": {"path": {"type": "string"}}}
            }]}]
        })))
        .with_status(200)
        .with_body(
            json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"functionCall": {"name": "read_file", "args": {"path": "a.txt"}}}
                ]}}]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let tools = vec![ToolDeclaration {
        name: "read_file".into(),
        description: "Read a file".into(),
        input_schema: json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {"path": {"type": "string"}},
            "additionalProperties": false
        }),
    }];
    let history = vec![ChatTurn::user("Open a.txt")];
    let outcome = client_for(&server)
        .generate(request(&history, &tools), None)
        .await?;

    assert_eq!(
        outcome,
        Generation::ToolCall(ToolCall::new("read_file", json!({"path": "a.txt"})))
    );
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_api_error_is_reported() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .with_status(400)
        .with_body(
            json!({"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}})
                .to_string(),
        )
        .create_async()
        .await;

    let history = vec![ChatTurn::user("Hello")];
    let err = client_for(&server)
        .generate(request(&history, &[]), None)
        .await
        .expect_err("should fail");

    match err {
        GenerationError::Api { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("API key not valid"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_blocked_prompt() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/models/gemini-test:generateContent")
        .with_status(200)
        .with_body(json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string())
        .create_async()
        .await;

    let history = vec![ChatTurn::user("Hello")];
    let err = client_for(&server)
        .generate(request(&history, &[]), None)
        .await
        .expect_err("should be blocked");
    assert!(matches!(err, GenerationError::Blocked(reason) if reason == "SAFETY"));
}

#[tokio::test]
async fn test_streaming_delivers_chunks() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let body = [
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}]}}]}),
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "lo"}]}}]}),
        json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "!"}]}, "finishReason": "STOP"}]}),
    ]
    .iter()
    .map(|event| format!("data: {event}\r\n\r\n"))
    .collect::<String>();

    let mock = server
        .mock(
            "POST",
            Matcher::Regex(r"^/models/gemini-test:streamGenerateContent".into()),
        )
        .match_query(Matcher::UrlEncoded("alt".into(), "sse".into()))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let chunks = Mutex::new(Vec::new());
    let sink = |chunk: &str| chunks.lock().expect("lock").push(chunk.to_string());
    let history = vec![ChatTurn::user("Hello")];
    let outcome = client_for(&server)
        .generate(request(&history, &[]), Some(&sink))
        .await?;

    assert_eq!(outcome, Generation::Text("Hello!".into()));
    assert_eq!(
        *chunks.lock().expect("lock"),
        vec!["Hel".to_string(), "lo".to_string(), "!".to_string()]
    );
    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_stream_may_outlast_timeout_while_chunks_keep_coming() -> anyhow::Result<()> {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock(
            "POST",
            Matcher::Regex(r"^/models/gemini-test:streamGenerateContent".into()),
        )
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(|out| {
            for text in ["a", "b", "c", "d"] {
                out.write_all(sse_event(text).as_bytes())?;
                out.flush()?;
                std::thread::sleep(Duration::from_millis(400));
            }
            Ok(())
        })
        .create_async()
        .await;

    let sink = |_: &str| {};
    let history = vec![ChatTurn::user("Hello")];
    let outcome = client_with_timeout(&server, 1)
        .generate(request(&history, &[]), Some(&sink))
        .await?;
    assert_eq!(outcome, Generation::Text("abcd".into()));
    Ok(())
}

#[tokio::test]
async fn test_stalled_stream_times_out() {
    // Bypass mockito's server pool: the stalled body thread would keep a
    // pooled server busy after this test and delay the next test using it.
    let mut server = Server::new_with_opts_async(mockito::ServerOpts::default()).await;
    let _mock = server
        .mock(
            "POST",
            Matcher::Regex(r"^/models/gemini-test:streamGenerateContent".into()),
        )
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_chunked_body(|out| {
            out.write_all(sse_event("partial").as_bytes())?;
            out.flush()?;
            std::thread::sleep(Duration::from_millis(2500));
            Ok(())
        })
        .create_async()
        .await;

    let sink = |_: &str| {};
    let history = vec![ChatTurn::user("Hello")];
    let err = client_with_timeout(&server, 1)
        .generate(request(&history, &[]), Some(&sink))
        .await
        .unwrap_err();
    match err {
        GenerationError::Transport(message) => assert!(message.contains("within 1s"), "{message}"),
        other => panic!("expected a transport error, got {other:?}"),
    }
}
