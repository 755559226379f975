use crate::{McpError, McpServerConfig};
use fast_protocol::{ToolDeclaration, ToolError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const PROTOCOL_VERSION: &str = "2024-11-05";
const INIT_TIMEOUT: Duration = Duration::from_secs(10);
/// JSON-RPC "method not found"
const METHOD_NOT_FOUND: i64 = -32601;

type Reply = Result<Value, McpError>;
type Pending = Arc<std::sync::Mutex<Waiters>>;
type Writer = Arc<Mutex<ChildStdin>>;

/// Requests awaiting a response. `closed` is set once the reader stops.
#[derive(Default)]
struct Waiters {
    by_id: HashMap<u64, oneshot::Sender<Reply>>,
    closed: bool,
}

fn waiters(pending: &Pending) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a request's waiter when its future completes or is dropped.
struct PendingEntry<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        waiters(self.pending).by_id.remove(&self.id);
    }
}

#[derive(Debug, Deserialize)]
struct RpcMessage {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListToolsResult {
    #[serde(default)]
    tools: Vec<ToolDeclaration>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolResult {
    #[serde(default)]
    content: Vec<Value>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    structured_content: Option<Value>,
}

/// Connection to one MCP server child process.
///
/// Messages are newline-delimited JSON-RPC 2.0. A reader task routes each
/// response to the request that is waiting for its id.
pub struct McpClient {
    name: String,
    stdin: Writer,
    child: Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl McpClient {
    /// Launch the server process. Call [`McpClient::initialize`] before use.
    pub fn spawn(config: &McpServerConfig) -> Result<Self, McpError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| McpError::Spawn {
                server: config.name.clone(),
                source,
            })?;

        let missing = |pipe: &str| McpError::Protocol(format!("{} of '{}' unavailable", pipe, config.name));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let server = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %server, "{}", line);
                }
            });
        }

        let stdin: Writer = Arc::new(Mutex::new(stdin));
        let pending: Pending = Arc::default();
        let reader = tokio::spawn(read_loop(
            config.name.clone(),
            stdout,
            stdin.clone(),
            pending.clone(),
        ));

        Ok(Self {
            name: config.name.clone(),
            stdin,
            child: Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Server name from its config
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `initialize` handshake followed by `notifications/initialized`
    #[instrument(skip(self), fields(server = %self.name))]
    pub async fn initialize(&self) -> Result<(), McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {"name": "fast", "version": env!("CARGO_PKG_VERSION")}
        });
        let result = self.request("initialize", params, Some(INIT_TIMEOUT)).await?;
        let server_name = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!("Connected to MCP server '{}' ({})", self.name, server_name);
        self.notify("notifications/initialized", json!({})).await
    }

    /// All tools the server offers, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<ToolDeclaration>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let page: ListToolsResult = serde_json::from_value(self.request("tools/list", params, None).await?)
                .map_err(|e| McpError::Protocol(format!("bad tools/list result: {e}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.name, count = tools.len(), "Listed tools");
        Ok(tools)
    }

    /// Invoke a tool and convert its content into a JSON value.
    ///
    /// Text-only content becomes a string; `structuredContent` wins when
    /// present. `isError` results and transport failures are `ToolError`s.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let raw = self
            .request("tools/call", json!({ "name": name, "arguments": args }), None)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;
        let result: CallToolResult = serde_json::from_value(raw)
            .map_err(|e| ToolError::ExecutionError(format!("bad tools/call result: {e}")))?;

        let texts: Vec<&str> = result
            .content
            .iter()
            .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|c| c.get("text").and_then(Value::as_str))
            .collect();

        if result.is_error {
            let message = if texts.is_empty() {
                format!("tool '{name}' reported an error")
            } else {
                texts.join("\n")
            };
            return Err(ToolError::ExecutionError(message));
        }
        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        if !texts.is_empty() && texts.len() == result.content.len() {
            return Ok(Value::String(texts.join("\n")));
        }
        Ok(Value::Array(result.content))
    }

    /// Kill the child process.
    pub async fn shutdown(&self) {
        self.reader.abort();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(server = %self.name, "Kill failed (already exited?): {}", e);
        }
        info!("Stopped MCP server '{}'", self.name);
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = waiters(&self.pending);
            if waiters.closed {
                return Err(McpError::Closed(self.name.clone()));
            }
            waiters.by_id.insert(id, tx);
        }
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };

        let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send(&message).await?;

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    return Err(McpError::Timeout {
                        method: method.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| McpError::Closed(self.name.clone()))?
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await
    }

    async fn send(&self, message: &Value) -> Result<(), McpError> {
        write_line(&self.stdin, message)
            .await
            .map_err(|_| McpError::Closed(self.name.clone()))
    }

    #[cfg(test)]
    fn pending_requests(&self) -> usize {
        waiters(&self.pending).by_id.len()
    }
}

async fn write_line(stdin: &Writer, message: &Value) -> std::io::Result<()> {
    let mut line = message.to_string();
    line.push('\n');
    let mut stdin = stdin.lock().await;
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await
}

/// Answer a request the server sent us. Only `ping` is supported.
fn server_request_reply(id: Value, method: &str) -> Value {
    if method == "ping" {
        return json!({ "jsonrpc": "2.0", "id": id, "result": {} });
    }
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": METHOD_NOT_FOUND, "message": format!("Method not found: {method}") }
    })
}

async fn read_loop(server: String, stdout: ChildStdout, stdin: Writer, pending: Pending) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(server = %server, "Read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let message: RpcMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => {
                debug!(server = %server, "Ignoring non-JSON output: {}", line);
                continue;
            }
        };
        if let Some(method) = message.method {
            match message.id {
                Some(id) => {
                    debug!(server = %server, "Answering server request: {}", method);
                    let reply = server_request_reply(id, &method);
                    // Written off the reader so a full stdin pipe cannot stall it.
                    let (stdin, server) = (stdin.clone(), server.clone());
                    tokio::spawn(async move {
                        if let Err(e) = write_line(&stdin, &reply).await {
                            warn!(server = %server, "Reply to '{}' failed: {}", method, e);
                        }
                    });
                }
                None => debug!(server = %server, "Ignoring notification: {}", method),
            }
            continue;
        }
        let Some(id) = message.id.as_ref().and_then(Value::as_u64) else {
            continue;
        };
        let reply = match message.error {
            Some(err) => Err(McpError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(message.result.unwrap_or(Value::Null)),
        };
        let waiter = waiters(&pending).by_id.remove(&id);
        if let Some(tx) = waiter {
            let _ = tx.send(reply);
        }
    }
    // Dropping the senders wakes every waiter with `Closed`.
    let mut waiters = waiters(&pending);
    waiters.closed = true;
    waiters.by_id.clear();
    debug!(server = %server, "Reader finished");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn silent_server() -> McpServerConfig {
        McpServerConfig {
            name: "silent".to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "cat > /dev/null".to_string()],
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_abandoned_call_leaves_no_waiter() {
        let client = McpClient::spawn(&silent_server()).expect("spawn");
        let call = client.call_tool("anything", json!({}));
        assert!(tokio::time::timeout(Duration::from_millis(50), call)
            .await
            .is_err());
        assert_eq!(client.pending_requests(), 0);

        let err = client
            .request("tools/list", json!({}), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
        assert_eq!(client.pending_requests(), 0);
        client.shutdown().await;
    }

    #[test]
    fn test_server_requests_get_an_answer() {
        assert_eq!(
            server_request_reply(json!(7), "ping"),
            json!({"jsonrpc": "2.0", "id": 7, "result": {}})
        );
        assert_eq!(
            server_request_reply(json!("a"), "roots/list"),
            json!({
                "jsonrpc": "2.0",
                "id": "a",
                "error": {"code": -32601, "message": "Method not found: roots/list"}
            })
        );
    }
}
