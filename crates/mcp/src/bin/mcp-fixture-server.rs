//! A small stdio MCP server used by the integration tests.
//!
//! Tools:
//! - `echo {text}`: returns the text
//! - `slow_echo {text, delay_ms}`: returns the text after a delay
//! - `image`: returns image content only
//! - `fail`: reports `isError`
//! - `multi`: returns a text part and an embedded resource
//! - `env`: returns `$FIXTURE_GREETING`
//! - `client_replies`: what the client answered to the server's own requests
//! - `announce`: adds the `late` tool and sends `tools/list_changed`
//! - `exit`: terminates the process without replying
//!
//! `tools/list` is paginated three tools per page.

use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

const PAGE_SIZE: usize = 3;

#[derive(Default)]
struct State {
    announced: bool,
    client_replies: Vec<Value>,
}

type Out = Arc<Mutex<tokio::io::Stdout>>;

async fn write(out: &Out, message: Value) {
    let mut line = message.to_string();
    line.push('\n');
    let mut out = out.lock().await;
    let _ = out.write_all(line.as_bytes()).await;
    let _ = out.flush().await;
}

fn text(text: impl Into<String>) -> Value {
    json!({ "content": [{ "type": "text", "text": text.into() }] })
}

fn tool_names(state: &State) -> Vec<&'static str> {
    let mut names = vec![
        "echo",
        "slow_echo",
        "image",
        "fail",
        "multi",
        "env",
        "client_replies",
        "announce",
        "exit",
    ];
    if state.announced {
        names.push("late");
    }
    names
}

fn list_page(state: &State, cursor: Option<&str>) -> Value {
    let names = tool_names(state);
    let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
    let end = (start + PAGE_SIZE).min(names.len());
    let tools: Vec<Value> = names[start.min(end)..end]
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "description": format!("fixture tool {name}"),
                "inputSchema": {
                    "type": "object",
                    "properties": { "text": { "type": "string" } }
                }
            })
        })
        .collect();
    let mut result = json!({ "tools": tools });
    if end < names.len() {
        result["nextCursor"] = json!(end.to_string());
    }
    result
}

async fn call_tool(params: &Value, state: &Mutex<State>, out: &Out) -> Value {
    let name = params["name"].as_str().unwrap_or_default();
    let args = &params["arguments"];
    match name {
        "echo" => text(args["text"].as_str().unwrap_or_default()),
        "slow_echo" => {
            let delay = args["delay_ms"].as_u64().unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            text(args["text"].as_str().unwrap_or_default())
        }
        "image" => json!({
            "content": [{ "type": "image", "data": "iVBORw0KGgo=", "mimeType": "image/png" }]
        }),
        "fail" => json!({
            "content": [{ "type": "text", "text": "boom" }],
            "isError": true
        }),
        "multi" => json!({
            "content": [
                { "type": "text", "text": "first" },
                { "type": "resource", "resource": { "uri": "memo://1", "text": "second" } }
            ]
        }),
        "env" => text(std::env::var("FIXTURE_GREETING").unwrap_or_default()),
        "client_replies" => text(Value::Array(state.lock().await.client_replies.clone()).to_string()),
        "announce" => {
            state.lock().await.announced = true;
            write(
                out,
                json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" }),
            )
            .await;
            text("announced")
        }
        "late" => text("late tool"),
        "exit" => std::process::exit(0),
        other => json!({
            "content": [{ "type": "text", "text": format!("unknown tool {other}") }],
            "isError": true
        }),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    eprintln!("fixture server ready");
    let out: Out = Arc::new(Mutex::new(tokio::io::stdout()));
    let state = Arc::new(Mutex::new(State::default()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            eprintln!("ignoring invalid line: {line}");
            continue;
        };
        let method = message["method"].as_str().map(str::to_string);
        let id = message.get("id").cloned();

        match (method.as_deref(), id) {
            // Replies to our own requests.
            (None, Some(_)) => state.lock().await.client_replies.push(message),
            (Some("notifications/initialized"), None) => {
                write(&out, json!({ "jsonrpc": "2.0", "id": "srv-ping", "method": "ping" })).await;
                write(
                    &out,
                    json!({ "jsonrpc": "2.0", "id": "srv-sample", "method": "sampling/createMessage", "params": {} }),
                )
                .await;
            }
            (Some(_), None) => {}
            (Some("initialize"), Some(id)) => {
                let result = json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": { "listChanged": true } },
                    "serverInfo": { "name": "crewforge-fixture", "version": "1.0.0" }
                });
                write(&out, json!({ "jsonrpc": "2.0", "id": id, "result": result })).await;
            }
            (Some("ping"), Some(id)) => {
                write(&out, json!({ "jsonrpc": "2.0", "id": id, "result": {} })).await;
            }
            (Some("tools/list"), Some(id)) => {
                let cursor = message["params"]["cursor"].as_str();
                let result = list_page(&*state.lock().await, cursor);
                write(&out, json!({ "jsonrpc": "2.0", "id": id, "result": result })).await;
            }
            (Some("tools/call"), Some(id)) => {
                let out = Arc::clone(&out);
                let state = Arc::clone(&state);
                let params = message["params"].clone();
                tokio::spawn(async move {
                    let result = call_tool(&params, &state, &out).await;
                    write(&out, json!({ "jsonrpc": "2.0", "id": id, "result": result })).await;
                });
            }
            (Some(other), Some(id)) => {
                let error = json!({ "code": -32601, "message": format!("unknown method {other}") });
                write(&out, json!({ "jsonrpc": "2.0", "id": id, "error": error })).await;
            }
            (None, None) => {}
        }
    }
}
