//! MCP test server binary for integration tests
//!
//! A minimal MCP server speaking newline-delimited JSON over stdin/stdout.
//! Integration tests spawn it through the process transport.
//!
//! # Handled Methods
//!
//! - `initialize`: protocol `2025-06-18`, advertises tools, resources and
//!   prompts. Also writes one diagnostic line to stderr.
//! - `notifications/initialized`: swallowed.
//! - `tools/list`: `echo` (returns `message`) and `fail` (error-tagged result).
//! - `tools/call`: as above; unknown tools get `-32602`.
//! - `resources/list` / `resources/read`: one text resource `memo://greeting`.
//! - `prompts/list` / `prompts/get`: one prompt `greet` taking `name`.
//! - `ping`: empty result.
//! - `exit` (notification): terminates the process, closing stdout.
//! - Anything else: `-32601 Method not found`.

use std::io::{self, BufRead, Write};

use serde_json::{json, Value};

fn main() {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let Ok(line) = line else {
            break;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                let response = make_error(&Value::Null, -32700, "Parse error");
                if writeln!(out, "{}", response).is_err() || out.flush().is_err() {
                    break;
                }
                continue;
            }
        };

        let method = request.get("method").and_then(Value::as_str).unwrap_or("");
        let Some(id) = request.get("id").cloned() else {
            if method == "exit" {
                return;
            }
            continue;
        };
        let params = request.get("params").cloned().unwrap_or(Value::Null);

        let response = match method {
            "initialize" => {
                eprintln!("mcp_test_server: handshake from client");
                ok(
                    &id,
                    json!({
                        "protocolVersion": "2025-06-18",
                        "capabilities": { "tools": {}, "resources": {}, "prompts": {} },
                        "serverInfo": { "name": "mcp-test-server", "version": "0.1.0" }
                    }),
                )
            }
            "tools/list" => ok(&id, json!({ "tools": tools() })),
            "tools/call" => handle_tools_call(&id, &params),
            "resources/list" => ok(
                &id,
                json!({ "resources": [{
                    "uri": "memo://greeting",
                    "name": "greeting",
                    "mimeType": "text/plain"
                }] }),
            ),
            "resources/read" => handle_resources_read(&id, &params),
            "prompts/list" => ok(
                &id,
                json!({ "prompts": [{
                    "name": "greet",
                    "description": "Greets someone",
                    "arguments": [{ "name": "name", "required": true }]
                }] }),
            ),
            "prompts/get" => handle_prompts_get(&id, &params),
            "ping" => ok(&id, json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {}", method)),
        };

        if writeln!(out, "{}", response).is_err() || out.flush().is_err() {
            break;
        }
    }
}

fn tools() -> Value {
    json!([
        {
            "name": "echo",
            "description": "Echoes input",
            "inputSchema": {
                "type": "object",
                "properties": { "message": { "type": "string" } }
            }
        },
        {
            "name": "fail",
            "description": "Always reports a tool-level failure",
            "inputSchema": { "type": "object" }
        }
    ])
}

fn handle_tools_call(id: &Value, params: &Value) -> Value {
    let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
    match tool_name {
        "echo" => {
            let message = params
                .get("arguments")
                .and_then(|a| a.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("");
            ok(
                id,
                json!({ "content": [{ "type": "text", "text": message }], "isError": false }),
            )
        }
        "fail" => ok(
            id,
            json!({ "content": [{ "type": "text", "text": "deliberate failure" }], "isError": true }),
        ),
        other => make_error(id, -32602, &format!("Unknown tool: {}", other)),
    }
}

fn handle_resources_read(id: &Value, params: &Value) -> Value {
    match params.get("uri").and_then(Value::as_str) {
        Some("memo://greeting") => ok(
            id,
            json!({ "contents": [{
                "uri": "memo://greeting",
                "mimeType": "text/plain",
                "text": "hello from stdio"
            }] }),
        ),
        other => make_error(id, -32002, &format!("Resource not found: {:?}", other)),
    }
}

fn handle_prompts_get(id: &Value, params: &Value) -> Value {
    if params.get("name").and_then(Value::as_str) != Some("greet") {
        return make_error(id, -32602, "Unknown prompt");
    }
    let name = params
        .get("arguments")
        .and_then(|a| a.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("stranger");
    ok(
        id,
        json!({
            "description": "A greeting",
            "messages": [{
                "role": "user",
                "content": { "type": "text", "text": format!("Say hello to {}", name) }
            }]
        }),
    )
}

fn ok(id: &Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn make_error(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}
