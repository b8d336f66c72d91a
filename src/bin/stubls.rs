// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable stub LSP server for integration tests.
//!
//! Speaks Content-Length framed JSON-RPC over stdin/stdout. Diagnostics
//! are derived from document content: every `???` marker produces one
//! error ("type mismatch") at its position, so tests can steer the
//! diagnostic stream by editing fixture files. CLI flags control timing
//! and failure modes. No tokio; deferred notifications use
//! `std::thread`.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stub LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "stubls")]
struct Args {
    /// Only publish diagnostics on `didSave`, not `didOpen`/`didChange`.
    #[arg(long)]
    diagnostics_on_save: bool,

    /// Never publish diagnostics.
    #[arg(long)]
    no_diagnostics: bool,

    /// Delay before publishing diagnostics (milliseconds).
    #[arg(long, default_value_t = 0)]
    diagnostics_delay: u64,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Exit with code 1 after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send a workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,
}

/// A JSON-RPC request.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps stdout in production, a shared
/// `Vec<u8>` in tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Shared state for the stub server.
struct StubServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
    next_request_id: u64,
}

impl StubServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            next_request_id: 1000,
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(request) = serde_json::from_str::<Request>(&message) else {
                    continue;
                };

                self.handle_message(request);
            }
        }
    }

    fn handle_message(&mut self, request: Request) {
        let Some(method) = request.method.clone() else {
            return;
        };

        if request.id.is_some() {
            self.handle_request(&method, request);
        } else {
            self.handle_notification(&method, &request.params);
        }
    }

    fn handle_request(&mut self, method: &str, request: Request) {
        let Some(id) = request.id else { return };

        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("stubls: configured to fail on {method}"),
                }),
            });
            return;
        }

        let result = match method {
            "initialize" => Some(initialize_result()),
            "shutdown" => Some(Value::Null),
            "textDocument/hover" => self.handle_hover(&request.params),
            "textDocument/definition" => self.handle_definition(&request.params),
            _ => {
                self.send_response(&Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: None,
                    error: Some(RpcError {
                        code: -32601,
                        message: format!("stubls: method not found: {method}"),
                    }),
                });
                return;
            }
        };

        self.send_response(&Response {
            jsonrpc: "2.0".to_string(),
            id,
            result,
            error: None,
        });

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());

                    if !self.args.no_diagnostics && !self.args.diagnostics_on_save {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "textDocument/didChange" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    if let Some(text) = params
                        .get("contentChanges")
                        .and_then(Value::as_array)
                        .and_then(|arr| arr.last())
                        .and_then(|c| c.get("text"))
                        .and_then(Value::as_str)
                    {
                        self.documents.insert(uri.to_string(), text.to_string());
                    }

                    if !self.args.no_diagnostics && !self.args.diagnostics_on_save {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "textDocument/didSave" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    if !self.args.no_diagnostics {
                        self.publish_diagnostics(uri);
                    }
                }
            }
            "exit" => {
                std::process::exit(0);
            }
            // initialized and everything else are silently accepted
            _ => {}
        }
    }

    fn handle_hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        Some(serde_json::json!({
            "contents": {
                "kind": "markdown",
                "value": format!("def {word}: signature from stubls")
            }
        }))
    }

    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let def_patterns = [
            format!("def {word}"),
            format!("val {word}"),
            format!("object {word}"),
            format!("class {word}"),
            format!("fn {word}"),
        ];

        for (line_idx, line_text) in content.lines().enumerate() {
            for pattern in &def_patterns {
                if let Some(col_idx) = line_text.find(pattern.as_str()) {
                    let name_start = col_idx + pattern.len() - word.len();
                    return Some(serde_json::json!([{
                        "uri": uri,
                        "range": {
                            "start": { "line": line_idx, "character": name_start },
                            "end": { "line": line_idx, "character": name_start + word.len() }
                        }
                    }]));
                }
            }
        }

        None
    }

    /// Publishes one "type mismatch" error per `???` marker in the
    /// document, or an empty list when the document is clean.
    fn publish_diagnostics(&mut self, uri: &str) {
        let content = self.documents.get(uri).cloned().unwrap_or_default();
        let diagnostics = marker_diagnostics(&content);

        let notification = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": uri,
                "diagnostics": diagnostics
            }
        });

        let delay = self.args.diagnostics_delay;
        if delay > 0 {
            let writer = self.writer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(delay));
                send_message(&writer, &notification);
            });
        } else {
            send_message(&self.writer, &notification);
        }
    }

    fn send_configuration_request(&mut self) {
        let req_id = self.next_request_id;
        self.next_request_id += 1;
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "stubls" }] }
            }),
        );
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };

        write_framed(&self.writer, &json);

        self.response_count += 1;
        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

fn initialize_result() -> Value {
    serde_json::json!({
        "capabilities": {
            "hoverProvider": true,
            "definitionProvider": true,
            "textDocumentSync": {
                "openClose": true,
                "change": 1,
                "save": { "includeText": true }
            }
        },
        "serverInfo": { "name": "stubls" }
    })
}

/// One error diagnostic per `???` marker.
fn marker_diagnostics(content: &str) -> Vec<Value> {
    let mut diagnostics = Vec::new();

    for (line_idx, line_text) in content.lines().enumerate() {
        let mut start = 0;
        while let Some(pos) = line_text[start..].find("???") {
            let col = start + pos;
            diagnostics.push(serde_json::json!({
                "range": {
                    "start": { "line": line_idx, "character": col },
                    "end": { "line": line_idx, "character": col + 3 }
                },
                "severity": 1,
                "source": "stubls",
                "message": "type mismatch"
            }));
            start = col + 3;
        }
    }

    diagnostics
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = StubServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            diagnostics_on_save: false,
            no_diagnostics: false,
            diagnostics_delay: 0,
            response_delay: 0,
            drop_after: None,
            hang_on: vec![],
            fail_on: vec![],
            send_configuration_request: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = StubServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn initialize_request(id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "processId": null,
                "capabilities": {},
                "rootUri": "file:///tmp/test"
            }
        })
        .to_string()
    }

    fn did_open(uri: &str, text: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "scala",
                    "version": 1,
                    "text": text
                }
            }
        })
        .to_string()
    }

    fn shutdown_request(id: u64) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "shutdown",
            "params": null
        })
        .to_string()
    }

    #[test]
    fn initialize_advertises_sync_and_hover() {
        let mut input = frame(&initialize_request(1));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(default_args(), &input);

        let resp = &messages[0];
        assert_eq!(resp["id"], 1);
        let caps = &resp["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(caps["definitionProvider"], true);
        assert_eq!(caps["textDocumentSync"]["change"], 1);
    }

    #[test]
    fn marker_produces_type_mismatch_error() {
        let uri = "file:///w/src/App.scala";
        let text = "object App {\n  val x: Int = ???\n}\n";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, text)));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(default_args(), &input);

        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");

        let diagnostics = diag["params"]["diagnostics"]
            .as_array()
            .expect("diagnostics array");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0]["severity"], 1);
        assert_eq!(diagnostics[0]["message"], "type mismatch");
        assert_eq!(diagnostics[0]["range"]["start"]["line"], 1);
        assert_eq!(diagnostics[0]["range"]["start"]["character"], 15);
    }

    #[test]
    fn clean_document_publishes_empty_list() {
        let uri = "file:///w/src/App.scala";

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "object App\n")));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(default_args(), &input);

        let diag = messages
            .iter()
            .find(|m| {
                m.get("method").and_then(Value::as_str) == Some("textDocument/publishDiagnostics")
            })
            .expect("publishDiagnostics notification");

        assert_eq!(
            diag["params"]["diagnostics"]
                .as_array()
                .expect("diagnostics array")
                .len(),
            0
        );
    }

    #[test]
    fn diagnostics_on_save_suppresses_open_publish() {
        let uri = "file:///w/src/App.scala";
        let mut args = default_args();
        args.diagnostics_on_save = true;

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, "val x = ???\n")));
        input.extend(frame(&shutdown_request(2)));

        let messages = run_server_with(args, &input);
        assert!(
            !messages.iter().any(|m| {
                m.get("method").and_then(Value::as_str)
                    == Some("textDocument/publishDiagnostics")
            }),
            "didOpen must not publish with --diagnostics-on-save"
        );
    }

    #[test]
    fn hover_returns_word_signature() {
        let uri = "file:///w/src/App.scala";
        let text = "object App {\n  greet()\n}\n";

        let hover = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "textDocument/hover",
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": 1, "character": 2 }
            }
        })
        .to_string();

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, text)));
        input.extend(frame(&hover));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(default_args(), &input);
        let resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(2))
            .expect("hover response");

        let value = resp["result"]["contents"]["value"]
            .as_str()
            .expect("markdown value");
        assert!(value.contains("greet"));
    }

    #[test]
    fn definition_finds_def_site() {
        let uri = "file:///w/src/App.scala";
        let text = "object App {\n  def greet(): Unit = ()\n  greet()\n}\n";

        let definition = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "textDocument/definition",
            "params": {
                "textDocument": { "uri": uri },
                "position": { "line": 2, "character": 3 }
            }
        })
        .to_string();

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&did_open(uri, text)));
        input.extend(frame(&definition));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(default_args(), &input);
        let resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(2))
            .expect("definition response");

        let location = &resp["result"][0];
        assert_eq!(location["uri"], uri);
        assert_eq!(location["range"]["start"]["line"], 1);
        assert_eq!(location["range"]["start"]["character"], 6);
    }

    #[test]
    fn fail_on_returns_internal_error() {
        let mut args = default_args();
        args.fail_on = vec!["textDocument/hover".to_string()];

        let hover = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "textDocument/hover",
            "params": {
                "textDocument": { "uri": "file:///x" },
                "position": { "line": 0, "character": 0 }
            }
        })
        .to_string();

        let mut input = frame(&initialize_request(1));
        input.extend(frame(&hover));
        input.extend(frame(&shutdown_request(3)));

        let messages = run_server_with(args, &input);
        let resp = messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(2))
            .expect("hover response");
        assert_eq!(resp["error"]["code"], -32603);
    }

    #[test]
    fn request_id_echoed_for_string_ids() {
        let shutdown = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "string-id",
            "method": "shutdown",
            "params": null
        })
        .to_string();

        let mut input = frame(&initialize_request(42));
        input.extend(frame(&shutdown));

        let messages = run_server_with(default_args(), &input);
        assert_eq!(messages[0]["id"], 42);
        assert!(
            messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_str) == Some("string-id"))
        );
    }
}
