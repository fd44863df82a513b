//! MCP server loop: one JSON-RPC message per line on the input, one
//! response per line on the output.

use matbridge_core::{tool_specs, ToolRouter};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::protocol::{error_codes, JsonRpcRequest, JsonRpcResponse};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "matbridge";

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

pub struct Server {
    router: ToolRouter,
}

impl Server {
    pub fn new(router: ToolRouter) -> Self {
        Self { router }
    }

    /// Read requests until EOF, answering each on `writer`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let Some(response) = self.handle_line(&line).await else {
                continue;
            };
            let mut text = serde_json::to_string(&response)?;
            text.push('\n');
            writer.write_all(text.as_bytes()).await?;
            writer.flush().await?;
        }
        info!("input closed, stopping server");
        Ok(())
    }

    /// Answer one line; `None` for blank lines and notifications.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let raw: Value = match serde_json::from_str(line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "unparseable message");
                return Some(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("parse error: {e}"),
                ));
            }
        };
        let request: JsonRpcRequest = match serde_json::from_value(raw.clone()) {
            Ok(request) => request,
            Err(e) => {
                let id = raw.get("id").cloned().and_then(|id| serde_json::from_value(id).ok());
                return Some(JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("invalid request: {e}"),
                ));
            }
        };
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                error_codes::INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            ));
        }
        self.handle(request).await
    }

    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(method = %request.method, "request");
        if request.is_notification() {
            return None;
        }
        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(
                id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {"name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION")},
                    "capabilities": {"tools": {}},
                }),
            ),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, json!({"tools": tool_specs()})),
            "tools/call" => {
                let params = request.params.unwrap_or(Value::Null);
                match serde_json::from_value::<CallParams>(params) {
                    Ok(call) => {
                        let out = self.router.call(&call.name, call.arguments).await;
                        JsonRpcResponse::success(id, tool_result(&out))
                    }
                    Err(e) => JsonRpcResponse::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("invalid tools/call params: {e}"),
                    ),
                }
            }
            other => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        };
        Some(response)
    }
}

/// Wrap a tool response as MCP text content.
fn tool_result(out: &Value) -> Value {
    let failed = out.get("success") == Some(&Value::Bool(false));
    json!({
        "content": [{"type": "text", "text": out.to_string()}],
        "isError": failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use matbridge_core::fakes::MemoryFigureSink;
    use matbridge_core::{BridgeConfig, ExecutionController, SessionPool};
    use matbridge_interp::InterpEngine;

    fn server(dir: &std::path::Path) -> Server {
        let config = Arc::new(BridgeConfig {
            scripts_dir: dir.to_path_buf(),
            output_dir: dir.join("out"),
            ..BridgeConfig::default()
        });
        let pool = Arc::new(SessionPool::new(
            Arc::new(InterpEngine::factory(matbridge_interp::DEFAULT_STEP_LIMIT)),
            &config,
        ));
        let controller = ExecutionController::new(config, Arc::new(MemoryFigureSink::new()));
        Server::new(ToolRouter::new(pool, controller))
    }

    fn tool_payload(resp: &JsonRpcResponse) -> Value {
        let result = resp.result.as_ref().unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn initialize_reports_tools_capability() {
        let dir = tempfile::tempdir().unwrap();
        let resp = server(dir.path())
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(result["serverInfo"]["name"], json!("matbridge"));
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_has_every_tool() {
        let dir = tempfile::tempdir().unwrap();
        let resp = server(dir.path())
            .handle_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), tool_specs().len());
        assert!(tools.iter().all(|t| t["inputSchema"].is_object()));
    }

    #[tokio::test]
    async fn tools_call_runs_code() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let resp = server
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"execute_script","arguments":{"code":"x = 6 * 7;"}}}"#,
            )
            .await
            .unwrap();
        assert_eq!(resp.result.as_ref().unwrap()["isError"], json!(false));
        let payload = tool_payload(&resp);
        assert_eq!(payload["workspace"]["x"]["data"], json!(42.0));
    }

    #[tokio::test]
    async fn failing_tool_sets_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let resp = server(dir.path())
            .handle_line(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"no_such_tool","arguments":{}}}"#,
            )
            .await
            .unwrap();
        assert_eq!(resp.result.as_ref().unwrap()["isError"], json!(true));
        assert_eq!(tool_payload(&resp)["error"]["kind"], json!("validation"));
    }

    #[tokio::test]
    async fn protocol_errors() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());

        let resp = server.handle_line("{not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::PARSE_ERROR);

        let resp = server
            .handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(resp.id, Some(crate::protocol::JsonRpcId::Number(5)));
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let resp = server
            .handle_line(r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{}}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_PARAMS);

        let resp = server
            .handle_line(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, error_codes::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn notifications_and_blank_lines_get_no_response() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        assert!(server.handle_line("   ").await.is_none());
        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn serve_answers_line_by_line() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(dir.path());
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_workspace"}}"#,
            "\n",
        );
        let mut output = Vec::new();
        server
            .serve(tokio::io::BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], json!(1));
        assert_eq!(lines[0]["result"], json!({}));
        assert_eq!(lines[1]["id"], json!(2));
        assert_eq!(lines[1]["result"]["isError"], json!(false));
    }
}
