//! Line-delimited JSON-RPC 2.0 tool server.
//!
//! One request per line in, one response per line out. Requests without an
//! `id` are notifications and get no response. Logging must go to stderr
//! when this runs on stdio.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use cleancity_core::error::CleanCityError;

use crate::state::AppState;
use crate::tools;

/// Protocol revision reported by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
/// A tool result that could not be serialized.
pub const TOOL_ERROR: i64 = -32000;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CallParams {
    name: String,
    arguments: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<CleanCityError> for RpcError {
    fn from(err: CleanCityError) -> Self {
        let code = match err {
            CleanCityError::Validation { .. } => INVALID_PARAMS,
            _ => TOOL_ERROR,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(json!({ "kind": err.kind(), "field": err.field() })),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Serve requests from stdin until it closes.
pub async fn serve_stdio(state: AppState) -> std::io::Result<()> {
    info!("Tool server listening on stdio");
    serve(&state, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Serve requests from `reader` until EOF, writing responses to `writer`.
pub async fn serve<R, W>(state: &AppState, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Some(response) = handle_line(state, &line).await {
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
    }
    debug!("Tool server input closed");
    Ok(())
}

/// Handle one line of input. Returns `None` for notifications.
pub async fn handle_line(state: &AppState, line: &str) -> Option<Response> {
    let raw: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Unparseable request");
            return Some(Response::failure(
                Value::Null,
                RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
            ));
        }
    };
    let fallback_id = raw.get("id").cloned().unwrap_or(Value::Null);

    let request: Request = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => {
            return Some(Response::failure(
                fallback_id,
                RpcError::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
            ))
        }
    };
    if request.jsonrpc.as_deref() != Some("2.0") {
        return Some(Response::failure(
            fallback_id,
            RpcError::new(INVALID_REQUEST, "jsonrpc must be \"2.0\""),
        ));
    }

    let Some(id) = request.id else {
        debug!(method = %request.method, "Notification");
        return None;
    };

    let response = match dispatch(state, &request.method, request.params).await {
        Ok(result) => Response::success(id, result),
        Err(error) => Response::failure(id, error),
    };
    Some(response)
}

async fn dispatch(state: &AppState, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "cleancity",
                "version": env!("CARGO_PKG_VERSION"),
            },
        })),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({ "tools": tools::tool_definitions() })),
        "tools/call" => {
            let call: CallParams = match params {
                Value::Null => CallParams::default(),
                other => serde_json::from_value(other)
                    .map_err(|e| RpcError::new(INVALID_PARAMS, format!("Invalid params: {}", e)))?,
            };
            if call.name.is_empty() {
                return Err(RpcError::from(CleanCityError::validation(
                    "name",
                    "tool name is required",
                )));
            }
            if !tools::tool_definitions().iter().any(|t| t.name == call.name) {
                return Err(RpcError::from(CleanCityError::validation(
                    "name",
                    format!("unknown tool '{}'", call.name),
                )));
            }

            match tools::call_tool(state, &call.name, call.arguments).await {
                Ok(value) => {
                    let text = serde_json::to_string_pretty(&value)
                        .map_err(|e| RpcError::new(TOOL_ERROR, e.to_string()))?;
                    Ok(json!({
                        "content": [{ "type": "text", "text": text }],
                        "structuredContent": value,
                        "isError": false,
                    }))
                }
                Err(e) => {
                    warn!(tool = %call.name, kind = e.kind(), error = %e, "Tool call failed");
                    Ok(tool_error_result(&e))
                }
            }
        }
        other => Err(RpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {}", other),
        )),
    }
}

/// Execution failures are reported inside the result so the caller can
/// read them; only protocol problems become JSON-RPC errors.
fn tool_error_result(err: &CleanCityError) -> Value {
    json!({
        "content": [{ "type": "text", "text": err.to_string() }],
        "structuredContent": {
            "kind": err.kind(),
            "field": err.field(),
            "message": err.to_string(),
        },
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cleancity_core::config::CleanCityConfig;
    use cleancity_storage::Database;

    fn state() -> AppState {
        AppState::offline(CleanCityConfig::default(), Database::in_memory().unwrap())
    }

    async fn roundtrip(state: &AppState, input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve(state, BufReader::new(input.as_bytes()), &mut out)
            .await
            .unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
        );
        let responses = roundtrip(&state(), input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
        let tools = responses[1]["result"]["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["name"] == "log_event"));
        assert!(tools.iter().all(|t| t["inputSchema"].is_object()));
    }

    #[tokio::test]
    async fn test_tool_call_result_shape() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":"a","method":"tools/call","params":{"name":"log_event","arguments":{"location":"Central Park","item_count":3}}}"#,
            "\n",
        );
        let responses = roundtrip(&state(), input).await;
        let result = &responses[0]["result"];
        assert_eq!(responses[0]["id"], "a");
        assert_eq!(result["isError"], false);
        assert_eq!(result["structuredContent"]["severity"], "low");
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["location_key"], "central park");
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_result() {
        let state = state();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"log_event","arguments":{"item_count":-5}}}"#,
            "\n",
        );
        let responses = roundtrip(&state, input).await;
        assert!(responses[0].get("error").is_none());
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], true);
        assert_eq!(result["structuredContent"]["kind"], "validation_error");
        assert_eq!(result["structuredContent"]["field"], "item_count");
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("item_count"));
        assert_eq!(state.store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let response = handle_line(
            &state(),
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"mark_cleaned"}}"#,
        )
        .await
        .unwrap();
        assert!(response.result.is_none());
        let error = response.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.data.unwrap()["field"], "name");
    }

    #[tokio::test]
    async fn test_huge_window_keeps_server_alive() {
        let state = state();
        state
            .store
            .log_event(cleancity_storage::NewEvent::new("Pier", 2))
            .unwrap();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_hotspots","arguments":{"window_days":100000000,"min_events":1}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"query_events","arguments":{"days":100000000}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
            "\n",
        );
        let responses = roundtrip(&state, input).await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"]["isError"], false);
        assert_eq!(
            responses[0]["result"]["structuredContent"]["hotspots"][0]["location"],
            "pier"
        );
        assert_eq!(responses[1]["result"]["isError"], true);
        assert_eq!(responses[1]["result"]["structuredContent"]["field"], "days");
        assert_eq!(responses[2]["id"], 3);
        assert_eq!(responses[2]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let input = concat!(
            "not json\n",
            r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"resources/list"}"#,
            "\n",
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
            "\n",
        );
        let responses = roundtrip(&state(), input).await;
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["error"]["code"], INVALID_REQUEST);
        assert_eq!(responses[2]["error"]["code"], METHOD_NOT_FOUND);
        assert_eq!(responses[3]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_call_without_name() {
        let response = handle_line(
            &state(),
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{}}"#,
        )
        .await
        .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.data.unwrap()["field"], "name");
    }
}
