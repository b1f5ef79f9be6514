//! Tool-call RPC server.
//!
//! One listener per process, multiplexing every concurrent call session. The
//! wire protocol is newline-delimited JSON: requests
//! `{id, method: "tool.call", params: {name, args}}`, replies `{id, result}`
//! or `{id, error: {code, message}}`. Handler faults are converted to
//! structured error replies and never tear down the connection for other
//! clients; malformed frames are logged and skipped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ToolRegistry;

/// Requested method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32601;

/// Handler fault, unknown tool, or malformed params.
pub const INTERNAL_ERROR: i32 = -32603;

/// Per-connection reply channel capacity.
const REPLY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Option<ToolCallParams>,
}

#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: String) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// The RPC server. The dispatch table is injected at construction and treated
/// as immutable for the lifetime of the process.
pub struct ToolCallServer {
    registry: Arc<ToolRegistry>,
}

impl ToolCallServer {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Accept connections until the shutdown token fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "tool-call RPC server listening");
        }
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("tool-call RPC server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "tool-call RPC client connected");
                            let registry = self.registry.clone();
                            let conn_shutdown = shutdown.child_token();
                            tokio::spawn(async move {
                                handle_connection(registry, stream, conn_shutdown).await;
                                debug!(%peer, "tool-call RPC client disconnected");
                            });
                        }
                        Err(e) => {
                            warn!("tool-call RPC accept failed: {e}");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    registry: Arc<ToolRegistry>,
    stream: TcpStream,
    shutdown: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_CHANNEL_CAPACITY);

    // Writer task so concurrently dispatched requests can reply out of order
    // without interleaving bytes.
    let writer = tokio::spawn(async move {
        while let Some(line) = reply_rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if write_half.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                let request: RpcRequest = match serde_json::from_str(&line) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!("dropping malformed RPC frame: {e}");
                        continue;
                    }
                };
                let registry = registry.clone();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let response = handle_request(registry, request).await;
                    match serde_json::to_string(&response) {
                        Ok(json) => {
                            let _ = reply_tx.send(json).await;
                        }
                        Err(e) => warn!("failed to serialize RPC reply: {e}"),
                    }
                });
            }
            Ok(None) => break,
            Err(e) => {
                warn!("tool-call RPC read error: {e}");
                break;
            }
        }
    }

    drop(reply_tx);
    let _ = writer.await;
}

/// Produce exactly one reply for one request.
async fn handle_request(registry: Arc<ToolRegistry>, request: RpcRequest) -> RpcResponse {
    if request.method != "tool.call" {
        return RpcResponse::err(
            request.id,
            METHOD_NOT_FOUND,
            "Method not found".to_string(),
        );
    }

    let Some(params) = request.params else {
        return RpcResponse::err(
            request.id,
            INTERNAL_ERROR,
            "missing params for tool.call".to_string(),
        );
    };

    let name = params.name;
    let args = params.args;
    debug!(tool = %name, "dispatching tool call");

    // Run the handler on its own task so a panic is contained and reported
    // as a structured error instead of killing the connection.
    let dispatched = tokio::spawn({
        let registry = registry.clone();
        let name = name.clone();
        async move { registry.dispatch(&name, args).await }
    })
    .await;

    match dispatched {
        Ok(Ok(result)) => RpcResponse::ok(request.id, result),
        Ok(Err(tool_err)) => {
            warn!(tool = %name, "tool call failed: {tool_err}");
            RpcResponse::err(request.id, INTERNAL_ERROR, tool_err.to_string())
        }
        Err(join_err) => {
            warn!(tool = %name, "tool handler panicked: {join_err}");
            RpcResponse::err(
                request.id,
                INTERNAL_ERROR,
                format!("tool handler panicked: {join_err}"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn non_tool_call_methods_are_rejected() {
        let registry = Arc::new(ToolRegistry::new());
        let response = handle_request(
            registry,
            RpcRequest {
                id: json!(1),
                method: "system.shutdown".into(),
                params: None,
            },
        )
        .await;
        let error = response.error.expect("should be an error reply");
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "Method not found");
    }

    #[tokio::test]
    async fn unknown_tool_reply_contains_the_name() {
        let registry = Arc::new(ToolRegistry::new());
        let response = handle_request(
            registry,
            RpcRequest {
                id: json!("abc"),
                method: "tool.call".into(),
                params: Some(ToolCallParams {
                    name: "grant_free_points".into(),
                    args: json!({}),
                }),
            },
        )
        .await;
        assert_eq!(response.id, json!("abc"));
        let error = response.error.expect("should be an error reply");
        assert_eq!(error.code, INTERNAL_ERROR);
        assert!(error.message.contains("grant_free_points"));
    }

    #[tokio::test]
    async fn missing_params_is_a_structured_error() {
        let registry = Arc::new(ToolRegistry::new());
        let response = handle_request(
            registry,
            RpcRequest {
                id: json!(7),
                method: "tool.call".into(),
                params: None,
            },
        )
        .await;
        assert_eq!(response.error.map(|e| e.code), Some(INTERNAL_ERROR));
    }
}
