//! In-process client for the tool-call RPC server.
//!
//! The media bridge uses this to route the speech agent's function calls
//! out-of-band through the RPC socket. Replies are correlated by id; a reply
//! carrying an unmatched or duplicate id is dropped with a warning, never
//! silently retried.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;
use uuid::Uuid;

use super::server::RpcResponse;
use super::ToolError;

/// How long one tool invocation may take end to end.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RpcClient {
    addr: String,
}

impl RpcClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Invoke a named tool and await its correlated reply.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        tokio::time::timeout(CALL_TIMEOUT, self.call_inner(name, args))
            .await
            .map_err(|_| ToolError::Failed(format!("tool call timed out: {name}")))?
    }

    async fn call_inner(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| ToolError::Failed(format!("tool RPC unreachable: {e}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let correlation_id = Uuid::new_v4().to_string();
        let request = json!({
            "id": correlation_id,
            "method": "tool.call",
            "params": { "name": name, "args": args },
        });
        let mut frame = request.to_string();
        frame.push('\n');
        write_half
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| ToolError::Failed(format!("tool RPC write failed: {e}")))?;

        let mut lines = BufReader::new(read_half).lines();
        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| ToolError::Failed(format!("tool RPC read failed: {e}")))?
                .ok_or_else(|| ToolError::Failed("tool RPC connection closed".into()))?;

            let response: RpcResponse = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("dropping malformed RPC reply: {e}");
                    continue;
                }
            };

            if response.id != json!(correlation_id) {
                warn!(
                    expected = %correlation_id,
                    got = %response.id,
                    "dropping reply with unmatched correlation id"
                );
                continue;
            }

            return match (response.result, response.error) {
                (Some(result), None) => Ok(result),
                (_, Some(error)) => Err(ToolError::Failed(error.message)),
                (None, None) => Err(ToolError::Failed("empty RPC reply".into())),
            };
        }
    }
}
