//! Tool-call dispatch: the name -> handler table the speech agent's function
//! calls are routed through, plus the RPC server/client speaking the wire
//! protocol.

pub mod builtin;
pub mod client;
pub mod server;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use builtin::builtin_registry;
pub use client::RpcClient;
pub use server::ToolCallServer;

/// Errors a tool invocation can produce.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No handler registered under the requested name.
    #[error("Unknown tool: {0}")]
    Unknown(String),

    /// The arguments did not match the tool's contract.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// A backend capability callable by name from the speech agent.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: Value) -> Result<Value, ToolError>;
}

/// Declarative description of a tool, advertised to the speech provider so
/// the model knows what it may call.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters: Value,
}

/// Immutable name -> handler table.
///
/// Built once at startup and passed into the server constructor; tests inject
/// fakes per tool. Never mutated after construction.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, (ToolSpec, Arc<dyn ToolHandler>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec, handler: Arc<dyn ToolHandler>) {
        self.handlers.insert(spec.name.clone(), (spec, handler));
    }

    /// Specs of every registered tool, for session configuration.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.handlers.values().map(|(s, _)| s.clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Invoke the named tool.
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let (_, handler) = self
            .handlers
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        handler.invoke(args).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
