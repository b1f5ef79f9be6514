//! Built-in business tools: member balance lookup and voucher redemption.
//!
//! These are reference implementations backed by an in-memory store. The
//! production deployment swaps them for handlers that call the real backend;
//! the call contract (names, argument shapes, error behavior) is what this
//! module pins down.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use super::{ToolError, ToolHandler, ToolRegistry, ToolSpec};

/// Shared member/voucher store behind the built-in tools.
#[derive(Debug, Default)]
pub struct MemberStore {
    balances: RwLock<HashMap<String, i64>>,
}

impl MemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_balance(&self, member_id: &str, points: i64) {
        self.balances
            .write()
            .await
            .insert(member_id.to_string(), points);
    }

    pub async fn balance(&self, member_id: &str) -> Option<i64> {
        self.balances.read().await.get(member_id).copied()
    }

    /// Deduct `cost` points; fails if the member is unknown or short.
    pub async fn deduct(&self, member_id: &str, cost: i64) -> Result<i64, ToolError> {
        let mut balances = self.balances.write().await;
        let balance = balances
            .get_mut(member_id)
            .ok_or_else(|| ToolError::Failed(format!("unknown member: {member_id}")))?;
        if *balance < cost {
            return Err(ToolError::Failed(format!(
                "insufficient balance: have {balance}, need {cost}"
            )));
        }
        *balance -= cost;
        Ok(*balance)
    }
}

fn member_id_arg(args: &Value) -> Result<String, ToolError> {
    args.get("member_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ToolError::InvalidArguments("member_id is required".into()))
}

/// `get_member_balance`: read-only points balance lookup.
pub struct MemberBalanceTool {
    store: Arc<MemberStore>,
}

#[async_trait]
impl ToolHandler for MemberBalanceTool {
    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let member_id = member_id_arg(&args)?;
        let balance = self
            .store
            .balance(&member_id)
            .await
            .ok_or_else(|| ToolError::Failed(format!("unknown member: {member_id}")))?;
        Ok(json!({ "member_id": member_id, "balance": balance }))
    }
}

/// `redeem_voucher`: deduct a voucher's point cost from a member's balance.
pub struct RedeemVoucherTool {
    store: Arc<MemberStore>,
}

#[async_trait]
impl ToolHandler for RedeemVoucherTool {
    async fn invoke(&self, args: Value) -> Result<Value, ToolError> {
        let member_id = member_id_arg(&args)?;
        let voucher_code = args
            .get("voucher_code")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("voucher_code is required".into()))?;
        let cost = args.get("points_cost").and_then(Value::as_i64).unwrap_or(0);
        if cost <= 0 {
            return Err(ToolError::InvalidArguments(
                "points_cost must be a positive integer".into(),
            ));
        }

        let remaining = self.store.deduct(&member_id, cost).await?;
        tracing::info!(%member_id, %voucher_code, cost, remaining, "voucher redeemed");
        Ok(json!({
            "member_id": member_id,
            "voucher_code": voucher_code,
            "redeemed": true,
            "remaining_balance": remaining,
        }))
    }
}

/// Build the default registry with both business tools over a shared store.
pub fn builtin_registry() -> ToolRegistry {
    let store = Arc::new(MemberStore::new());
    registry_with_store(store)
}

/// Registry construction with an injected store, for tests and seeding.
pub fn registry_with_store(store: Arc<MemberStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSpec {
            name: "get_member_balance".into(),
            description: "Look up a member's current points balance".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "member_id": { "type": "string", "description": "Member identifier" }
                },
                "required": ["member_id"]
            }),
        },
        Arc::new(MemberBalanceTool {
            store: store.clone(),
        }),
    );
    registry.register(
        ToolSpec {
            name: "redeem_voucher".into(),
            description: "Redeem a voucher against a member's points balance".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "member_id": { "type": "string" },
                    "voucher_code": { "type": "string" },
                    "points_cost": { "type": "integer", "minimum": 1 }
                },
                "required": ["member_id", "voucher_code", "points_cost"]
            }),
        },
        Arc::new(RedeemVoucherTool { store }),
    );
    registry
}
