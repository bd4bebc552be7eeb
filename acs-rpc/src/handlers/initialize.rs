//! `initialize` handshake handler.

use crate::protocol::{RpcId, RpcResponse};

/// Handle `initialize`: hand the client its server-assigned id.
pub fn handle(id: Option<RpcId>, client_id: &str) -> RpcResponse {
    RpcResponse::success(id, serde_json::json!({"clientId": client_id}))
}
