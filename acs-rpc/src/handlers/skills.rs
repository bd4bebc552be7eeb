//! `skill/list` handler.

use std::sync::Arc;

use crate::protocol::{RpcId, RpcResponse};
use crate::state::Server;

/// Handle `skill/list`: pass the engine's catalog through.
pub fn handle_list(id: Option<RpcId>, server: &Arc<Server>) -> RpcResponse {
    let skills = server.engine().skills();
    RpcResponse::success(id, serde_json::json!({"skills": skills}))
}
