//! `thread/*` method handlers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::{parse_params_or_default, RpcResponseExt};
use crate::protocol::{RpcId, RpcResponse};
use crate::state::Server;

/// Parameters for `thread/list` and `thread/loaded/list`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Handle `thread/list` / `thread/loaded/list`.
pub fn handle_list(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
    loaded_only: bool,
) -> RpcResponse {
    let params: ListParams = match parse_params_or_default(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let page = server.list_threads(params.cursor.as_deref(), loaded_only);

    let mut result = serde_json::json!({"threads": page.threads});
    if let Some(next) = page.next_cursor {
        result["nextCursor"] = next.into();
    }
    RpcResponse::success(id, result)
}

/// Handle `thread/start`.
pub async fn handle_start(id: Option<RpcId>, server: &Arc<Server>) -> RpcResponse {
    let (thread_id, thread) = server.start_thread().await;
    RpcResponse::success(
        id,
        serde_json::json!({"threadId": thread_id, "thread": thread}),
    )
}
