//! `room/*` method handlers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;

use super::{parse_params, RpcResponseExt};
use crate::protocol::{RpcId, RpcResponse};
use crate::state::Server;

/// Parameters shared by the room methods.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomParams {
    pub thread_id: String,
}

fn room_params(
    id: &Option<RpcId>,
    params: Option<&RawValue>,
) -> Result<RoomParams, RpcResponse> {
    let parsed: RoomParams = parse_params(params).map_err(|resp| resp.with_id(id.clone()))?;
    if parsed.thread_id.is_empty() {
        return Err(RpcResponse::error(
            id.clone(),
            crate::error::INVALID_PARAMS,
            "threadId is required",
        ));
    }
    Ok(parsed)
}

/// Handle `room/subscribe`.
pub async fn handle_subscribe(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
    client_id: &str,
) -> RpcResponse {
    let params = match room_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let snapshot = server.subscribe_room(client_id, &params.thread_id).await;
    RpcResponse::success(
        id,
        serde_json::json!({
            "snapshot": snapshot.items,
            "cursor": snapshot.cursor,
            "ownerClientId": snapshot.owner_client_id,
            "ttlMs": snapshot.ttl_ms,
        }),
    )
}

/// Handle `room/unsubscribe`.
pub fn handle_unsubscribe(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
    client_id: &str,
) -> RpcResponse {
    let params = match room_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    server.unsubscribe_room(client_id, &params.thread_id);
    RpcResponse::success(id, serde_json::json!({"ok": true}))
}

/// Handle `room/claim`.
pub fn handle_claim(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
    client_id: &str,
) -> RpcResponse {
    let params = match room_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let (owner, ttl_ms) = server.claim_room(client_id, &params.thread_id);
    RpcResponse::success(
        id,
        serde_json::json!({"ownerClientId": owner, "ttlMs": ttl_ms}),
    )
}

/// Handle `room/release`.
pub fn handle_release(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
    client_id: &str,
) -> RpcResponse {
    let params = match room_params(&id, params) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let owner = server.release_room(client_id, &params.thread_id);
    RpcResponse::success(
        id,
        serde_json::json!({"ownerClientId": owner.map(Value::from).unwrap_or(Value::Null)}),
    )
}
