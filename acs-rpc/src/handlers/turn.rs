//! `turn/start` and `conversation/sendMessage` handlers.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::{parse_params, RpcResponseExt};
use crate::error;
use crate::protocol::{RpcId, RpcResponse};
use crate::state::Server;
use crate::turn::{TurnError, TurnRequest};

/// One part of a `turn/start` content array. Only text is carried.
#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: String,
}

/// Parameters for `turn/start`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTurnParams {
    pub thread_id: String,
    #[serde(default)]
    pub content: Vec<ContentPart>,
    #[serde(default)]
    pub cwd: String,
}

/// Parameters for `conversation/sendMessage` (flattened form of the
/// same request).
#[derive(Debug, Deserialize)]
pub struct SendMessageParams {
    pub conversation_id: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub cwd: String,
}

/// Handle both turn entry points.
pub async fn handle_start(
    id: Option<RpcId>,
    method: &str,
    params: Option<&RawValue>,
    server: &Arc<Server>,
    client_id: &str,
) -> RpcResponse {
    let request = if method == "conversation/sendMessage" {
        match parse_params::<SendMessageParams>(params) {
            Ok(p) => TurnRequest {
                thread_id: p.conversation_id,
                text: p.input,
                cwd: p.cwd,
            },
            Err(resp) => return resp.with_id(id),
        }
    } else {
        match parse_params::<StartTurnParams>(params) {
            Ok(p) => TurnRequest {
                thread_id: p.thread_id,
                text: p
                    .content
                    .first()
                    .map(|part| part.text.clone())
                    .unwrap_or_default(),
                cwd: p.cwd,
            },
            Err(resp) => return resp.with_id(id),
        }
    };

    if request.thread_id.is_empty() || request.text.trim().is_empty() {
        return RpcResponse::error(
            id,
            error::INVALID_PARAMS,
            "threadId/content is required",
        );
    }

    match server.start_turn(client_id, request).await {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"ok": true})),
        Err(TurnError::OwnedByOther { owner_client_id }) => RpcResponse::error_with_data(
            id,
            error::OWNERSHIP_CONFLICT,
            "room is owned by another client",
            serde_json::json!({"ownerClientId": owner_client_id}),
        ),
    }
}
