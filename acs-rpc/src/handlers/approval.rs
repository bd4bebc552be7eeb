//! `codex/request/respond` handler.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;

use super::{parse_params, RpcResponseExt};
use crate::approvals::{parse_decision, ApprovalError};
use crate::error;
use crate::protocol::{RpcId, RpcResponse};
use crate::state::Server;

/// Parameters for `codex/request/respond`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondParams {
    pub request_id: String,
    #[serde(default)]
    pub result: DecisionBody,
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    #[serde(default)]
    pub decision: String,
}

/// Handle `codex/request/respond`.
pub fn handle_respond(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: RespondParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    if params.request_id.trim().is_empty() {
        return RpcResponse::error(id, error::INVALID_PARAMS, "requestId is required");
    }
    let Some(decision) = parse_decision(&params.result.decision) else {
        return RpcResponse::error(id, error::INVALID_PARAMS, "result.decision is required");
    };

    match server.respond_approval(params.request_id.trim(), decision) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({"ok": true})),
        Err(ApprovalError::NotFound) => {
            RpcResponse::error(id, error::PENDING_NOT_FOUND, "approval request not found")
        }
    }
}
