//! `settings/*` and `config/*` handlers.
//!
//! Settings are a persisted JSON object the server treats as opaque;
//! `config.toml` is an opaque text blob passed through verbatim.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use super::{parse_params, RpcResponseExt};
use crate::protocol::{RpcId, RpcResponse};
use crate::state::Server;

/// Parameters for `settings/set`.
#[derive(Debug, Deserialize)]
pub struct SetSettingsParams {
    pub settings: Map<String, Value>,
}

/// Parameters for `config/set`.
#[derive(Debug, Deserialize)]
pub struct SetConfigParams {
    #[serde(default)]
    pub content: String,
}

/// Handle `settings/get`.
pub fn handle_get(id: Option<RpcId>, server: &Arc<Server>) -> RpcResponse {
    let settings = server.read_state().settings.clone();
    RpcResponse::success(id, settings)
}

/// Handle `settings/set`.
pub async fn handle_set(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: SetSettingsParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    {
        let mut st = server.write_state();
        st.settings = params.settings.clone();
    }
    server.persist().await;
    RpcResponse::success(id, params.settings)
}

/// Handle `config/get`.
pub fn handle_config_get(id: Option<RpcId>, server: &Arc<Server>) -> RpcResponse {
    let content = server.read_state().config.clone();
    RpcResponse::success(
        id,
        serde_json::json!({
            "path": server.store.config_path().display().to_string(),
            "content": content,
        }),
    )
}

/// Handle `config/set`.
pub async fn handle_config_set(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: SetConfigParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    {
        let mut st = server.write_state();
        st.config = params.content.clone();
    }
    if let Err(err) = server.store.write_config(&params.content).await {
        tracing::warn!("config write failed: {err}");
    }
    RpcResponse::success(id, serde_json::json!({"ok": true}))
}
