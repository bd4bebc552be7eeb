//! Method router - dispatches JSON-RPC requests to the correct handler.

use std::sync::Arc;

use crate::error;
use crate::handlers;
use crate::protocol::{RpcRequest, RpcResponse};
use crate::state::Server;

/// Dispatches incoming JSON-RPC requests for one connection.
#[derive(Clone)]
pub struct MethodRouter {
    server: Arc<Server>,
}

impl MethodRouter {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    /// Dispatch a request on behalf of `client_id`.
    ///
    /// Requests without an id are fire-and-forget: the method still
    /// runs, but `None` is returned and no response goes out.
    pub async fn dispatch(&self, client_id: &str, request: RpcRequest) -> Option<RpcResponse> {
        let fire_and_forget = request.is_notification();
        let id = request.id.clone();
        let params = request.params.as_deref();
        let server = &self.server;

        let response = match request.method.as_str() {
            "initialize" => handlers::initialize::handle(id, client_id),
            "thread/list" => handlers::thread::handle_list(id, params, server, false),
            "thread/loaded/list" => handlers::thread::handle_list(id, params, server, true),
            "thread/start" => handlers::thread::handle_start(id, server).await,
            "room/subscribe" => {
                handlers::room::handle_subscribe(id, params, server, client_id).await
            }
            "room/unsubscribe" => handlers::room::handle_unsubscribe(id, params, server, client_id),
            "room/claim" => handlers::room::handle_claim(id, params, server, client_id),
            "room/release" => handlers::room::handle_release(id, params, server, client_id),
            "turn/start" | "conversation/sendMessage" => {
                handlers::turn::handle_start(id, &request.method, params, server, client_id).await
            }
            "codex/request/respond" => handlers::approval::handle_respond(id, params, server),
            "settings/get" => handlers::settings::handle_get(id, server),
            "settings/set" => handlers::settings::handle_set(id, params, server).await,
            "config/get" => handlers::settings::handle_config_get(id, server),
            "config/set" => handlers::settings::handle_config_set(id, params, server).await,
            "skill/list" => handlers::skills::handle_list(id, server),
            "workspace/list" => handlers::workspace::handle_list(id, server),
            "workspace/browse" => handlers::workspace::handle_browse(id, params).await,
            "workspace/add" => handlers::workspace::handle_add(id, params, server).await,
            "workspace/remove" => handlers::workspace::handle_remove(id, params, server).await,
            "workspace/activate" => handlers::workspace::handle_activate(id, params, server).await,
            "workspace/thread/get" => handlers::workspace::handle_thread_get(id, params, server),
            "workspace/thread/set" => {
                handlers::workspace::handle_thread_set(id, params, server).await
            }
            "workspace/preferences/get" => handlers::workspace::handle_preferences(id, server),
            "workspace/preferences/touch" => {
                handlers::workspace::handle_touch_recent(id, params, server).await
            }
            "workspace/preferences/toggleFavorite" => {
                handlers::workspace::handle_toggle_favorite(id, params, server).await
            }
            _ => RpcResponse::error(
                id,
                error::METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            ),
        };

        if fire_and_forget {
            None
        } else {
            Some(response)
        }
    }
}
