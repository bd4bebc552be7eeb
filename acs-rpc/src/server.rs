//! WebSocket transport.
//!
//! One HTTP endpoint (`/ws`) upgrades into a bidirectional JSON-RPC
//! connection. Each connection runs two tasks: a reader that parses
//! frames and dispatches them, and a writer that drains the client's
//! bounded outbound queue. Responses are enqueued with a blocking send
//! (they must not be lost); notifications go through `try_send` and
//! may be dropped under backpressure.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error;
use crate::protocol::{OutboundMessage, RpcRequest, RpcResponse};
use crate::router::MethodRouter;
use crate::state::{ClientHandle, Server};
use crate::OUTBOUND_QUEUE_CAPACITY;

/// Errors from the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build the axum application serving `/ws`.
pub fn app(server: Arc<Server>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(server)
}

/// Bind and serve until the process exits. Also starts the lease
/// expiry ticker.
pub async fn serve(server: Arc<Server>, addr: SocketAddr) -> Result<(), ServerError> {
    server.spawn_lease_expiry();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on ws://{addr}/ws");
    axum::serve(listener, app(server)).await?;
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<Server>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

async fn handle_socket(server: Arc<Server>, socket: WebSocket) {
    let client_id = Uuid::now_v7().to_string();
    let (tx, rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_QUEUE_CAPACITY);
    server.register_client(&client_id, ClientHandle { tx: tx.clone() });
    tracing::debug!(%client_id, "client connected");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, rx));

    read_loop(&server, &client_id, stream, &tx).await;

    // Reader exit: drop the client from every subscription set and
    // close its queue. Leases are not released here; TTL handles them.
    server.remove_client(&client_id);
    drop(tx);
    let _ = writer.await;
    tracing::debug!(%client_id, "client disconnected");
}

async fn read_loop(
    server: &Arc<Server>,
    client_id: &str,
    mut stream: SplitStream<WebSocket>,
    tx: &mpsc::Sender<OutboundMessage>,
) {
    let router = MethodRouter::new(Arc::clone(server));
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let request: RpcRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(err) => {
                let response =
                    RpcResponse::error(None, error::PARSE_ERROR, format!("parse error: {err}"));
                if tx.send(OutboundMessage::Response(response)).await.is_err() {
                    break;
                }
                continue;
            }
        };
        if let Some(response) = router.dispatch(client_id, request).await {
            // Responses must not be dropped: block until queued.
            if tx.send(OutboundMessage::Response(response)).await.is_err() {
                break;
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<OutboundMessage>,
) {
    while let Some(message) = rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("outbound serialization failed: {err}");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}
