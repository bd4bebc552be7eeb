//! Turn orchestrator.
//!
//! A turn is one user message plus the assistant's streamed response
//! and tool interactions. The sender must hold (or be able to take)
//! the room lease; the engine stream runs in a background task with a
//! hard deadline and is translated into room notifications as it goes.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::{json, Value};

use acs_core::types::{new_item_id, new_turn_id};
use acs_core::{Role, StreamEvent};

use crate::state::Server;

/// Input for `turn/start` / `conversation/sendMessage`.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub thread_id: String,
    pub text: String,
    pub cwd: String,
}

/// Why a turn could not start.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("room is owned by another client")]
    OwnedByOther { owner_client_id: String },
}

impl Server {
    /// Gate on ownership, record the user item, announce the turn, and
    /// hand the stream off to a background task.
    pub async fn start_turn(
        self: &Arc<Self>,
        client_id: &str,
        request: TurnRequest,
    ) -> Result<(), TurnError> {
        let thread_id = request.thread_id;

        // Ownership check and auto-claim in one lock interval: two
        // senders racing for a free room cannot both win.
        let claimed = {
            let mut st = self.write_state();
            st.ensure_thread(&thread_id);
            match st.owner_by_thread.get(&thread_id) {
                Some(owner) if owner != client_id => {
                    return Err(TurnError::OwnedByOther {
                        owner_client_id: owner.clone(),
                    });
                }
                Some(_) => false,
                None => true,
            }
        };
        if claimed {
            self.claim_room(client_id, &thread_id);
        }

        let turn_id = new_turn_id();
        let user_item = self
            .append_item(&thread_id, Role::User, &request.text, &turn_id, None)
            .await;
        self.publish(
            &thread_id,
            "room/event",
            json!({"item": user_item, "cursor": user_item.cursor}),
        );
        self.publish(
            &thread_id,
            "turn/started",
            json!({"threadId": thread_id, "turnId": turn_id}),
        );

        let server = Arc::clone(self);
        tokio::spawn(async move {
            server
                .run_assistant_turn(thread_id, turn_id, request.text, request.cwd)
                .await;
        });
        Ok(())
    }

    /// Drive one engine stream to completion, translating events into
    /// notifications. Owns the turn deadline regardless of transport
    /// timeouts.
    async fn run_assistant_turn(
        self: Arc<Self>,
        thread_id: String,
        turn_id: String,
        prompt: String,
        cwd: String,
    ) {
        let session_id = self.session_for_thread(&thread_id).unwrap_or_default();
        let cwd = if cwd.is_empty() {
            self.workspace_path_for_thread(&thread_id)
        } else {
            cwd
        };
        let prompt = if cwd.is_empty() {
            prompt
        } else {
            format!("[cwd={cwd}]\n{prompt}")
        };

        let deadline = self.config.turn_deadline;
        match tokio::time::timeout(
            deadline,
            self.consume_stream(&thread_id, &turn_id, &session_id, &prompt),
        )
        .await
        {
            Ok(Ok(())) => {
                self.publish(
                    &thread_id,
                    "turn/finished",
                    json!({"threadId": thread_id, "turn": {"id": turn_id, "status": "completed"}}),
                );
            }
            outcome => {
                let message = match outcome {
                    Ok(Err(message)) => message,
                    _ => "turn deadline exceeded".to_string(),
                };
                self.publish(&thread_id, "error", json!({"message": message}));
                self.publish(
                    &thread_id,
                    "turn/finished",
                    json!({
                        "threadId": thread_id,
                        "turn": {"id": turn_id, "status": "error", "error": {"message": message}},
                    }),
                );
            }
        }
    }

    async fn consume_stream(
        &self,
        thread_id: &str,
        turn_id: &str,
        session_id: &str,
        prompt: &str,
    ) -> Result<(), String> {
        let mut stream = self
            .engine
            .stream(session_id, prompt)
            .await
            .map_err(|err| err.to_string())?;

        // The assistant item id is fixed up front so delta recipients
        // can reconcile against the final `room/event`.
        let assistant_id = new_item_id();
        let mut buffer = String::new();

        while let Some(event) = stream.next().await {
            tracing::debug!(thread_id, kind = event.kind(), "engine event");
            match event {
                StreamEvent::TextDelta { delta } => {
                    buffer.push_str(&delta);
                    self.publish(
                        thread_id,
                        "agent/message/delta",
                        json!({"itemId": assistant_id, "delta": delta}),
                    );
                }
                StreamEvent::ToolUseStarted { id, name, index } => {
                    self.emit_room_event(
                        thread_id,
                        turn_id,
                        &format!("Tool start: {name}"),
                        json!({
                            "type": "commandExecution",
                            "toolUseId": id,
                            "name": name,
                            "status": "start",
                            "index": index,
                        }),
                    )
                    .await;
                }
                StreamEvent::ToolUseStopped { .. } => {}
                StreamEvent::ToolExecutionStarted { id, name } => {
                    self.emit_room_event(
                        thread_id,
                        turn_id,
                        &format!("Running tool: {name}"),
                        json!({
                            "type": "commandExecution",
                            "toolUseId": id,
                            "name": name,
                            "status": "running",
                        }),
                    )
                    .await;
                }
                StreamEvent::ToolExecutionOutput {
                    id,
                    name,
                    output,
                    is_error,
                    is_stderr,
                } => {
                    let content = stringify_output(&output);
                    self.emit_room_event(
                        thread_id,
                        turn_id,
                        &content,
                        json!({
                            "type": "commandExecution",
                            "toolUseId": id,
                            "name": name,
                            "status": "output",
                            "output": output,
                            "isError": is_error,
                            "isStderr": is_stderr,
                        }),
                    )
                    .await;
                }
                StreamEvent::ToolExecutionCompleted {
                    id,
                    name,
                    output,
                    is_error,
                } => {
                    self.emit_room_event(
                        thread_id,
                        turn_id,
                        &format!("Tool result: {name}"),
                        json!({
                            "type": "toolResult",
                            "toolUseId": id,
                            "name": name,
                            "result": output,
                            "isError": is_error,
                        }),
                    )
                    .await;
                }
                StreamEvent::Error { message } => {
                    self.publish(thread_id, "error", json!({"message": message}));
                }
                // MessageStop and any event kinds added later: nothing
                // to forward, the loop ends when the stream does.
                _ => {}
            }
        }

        let content = buffer.trim();
        let content = if content.is_empty() {
            "(empty response)"
        } else {
            content
        };
        let assistant_item = self
            .append_item_with_id(
                thread_id,
                &assistant_id,
                Role::Assistant,
                content,
                turn_id,
                None,
            )
            .await;
        self.publish(
            thread_id,
            "room/event",
            json!({"item": assistant_item, "cursor": assistant_item.cursor}),
        );
        Ok(())
    }

    /// Append a tool-lifecycle item and fan it out.
    async fn emit_room_event(&self, thread_id: &str, turn_id: &str, content: &str, raw: Value) {
        let item = self
            .append_item(thread_id, Role::Assistant, content, turn_id, Some(raw))
            .await;
        self.publish(
            thread_id,
            "room/event",
            json!({"item": item, "cursor": item.cursor}),
        );
    }
}

fn stringify_output(output: &Value) -> String {
    match output {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
