//! Approval coordinator.
//!
//! The engine's permission callback lands here. Each request becomes a
//! `PendingApproval` with a single-shot result sink, is broadcast to
//! the thread's subscribers as `codex/request`, and then races the
//! client's `codex/request/respond` against the approval timeout and
//! the engine's cancellation. Whatever happens, exactly one
//! `codex/request/resolved` goes out and at most one decision reaches
//! the engine.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::oneshot;

use acs_core::types::{new_request_id, now_rfc3339};
use acs_core::{PermissionDecision, PermissionHandler, PermissionRequest};

use crate::state::Server;

/// Wire method for an approval request, classified from the tool name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalMethod {
    ExecCommandApproval,
    ApplyPatchApproval,
}

impl ApprovalMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExecCommandApproval => "execCommandApproval",
            Self::ApplyPatchApproval => "applyPatchApproval",
        }
    }

    /// Patch-flavored tools go through `applyPatchApproval`; everything
    /// else is a command execution.
    pub fn classify(tool_name: &str) -> Self {
        let name = tool_name.trim();
        if name.eq_ignore_ascii_case("apply_patch") || name.to_ascii_lowercase().contains("patch") {
            Self::ApplyPatchApproval
        } else {
            Self::ExecCommandApproval
        }
    }
}

/// A client's decision on an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    ApprovedForSession,
    Denied,
}

/// Case-insensitive decision-word mapping. `None` means the word is not
/// part of the protocol and the responder gets invalid-params.
pub fn parse_decision(word: &str) -> Option<ApprovalDecision> {
    match word.trim().to_ascii_lowercase().as_str() {
        "approved" | "allow" | "accept" | "acceptforsession" => Some(ApprovalDecision::Approved),
        "approved_for_session" => Some(ApprovalDecision::ApprovedForSession),
        "deny" | "denied" | "decline" | "abort" | "cancel" => Some(ApprovalDecision::Denied),
        _ => None,
    }
}

/// An approval awaiting a decision.
pub struct PendingApproval {
    pub thread_id: String,
    pub method: ApprovalMethod,
    pub created_at: String,
    pub tool_name: String,
    pub command: String,
    pub cwd: String,
    pub reason: String,
    /// Single-shot sink; the send is non-blocking and the decision is
    /// discarded if the waiter already left.
    pub sink: oneshot::Sender<ApprovalDecision>,
}

/// Errors surfaced to `codex/request/respond`.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("approval request not found")]
    NotFound,
}

impl Server {
    /// Resolve a client decision. Removing the pending entry happens
    /// before the sink delivery, so a second respond with the same id
    /// fails with `NotFound`.
    pub fn respond_approval(
        &self,
        request_id: &str,
        decision: ApprovalDecision,
    ) -> Result<(), ApprovalError> {
        let pending = self
            .take_pending(request_id)
            .ok_or(ApprovalError::NotFound)?;
        let _ = pending.sink.send(decision);
        self.publish(
            &pending.thread_id,
            "codex/request/resolved",
            json!({
                "requestId": request_id,
                "method": pending.method.as_str(),
                "status": "answered",
            }),
        );
        Ok(())
    }

    pub(crate) fn take_pending(&self, request_id: &str) -> Option<PendingApproval> {
        self.write_state().pending_approvals.remove(request_id)
    }

    /// Install the permission bridge into the engine. Called once after
    /// construction; the bridge holds a weak reference so the server
    /// and the engine do not keep each other alive.
    pub fn install_permission_bridge(self: &Arc<Self>) {
        self.engine
            .set_permission_handler(Arc::new(PermissionBridge {
                server: Arc::downgrade(self),
            }));
    }

    /// The blocking side of the approval protocol, invoked from inside
    /// the engine stream.
    async fn handle_permission_request(&self, request: PermissionRequest) -> PermissionDecision {
        let Some(thread_id) = self.thread_for_session(&request.session_id) else {
            return PermissionDecision::Deny;
        };

        let request_id = new_request_id();
        let method = ApprovalMethod::classify(&request.tool_name);
        let command = if request.target.is_empty() {
            request.tool_name.clone()
        } else {
            format!("{} {}", request.tool_name, request.target)
        };
        let cwd = self.workspace_path_for_thread(&thread_id);

        let (sink, decision_rx) = oneshot::channel();
        {
            let mut st = self.write_state();
            st.pending_approvals.insert(
                request_id.clone(),
                PendingApproval {
                    thread_id: thread_id.clone(),
                    method,
                    created_at: now_rfc3339(),
                    tool_name: request.tool_name.clone(),
                    command: command.clone(),
                    cwd: cwd.clone(),
                    reason: request.reason.clone(),
                    sink,
                },
            );
        }

        self.publish(
            &thread_id,
            "codex/request",
            json!({
                "requestId": request_id,
                "method": method.as_str(),
                "params": {
                    "threadId": thread_id,
                    "command": command,
                    "cwd": cwd,
                    "reason": request.reason,
                    "toolName": request.tool_name,
                    "target": request.target,
                },
            }),
        );

        // If the engine cancels the stream this future is dropped; the
        // guard then retires the pending entry and announces the
        // timeout so subscribers converge.
        let mut guard = PendingGuard {
            server: self,
            request_id: &request_id,
            armed: true,
        };

        match tokio::time::timeout(self.config.approval_timeout, decision_rx).await {
            Ok(Ok(decision)) => {
                // Responder already removed the entry and published
                // `answered`.
                guard.armed = false;
                match decision {
                    ApprovalDecision::Approved => PermissionDecision::Allow,
                    ApprovalDecision::ApprovedForSession => PermissionDecision::AllowForSession,
                    ApprovalDecision::Denied => PermissionDecision::Deny,
                }
            }
            _ => {
                guard.armed = false;
                self.retire_pending(&request_id, "approval timeout");
                PermissionDecision::Deny
            }
        }
    }

    /// Remove a pending entry (if still present) and publish the
    /// timeout resolution. Publishing only on successful removal keeps
    /// the resolution at-most-once even when a respond races in.
    fn retire_pending(&self, request_id: &str, reason: &str) {
        if let Some(pending) = self.take_pending(request_id) {
            self.publish(
                &pending.thread_id,
                "codex/request/resolved",
                json!({
                    "requestId": request_id,
                    "method": pending.method.as_str(),
                    "status": "timeout",
                    "reason": reason,
                }),
            );
        }
    }
}

struct PendingGuard<'a> {
    server: &'a Server,
    request_id: &'a str,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.server
                .retire_pending(self.request_id, "context canceled");
        }
    }
}

/// Late-bound handler slot installed into the engine.
struct PermissionBridge {
    server: Weak<Server>,
}

#[async_trait]
impl PermissionHandler for PermissionBridge {
    async fn on_permission_request(&self, request: PermissionRequest) -> PermissionDecision {
        match self.server.upgrade() {
            Some(server) => server.handle_permission_request(request).await,
            None => PermissionDecision::Deny,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::mpsc;

    use acs_core::EchoEngine;

    use super::*;
    use crate::protocol::OutboundMessage;
    use crate::state::{ClientHandle, ServerConfig};

    async fn approval_server(timeout: Duration) -> (Arc<Server>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            approval_timeout: timeout,
            ..ServerConfig::default()
        };
        let server = Server::new(Arc::new(EchoEngine::default()), config)
            .await
            .unwrap();
        (server, dir)
    }

    fn attach_subscriber(
        server: &Arc<Server>,
        client_id: &str,
        thread_id: &str,
    ) -> mpsc::Receiver<OutboundMessage> {
        let (tx, rx) = mpsc::channel(crate::OUTBOUND_QUEUE_CAPACITY);
        server.register_client(client_id, ClientHandle { tx });
        {
            let mut st = server.write_state();
            st.ensure_thread(thread_id);
            st.subscribers
                .entry(thread_id.to_string())
                .or_default()
                .insert(client_id.to_string());
        }
        rx
    }

    fn permission_request(session_id: &str, tool_name: &str, target: &str) -> PermissionRequest {
        PermissionRequest {
            tool_name: tool_name.to_string(),
            tool_params: Value::Null,
            session_id: session_id.to_string(),
            rule: String::new(),
            target: target.to_string(),
            reason: "requires approval".to_string(),
        }
    }

    async fn next_notification(rx: &mut mpsc::Receiver<OutboundMessage>) -> (String, Value) {
        match tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
        {
            OutboundMessage::Notification(n) => (n.method, n.params),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn method_classification() {
        assert_eq!(
            ApprovalMethod::classify("bash"),
            ApprovalMethod::ExecCommandApproval
        );
        assert_eq!(
            ApprovalMethod::classify("apply_patch"),
            ApprovalMethod::ApplyPatchApproval
        );
        assert_eq!(
            ApprovalMethod::classify("GitPatchTool"),
            ApprovalMethod::ApplyPatchApproval
        );
    }

    #[test]
    fn decision_word_mapping() {
        for word in ["approved", "Allow", "ACCEPT", "acceptforsession"] {
            assert_eq!(parse_decision(word), Some(ApprovalDecision::Approved));
        }
        assert_eq!(
            parse_decision("approved_for_session"),
            Some(ApprovalDecision::ApprovedForSession)
        );
        for word in ["deny", "denied", "decline", "abort", "cancel"] {
            assert_eq!(parse_decision(word), Some(ApprovalDecision::Denied));
        }
        assert_eq!(parse_decision("maybe"), None);
        assert_eq!(parse_decision(""), None);
    }

    #[tokio::test]
    async fn respond_unknown_id_is_not_found() {
        let (server, _dir) = approval_server(Duration::from_secs(120)).await;
        let err = server
            .respond_approval("req-missing", ApprovalDecision::Approved)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound));
    }

    #[tokio::test]
    async fn approval_answered_within_deadline() {
        let (server, _dir) = approval_server(Duration::from_secs(120)).await;
        let mut rx = attach_subscriber(&server, "c-1", "t-appr");
        let session_id = server.session_for_thread("t-appr").unwrap();

        let waiter = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .handle_permission_request(permission_request(&session_id, "bash", "ls"))
                    .await
            })
        };

        let (method, params) = next_notification(&mut rx).await;
        assert_eq!(method, "codex/request");
        assert_eq!(params["method"], "execCommandApproval");
        assert_eq!(params["params"]["command"], "bash ls");
        assert_eq!(params["params"]["toolName"], "bash");
        let request_id = params["requestId"].as_str().unwrap().to_string();

        server
            .respond_approval(&request_id, ApprovalDecision::Approved)
            .unwrap();
        assert_eq!(waiter.await.unwrap(), PermissionDecision::Allow);

        let (method, params) = next_notification(&mut rx).await;
        assert_eq!(method, "codex/request/resolved");
        assert_eq!(params["status"], "answered");
        assert_eq!(params["requestId"], request_id.as_str());

        // The entry is gone; a second respond is rejected.
        let err = server
            .respond_approval(&request_id, ApprovalDecision::Denied)
            .unwrap_err();
        assert!(matches!(err, ApprovalError::NotFound));
    }

    #[tokio::test]
    async fn approval_times_out_to_deny() {
        let (server, _dir) = approval_server(Duration::from_millis(50)).await;
        let mut rx = attach_subscriber(&server, "c-1", "t-appr");
        let session_id = server.session_for_thread("t-appr").unwrap();

        let decision = server
            .handle_permission_request(permission_request(&session_id, "bash", "rm -rf /tmp/x"))
            .await;
        assert_eq!(decision, PermissionDecision::Deny);

        let (method, _) = next_notification(&mut rx).await;
        assert_eq!(method, "codex/request");
        let (method, params) = next_notification(&mut rx).await;
        assert_eq!(method, "codex/request/resolved");
        assert_eq!(params["status"], "timeout");
        assert_eq!(params["reason"], "approval timeout");

        // No second resolution.
        assert!(rx.try_recv().is_err());
        assert!(server.read_state().pending_approvals.is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_retires_pending_entry() {
        let (server, _dir) = approval_server(Duration::from_secs(120)).await;
        let mut rx = attach_subscriber(&server, "c-1", "t-appr");
        let session_id = server.session_for_thread("t-appr").unwrap();

        let waiter = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .handle_permission_request(permission_request(&session_id, "bash", "ls"))
                    .await
            })
        };
        let (_, params) = next_notification(&mut rx).await;
        let request_id = params["requestId"].as_str().unwrap().to_string();

        // Engine cancels the stream: the waiter future is dropped.
        waiter.abort();
        let _ = waiter.await;

        let (method, params) = next_notification(&mut rx).await;
        assert_eq!(method, "codex/request/resolved");
        assert_eq!(params["status"], "timeout");
        assert_eq!(params["reason"], "context canceled");
        assert_eq!(params["requestId"], request_id.as_str());
        assert!(server.read_state().pending_approvals.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_denied_without_broadcast() {
        let (server, _dir) = approval_server(Duration::from_secs(120)).await;
        let mut rx = attach_subscriber(&server, "c-1", "t-appr");

        let decision = server
            .handle_permission_request(permission_request("sess-unknown", "bash", "ls"))
            .await;
        assert_eq!(decision, PermissionDecision::Deny);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn approved_for_session_reaches_engine_distinctly() {
        let (server, _dir) = approval_server(Duration::from_secs(120)).await;
        let mut rx = attach_subscriber(&server, "c-1", "t-appr");
        let session_id = server.session_for_thread("t-appr").unwrap();

        let waiter = {
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                server
                    .handle_permission_request(permission_request(&session_id, "bash", "ls"))
                    .await
            })
        };
        let (_, params) = next_notification(&mut rx).await;
        let request_id = params["requestId"].as_str().unwrap().to_string();
        server
            .respond_approval(&request_id, ApprovalDecision::ApprovedForSession)
            .unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            PermissionDecision::AllowForSession
        );
    }
}
