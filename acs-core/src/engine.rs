//! The engine contract.
//!
//! The LLM agent runtime is an opaque collaborator: the server starts a
//! turn with `stream()` and consumes events until the stream ends.
//! Permission requests travel the other way, through a handler slot
//! that is installed after both sides are constructed (the server holds
//! the engine; the engine calls back into the server).

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::StreamEvent;

/// Boxed stream of engine events for one turn.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Errors from the engine boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine does not recognize the session id.
    #[error("unknown engine session: {0}")]
    UnknownSession(String),
    /// Any other engine-side failure.
    #[error("engine failure: {0}")]
    Internal(String),
}

/// One entry of the engine's skill catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillMeta {
    pub name: String,
    pub description: String,
    pub path: String,
}

/// A permission request raised from inside a tool execution.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    pub tool_name: String,
    pub tool_params: Value,
    pub session_id: String,
    pub rule: String,
    pub target: String,
    pub reason: String,
}

/// Decision returned to the engine for a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    /// Allow, and remember the grant for the rest of the session.
    /// Engines that do not track session grants treat this as `Allow`.
    AllowForSession,
    Deny,
    Ask,
}

/// Callback the engine invokes for human-in-the-loop approvals.
///
/// The call suspends the stream until a decision is produced, so
/// implementations must resolve within a bounded time.
#[async_trait]
pub trait PermissionHandler: Send + Sync {
    async fn on_permission_request(&self, request: PermissionRequest) -> PermissionDecision;
}

/// The LLM agent runtime, seen from the server as an opaque stream source.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run one model turn on `session_id` and stream its events.
    async fn stream(&self, session_id: &str, prompt: &str) -> Result<EventStream, EngineError>;

    /// Skill catalog for `skill/list`.
    fn skills(&self) -> Vec<SkillMeta>;

    /// Install the permission callback. Late-bound: set after the
    /// server is constructed so neither side needs the other at
    /// construction time.
    fn set_permission_handler(&self, handler: Arc<dyn PermissionHandler>);
}

/// Offline engine that plays the prompt back as a short stream.
///
/// The binary falls back to this when no runtime backend is wired up;
/// tests build scripted engines on the same shape.
#[derive(Default)]
pub struct EchoEngine {
    skills: Vec<SkillMeta>,
    handler: RwLock<Option<Arc<dyn PermissionHandler>>>,
}

impl EchoEngine {
    pub fn new(skills: Vec<SkillMeta>) -> Self {
        Self {
            skills,
            handler: RwLock::new(None),
        }
    }

    /// The currently installed permission handler, if any.
    pub fn permission_handler(&self) -> Option<Arc<dyn PermissionHandler>> {
        self.handler.read().clone()
    }
}

#[async_trait]
impl Engine for EchoEngine {
    async fn stream(&self, _session_id: &str, prompt: &str) -> Result<EventStream, EngineError> {
        let text = format!("Echo: {prompt}");
        let stream = async_stream::stream! {
            for chunk in text.split_inclusive(' ') {
                yield StreamEvent::TextDelta { delta: chunk.to_string() };
            }
            yield StreamEvent::MessageStop;
        };
        Ok(Box::pin(stream))
    }

    fn skills(&self) -> Vec<SkillMeta> {
        self.skills.clone()
    }

    fn set_permission_handler(&self, handler: Arc<dyn PermissionHandler>) {
        *self.handler.write() = Some(handler);
    }
}
