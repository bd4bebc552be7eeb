//! acs-core - Core types for the acs collaboration server
//!
//! These types form the representation boundary between the engine
//! (the opaque LLM agent runtime), the persistence layer, and the
//! JSON-RPC server: threads and their append-only item logs, the
//! engine event stream, and the permission-callback contract.

pub mod engine;
pub mod event;
pub mod types;

pub use engine::{
    EchoEngine, Engine, EngineError, EventStream, PermissionDecision, PermissionHandler,
    PermissionRequest, SkillMeta,
};
pub use event::StreamEvent;
pub use types::{Role, Thread, ThreadItem, WorkspaceInfo};
