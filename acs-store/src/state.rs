//! On-disk formats.
//!
//! `PersistedState` is the global index; `PersistedSession` is one
//! thread's file under `sessions/`. Session files are authoritative
//! for items and cursors. Older indexes carried items inline
//! (`threadItems`/`threadCursors`); those fields are still accepted on
//! read and dropped on the next write, which migrates them into
//! session files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use acs_core::{Thread, ThreadItem, WorkspaceInfo};

/// Current format version for both files.
pub const STATE_VERSION: u32 = 1;

/// The global index (`state.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub threads: Vec<Thread>,
    /// Legacy inline items; migrated into session files on write.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub thread_items: HashMap<String, Vec<ThreadItem>>,
    /// Legacy inline cursors; migrated with `thread_items`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub thread_cursors: HashMap<String, u64>,
    #[serde(default)]
    pub thread_session: HashMap<String, String>,
    #[serde(default)]
    pub loaded_threads: Vec<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub workspaces: Vec<WorkspaceInfo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub active_workspace: String,
    #[serde(default)]
    pub thread_projects: HashMap<String, String>,
    #[serde(default)]
    pub recent_paths: Vec<String>,
    #[serde(default)]
    pub favorite_paths: Vec<String>,
}

/// One thread's session file (`sessions/<id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default)]
    pub version: u32,
    pub thread: Thread,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_id: String,
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub items: Vec<ThreadItem>,
}
