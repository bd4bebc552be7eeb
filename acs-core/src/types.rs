//! Thread and item wire types.
//!
//! Field names are camelCase on the wire for client compatibility; the
//! same shapes are persisted to disk, so changes here are format
//! changes.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A conversational room identified by a stable id, carrying an
/// append-only item log (held separately by the server).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
}

impl Thread {
    /// Materialize a thread record for `id` with a derived title and a
    /// fresh creation timestamp.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: format!("Thread {}", short_id(&id)),
            created_at: now_rfc3339(),
            id,
        }
    }
}

/// Author of a thread item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Assistant,
    System,
    Tool,
}

/// One append-only entry in a thread's log.
///
/// `cursor` is dense and strictly increasing per thread, starting at 1;
/// `turn_id` groups the items of a single user turn. `raw` carries the
/// structured payload for tool events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadItem {
    pub id: String,
    pub thread_id: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
    pub cursor: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub turn_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// A workspace directory known to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub id: String,
    pub path: String,
    pub name: String,
    pub active: bool,
    pub exists: bool,
}

/// Current wall-clock time as an RFC 3339 string (second precision, UTC).
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current wall-clock time as unix-epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// First eight bytes of an id, used for derived titles. Ids that are
/// shorter, or not cleanly sliceable, come back whole.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Mint a thread id.
pub fn new_thread_id() -> String {
    Uuid::now_v7().to_string()
}

/// Mint an engine session id.
pub fn new_session_id() -> String {
    Uuid::now_v7().to_string()
}

/// Mint an item id (`msg-` prefixed).
pub fn new_item_id() -> String {
    format!("msg-{}", Uuid::now_v7())
}

/// Mint a turn id (`turn-` prefixed).
pub fn new_turn_id() -> String {
    format!("turn-{}", Uuid::now_v7())
}

/// Mint an approval request id (`req-` prefixed).
pub fn new_request_id() -> String {
    format!("req-{}", Uuid::now_v7())
}
