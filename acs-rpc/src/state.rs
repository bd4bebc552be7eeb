//! Shared server state.
//!
//! One record owns everything the subsystems coordinate on: the thread
//! registry, thread<->engine-session bindings, subscriptions, room
//! leases, pending approvals, settings, and workspace preferences. A
//! single reader/writer lock guards it; lock intervals cover only
//! bounded in-memory work (no I/O, no channel sends, no awaits).
//! Persistence is serialized separately and always runs after the main
//! lock is released, so the engine stream is never blocked on disk.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};

use acs_core::types::{new_item_id, new_session_id, new_thread_id, now_rfc3339};
use acs_core::{Engine, Role, Thread, ThreadItem, WorkspaceInfo};
use acs_store::{StateSnapshot, StateStore, StoreError};

use crate::approvals::PendingApproval;
use crate::protocol::OutboundMessage;

/// Page size for `thread/list`.
pub const LIST_PAGE_SIZE: usize = 50;

/// Tunables for the server. Defaults match the wire contract; tests
/// shrink the durations.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Data directory holding `config.toml`, `state.json`, `sessions/`.
    pub data_dir: PathBuf,
    /// Room lease time-to-live.
    pub lease_ttl: Duration,
    /// How often the expiry task scans for dead leases.
    pub lease_sweep_interval: Duration,
    /// How long an approval waits for a client decision.
    pub approval_timeout: Duration,
    /// Hard deadline for one assistant turn.
    pub turn_deadline: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: acs_store::resolve_data_dir(),
            lease_ttl: Duration::from_secs(30),
            lease_sweep_interval: Duration::from_secs(1),
            approval_timeout: Duration::from_secs(120),
            turn_deadline: Duration::from_secs(600),
        }
    }
}

/// A connected client's server-side handle.
#[derive(Clone)]
pub struct ClientHandle {
    /// Bounded outbound queue, drained by the connection's writer task.
    pub tx: mpsc::Sender<OutboundMessage>,
}

/// Everything behind the lock.
#[derive(Default)]
pub struct ServerState {
    pub clients: HashMap<String, ClientHandle>,

    /// Thread catalog, newest first.
    pub threads: Vec<Thread>,
    pub thread_by_id: HashMap<String, Thread>,
    pub thread_items: HashMap<String, Vec<ThreadItem>>,
    pub thread_cursors: HashMap<String, u64>,
    /// thread id -> engine session id, and its inverse. Both sides are
    /// updated together on every mutation.
    pub thread_session: HashMap<String, String>,
    pub session_thread: HashMap<String, String>,
    pub loaded_threads: HashSet<String>,

    /// thread id -> subscribed client ids.
    pub subscribers: HashMap<String, HashSet<String>>,

    /// Room leases: owner and absolute deadline (unix millis). Absent
    /// entry = unowned.
    pub owner_by_thread: HashMap<String, String>,
    pub lease_deadline_ms: HashMap<String, i64>,

    pub pending_approvals: HashMap<String, PendingApproval>,

    pub settings: Map<String, Value>,
    pub config: String,

    pub workspaces: Vec<WorkspaceInfo>,
    pub active_workspace: String,
    pub thread_projects: HashMap<String, String>,
    pub recent_paths: Vec<String>,
    pub favorite_paths: Vec<String>,
}

impl ServerState {
    /// Materialize `thread_id` if the registry does not know it yet,
    /// minting a fresh engine session binding. Call under the write lock.
    pub fn ensure_thread(&mut self, thread_id: &str) {
        if !self.thread_by_id.contains_key(thread_id) {
            let thread = Thread::new(thread_id);
            self.thread_by_id
                .insert(thread_id.to_string(), thread.clone());
            self.threads.insert(0, thread);
        }
        if !self.thread_session.contains_key(thread_id) {
            let session_id = new_session_id();
            self.session_thread
                .insert(session_id.clone(), thread_id.to_string());
            self.thread_session
                .insert(thread_id.to_string(), session_id);
        }
    }
}

/// One page of `thread/list`.
#[derive(Debug, Clone)]
pub struct ThreadPage {
    pub threads: Vec<Thread>,
    pub next_cursor: Option<String>,
}

/// The server record. All subsystems receive it as `Arc<Server>` and
/// coordinate through its lock.
pub struct Server {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) store: StateStore,
    pub(crate) config: ServerConfig,
    state: RwLock<ServerState>,
    persist_lock: Mutex<()>,
}

impl Server {
    /// Open the store, load persisted state, and build the server.
    pub async fn new(
        engine: Arc<dyn Engine>,
        config: ServerConfig,
    ) -> Result<Arc<Self>, StoreError> {
        let store = StateStore::open(&config.data_dir)?;
        let snapshot = store.load().await;
        let config_blob = store.read_config().await;

        let mut state = ServerState {
            threads: snapshot.threads,
            thread_by_id: snapshot.thread_by_id,
            thread_items: snapshot.thread_items,
            thread_cursors: snapshot.thread_cursors,
            loaded_threads: snapshot.loaded_threads.into_iter().collect(),
            settings: snapshot.settings,
            config: config_blob,
            workspaces: snapshot.workspaces,
            active_workspace: snapshot.active_workspace,
            thread_projects: snapshot.thread_projects,
            recent_paths: snapshot.recent_paths,
            favorite_paths: snapshot.favorite_paths,
            ..ServerState::default()
        };
        for (thread_id, session_id) in &snapshot.thread_session {
            state
                .session_thread
                .insert(session_id.clone(), thread_id.clone());
        }
        state.thread_session = snapshot.thread_session;
        if state.settings.is_empty() {
            state.settings = default_settings();
        }

        Ok(Arc::new(Self {
            engine,
            store,
            config,
            state: RwLock::new(state),
            persist_lock: Mutex::new(()),
        }))
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, ServerState> {
        self.state.read()
    }

    pub(crate) fn write_state(&self) -> RwLockWriteGuard<'_, ServerState> {
        self.state.write()
    }

    /// Register a freshly connected client.
    pub fn register_client(&self, client_id: &str, handle: ClientHandle) {
        self.write_state()
            .clients
            .insert(client_id.to_string(), handle);
    }

    /// Remove a client from the connection table and every
    /// subscription set. Leases it holds are left to expire by TTL.
    pub fn remove_client(&self, client_id: &str) {
        let mut st = self.write_state();
        st.clients.remove(client_id);
        for subs in st.subscribers.values_mut() {
            subs.remove(client_id);
        }
    }

    // -----------------------------------------------------------------
    // Thread registry
    // -----------------------------------------------------------------

    /// Paged thread listing, `created_at` descending with the thread id
    /// as tie-break. `cursor` is the stringified offset of the next page.
    pub fn list_threads(&self, cursor: Option<&str>, loaded_only: bool) -> ThreadPage {
        let mut threads: Vec<Thread> = {
            let st = self.read_state();
            if loaded_only {
                st.threads
                    .iter()
                    .filter(|t| st.loaded_threads.contains(&t.id))
                    .cloned()
                    .collect()
            } else {
                st.threads.clone()
            }
        };
        threads.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let start = cursor
            .and_then(|c| c.parse::<usize>().ok())
            .filter(|n| *n <= threads.len())
            .unwrap_or(0);
        let end = (start + LIST_PAGE_SIZE).min(threads.len());
        let next_cursor = (end < threads.len()).then(|| end.to_string());
        ThreadPage {
            threads: threads[start..end].to_vec(),
            next_cursor,
        }
    }

    /// Mint a new thread with a fresh engine session binding.
    pub async fn start_thread(&self) -> (String, Thread) {
        let id = new_thread_id();
        let thread = Thread::new(&id);
        {
            let mut st = self.write_state();
            st.threads.insert(0, thread.clone());
            st.thread_by_id.insert(id.clone(), thread.clone());
            st.thread_items.insert(id.clone(), Vec::new());
            st.thread_cursors.insert(id.clone(), 0);
            let session_id = new_session_id();
            st.session_thread.insert(session_id.clone(), id.clone());
            st.thread_session.insert(id.clone(), session_id);
            st.loaded_threads.insert(id.clone());
        }
        self.persist().await;
        (id, thread)
    }

    /// Append an item with a minted id.
    pub async fn append_item(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        turn_id: &str,
        raw: Option<Value>,
    ) -> ThreadItem {
        self.append_item_with_id(thread_id, &new_item_id(), role, content, turn_id, raw)
            .await
    }

    /// Append an item reusing `item_id` (delta recipients reconcile on
    /// it). The cursor read/increment and the append share one lock
    /// interval.
    pub async fn append_item_with_id(
        &self,
        thread_id: &str,
        item_id: &str,
        role: Role,
        content: &str,
        turn_id: &str,
        raw: Option<Value>,
    ) -> ThreadItem {
        let item = {
            let mut st = self.write_state();
            let cursor = st.thread_cursors.get(thread_id).copied().unwrap_or(0) + 1;
            st.thread_cursors.insert(thread_id.to_string(), cursor);
            let item = ThreadItem {
                id: item_id.to_string(),
                thread_id: thread_id.to_string(),
                role,
                content: content.to_string(),
                created_at: now_rfc3339(),
                cursor,
                turn_id: turn_id.to_string(),
                raw,
            };
            st.thread_items
                .entry(thread_id.to_string())
                .or_default()
                .push(item.clone());
            st.loaded_threads.insert(thread_id.to_string());
            item
        };
        self.persist().await;
        item
    }

    /// The engine session bound to a thread, if any.
    pub fn session_for_thread(&self, thread_id: &str) -> Option<String> {
        self.read_state().thread_session.get(thread_id).cloned()
    }

    /// The thread bound to an engine session, if any.
    pub fn thread_for_session(&self, session_id: &str) -> Option<String> {
        self.read_state().session_thread.get(session_id).cloned()
    }

    /// Working directory for a thread: its project path if set, else
    /// the active workspace.
    pub fn workspace_path_for_thread(&self, thread_id: &str) -> String {
        let st = self.read_state();
        st.thread_projects
            .get(thread_id)
            .cloned()
            .unwrap_or_else(|| st.active_workspace.clone())
    }

    // -----------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------

    /// Write-behind: snapshot under the read lock, then write under the
    /// persistence mutex. I/O failures are logged and swallowed; the
    /// in-memory state stays authoritative.
    pub async fn persist(&self) {
        let snapshot = {
            let st = self.read_state();
            let mut loaded: Vec<String> = st.loaded_threads.iter().cloned().collect();
            loaded.sort();
            StateSnapshot {
                threads: st.threads.clone(),
                thread_by_id: st.thread_by_id.clone(),
                thread_items: st.thread_items.clone(),
                thread_cursors: st.thread_cursors.clone(),
                thread_session: st.thread_session.clone(),
                loaded_threads: loaded,
                settings: st.settings.clone(),
                workspaces: st.workspaces.clone(),
                active_workspace: st.active_workspace.clone(),
                thread_projects: st.thread_projects.clone(),
                recent_paths: st.recent_paths.clone(),
                favorite_paths: st.favorite_paths.clone(),
            }
        };
        let _guard = self.persist_lock.lock().await;
        if let Err(err) = self.store.save(&snapshot).await {
            tracing::warn!("state persistence failed: {err}");
        }
    }
}

fn default_settings() -> Map<String, Value> {
    let mut settings = Map::new();
    settings.insert("version".to_string(), Value::from(1));
    settings.insert(
        "automation".to_string(),
        serde_json::json!({
            "auto_subscribe": true,
            "auto_claim": true,
            "auto_renew": true,
        }),
    );
    settings
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use acs_core::EchoEngine;

    async fn test_server() -> (Arc<Server>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let server = Server::new(Arc::new(EchoEngine::default()), config)
            .await
            .unwrap();
        (server, dir)
    }

    #[tokio::test]
    async fn cursors_are_dense_and_increasing() {
        let (server, _dir) = test_server().await;
        let (thread_id, _) = server.start_thread().await;

        let a = server
            .append_item(&thread_id, Role::User, "one", "turn-1", None)
            .await;
        let b = server
            .append_item(&thread_id, Role::Assistant, "two", "turn-1", None)
            .await;
        let c = server
            .append_item(&thread_id, Role::User, "three", "turn-2", None)
            .await;
        assert_eq!(a.cursor, 1);
        assert_eq!(b.cursor, a.cursor + 1);
        assert_eq!(c.cursor, b.cursor + 1);
    }

    #[tokio::test]
    async fn binding_is_a_bijection() {
        let (server, _dir) = test_server().await;
        let (t1, _) = server.start_thread().await;
        let (t2, _) = server.start_thread().await;

        for thread_id in [&t1, &t2] {
            let session = server.session_for_thread(thread_id).unwrap();
            assert_eq!(
                server.thread_for_session(&session).as_deref(),
                Some(thread_id.as_str())
            );
        }
    }

    #[tokio::test]
    async fn ensure_thread_is_idempotent() {
        let (server, _dir) = test_server().await;
        {
            let mut st = server.write_state();
            st.ensure_thread("t-ext");
            let session = st.thread_session["t-ext"].clone();
            st.ensure_thread("t-ext");
            assert_eq!(st.thread_session["t-ext"], session);
            assert_eq!(st.threads.iter().filter(|t| t.id == "t-ext").count(), 1);
        }
    }

    #[tokio::test]
    async fn list_pages_and_orders_by_created_at() {
        let (server, _dir) = test_server().await;
        {
            let mut st = server.write_state();
            for i in 0..(LIST_PAGE_SIZE + 5) {
                let thread = Thread {
                    id: format!("t-{i:03}"),
                    title: String::new(),
                    created_at: format!("2026-01-01T00:00:{:02}Z", i % 60),
                };
                st.thread_by_id.insert(thread.id.clone(), thread.clone());
                st.threads.push(thread);
            }
        }

        let page = server.list_threads(None, false);
        assert_eq!(page.threads.len(), LIST_PAGE_SIZE);
        let next = page.next_cursor.clone().unwrap();
        // Descending creation order.
        assert!(page.threads[0].created_at >= page.threads[1].created_at);

        let rest = server.list_threads(Some(&next), false);
        assert_eq!(rest.threads.len(), 5);
        assert!(rest.next_cursor.is_none());
    }

    #[tokio::test]
    async fn list_tie_breaks_on_thread_id() {
        let (server, _dir) = test_server().await;
        {
            let mut st = server.write_state();
            for id in ["t-b", "t-a", "t-c"] {
                let thread = Thread {
                    id: id.to_string(),
                    title: String::new(),
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                };
                st.thread_by_id.insert(id.to_string(), thread.clone());
                st.threads.push(thread);
            }
        }
        let page = server.list_threads(None, false);
        let ids: Vec<&str> = page.threads.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t-a", "t-b", "t-c"]);
    }

    #[tokio::test]
    async fn loaded_only_filters_unloaded_threads() {
        let (server, _dir) = test_server().await;
        let (loaded_id, _) = server.start_thread().await;
        {
            let mut st = server.write_state();
            st.ensure_thread("t-unloaded");
        }

        let page = server.list_threads(None, true);
        let ids: Vec<&str> = page.threads.iter().map(|t| t.id.as_str()).collect();
        assert!(ids.contains(&loaded_id.as_str()));
        assert!(!ids.contains(&"t-unloaded"));
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };

        let (thread_id, session_id) = {
            let server = Server::new(Arc::new(EchoEngine::default()), config.clone())
                .await
                .unwrap();
            let (thread_id, _) = server.start_thread().await;
            server
                .append_item(&thread_id, Role::User, "hello", "turn-1", None)
                .await;
            server
                .append_item(&thread_id, Role::Assistant, "hi there", "turn-1", None)
                .await;
            let session_id = server.session_for_thread(&thread_id).unwrap();
            (thread_id, session_id)
        };

        let server = Server::new(Arc::new(EchoEngine::default()), config)
            .await
            .unwrap();
        let st = server.read_state();
        let items = &st.thread_items[&thread_id];
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].cursor, 1);
        assert_eq!(items[1].cursor, 2);
        assert_eq!(st.thread_cursors[&thread_id], 2);
        assert_eq!(st.thread_session[&thread_id], session_id);
        assert_eq!(st.session_thread[&session_id], thread_id);
    }
}
