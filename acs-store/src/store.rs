//! File-backed state store.
//!
//! Every save is a full rewrite: the index and every live session file
//! are serialized and atomically swapped into place, and session files
//! that no longer correspond to a live thread are deleted. Loads run
//! two passes: the index first, then every session file, with session
//! files winning for items and cursors.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use acs_core::types::short_id;
use acs_core::{Thread, ThreadItem, WorkspaceInfo};

use crate::error::StoreError;
use crate::state::{PersistedSession, PersistedState, STATE_VERSION};

/// In-memory image of everything the store persists.
///
/// The server builds one of these under its lock and hands it to
/// `save`; `load` returns the same shape.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    pub threads: Vec<Thread>,
    pub thread_by_id: HashMap<String, Thread>,
    pub thread_items: HashMap<String, Vec<ThreadItem>>,
    pub thread_cursors: HashMap<String, u64>,
    pub thread_session: HashMap<String, String>,
    pub loaded_threads: Vec<String>,
    pub settings: Map<String, Value>,
    pub workspaces: Vec<WorkspaceInfo>,
    pub active_workspace: String,
    pub thread_projects: HashMap<String, String>,
    pub recent_paths: Vec<String>,
    pub favorite_paths: Vec<String>,
}

/// The store itself: a data directory with `config.toml`, `state.json`
/// and a `sessions/` subdirectory.
pub struct StateStore {
    data_dir: PathBuf,
    state_path: PathBuf,
    sessions_dir: PathBuf,
    config_path: PathBuf,
}

impl StateStore {
    /// Open (and create if needed) the store under `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        let sessions_dir = data_dir.join("sessions");
        std::fs::create_dir_all(&sessions_dir)?;
        Ok(Self {
            state_path: data_dir.join("state.json"),
            config_path: data_dir.join("config.toml"),
            data_dir,
            sessions_dir,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Opaque `config.toml` passthrough; empty string when absent.
    pub async fn read_config(&self) -> String {
        fs::read_to_string(&self.config_path).await.unwrap_or_default()
    }

    /// Overwrite `config.toml` verbatim.
    pub async fn write_config(&self, content: &str) -> Result<(), StoreError> {
        write_atomic(&self.config_path, content.as_bytes()).await
    }

    /// Load the index, then every session file. Malformed or unreadable
    /// files are skipped; the result is whatever survived.
    pub async fn load(&self) -> StateSnapshot {
        let mut snapshot = StateSnapshot::default();

        match fs::read(&self.state_path).await {
            Ok(data) if !data.is_empty() => match serde_json::from_slice::<PersistedState>(&data) {
                Ok(ps) => apply_index(&mut snapshot, ps),
                Err(err) => {
                    tracing::warn!("state index unreadable, starting fresh: {err}");
                }
            },
            _ => {}
        }

        self.load_sessions(&mut snapshot).await;
        snapshot
    }

    async fn load_sessions(&self, snapshot: &mut StateSnapshot) {
        let Ok(mut entries) = fs::read_dir(&self.sessions_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !has_json_extension(&path) {
                continue;
            }
            let Ok(data) = fs::read(&path).await else {
                continue;
            };
            let Ok(session) = serde_json::from_slice::<PersistedSession>(&data) else {
                tracing::warn!("skipping malformed session file {}", path.display());
                continue;
            };
            if session.thread.id.is_empty() {
                continue;
            }

            let thread_id = session.thread.id.clone();
            snapshot
                .thread_by_id
                .insert(thread_id.clone(), session.thread.clone());
            snapshot
                .thread_items
                .insert(thread_id.clone(), session.items);
            snapshot
                .thread_cursors
                .insert(thread_id.clone(), session.cursor);
            if !session.session_id.is_empty() {
                snapshot
                    .thread_session
                    .insert(thread_id.clone(), session.session_id);
            }
            if !snapshot.threads.iter().any(|t| t.id == thread_id) {
                snapshot.threads.push(session.thread);
            }
        }
    }

    /// Full rewrite of the index and all live session files, then GC of
    /// session files whose basename is not live.
    pub async fn save(&self, snapshot: &StateSnapshot) -> Result<(), StoreError> {
        let index = PersistedState {
            version: STATE_VERSION,
            threads: snapshot.threads.clone(),
            thread_items: HashMap::new(),
            thread_cursors: HashMap::new(),
            thread_session: snapshot.thread_session.clone(),
            loaded_threads: snapshot.loaded_threads.clone(),
            settings: snapshot.settings.clone(),
            workspaces: snapshot.workspaces.clone(),
            active_workspace: snapshot.active_workspace.clone(),
            thread_projects: snapshot.thread_projects.clone(),
            recent_paths: snapshot.recent_paths.clone(),
            favorite_paths: snapshot.favorite_paths.clone(),
        };
        let data = serde_json::to_vec_pretty(&index)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(&self.state_path, &data).await?;

        fs::create_dir_all(&self.sessions_dir).await?;
        let mut live: HashSet<String> = HashSet::new();
        for (thread_id, items) in &snapshot.thread_items {
            let file_id = sanitize_session_filename(thread_id);
            live.insert(file_id.clone());

            let thread = snapshot
                .thread_by_id
                .get(thread_id)
                .cloned()
                .unwrap_or_else(|| Thread {
                    id: thread_id.clone(),
                    title: format!("Thread {}", short_id(thread_id)),
                    created_at: String::new(),
                });
            let session = PersistedSession {
                version: STATE_VERSION,
                thread,
                session_id: snapshot
                    .thread_session
                    .get(thread_id)
                    .cloned()
                    .unwrap_or_default(),
                cursor: snapshot.thread_cursors.get(thread_id).copied().unwrap_or(0),
                items: items.clone(),
            };
            let data = serde_json::to_vec_pretty(&session)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let path = self.sessions_dir.join(format!("{file_id}.json"));
            write_atomic(&path, &data).await?;
        }

        self.collect_stale_sessions(&live).await;
        Ok(())
    }

    async fn collect_stale_sessions(&self, live: &HashSet<String>) {
        let Ok(mut entries) = fs::read_dir(&self.sessions_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !has_json_extension(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !live.contains(stem) {
                let _ = fs::remove_file(&path).await;
            }
        }
    }
}

fn apply_index(snapshot: &mut StateSnapshot, ps: PersistedState) {
    snapshot.threads = ps.threads;
    for thread in &snapshot.threads {
        snapshot
            .thread_by_id
            .insert(thread.id.clone(), thread.clone());
    }
    // Legacy migration path: old indexes carried items and cursors
    // inline. Adopt them here; session files loaded afterwards win.
    snapshot.thread_items = ps.thread_items;
    snapshot.thread_cursors = ps.thread_cursors;
    snapshot.thread_session = ps.thread_session;
    snapshot.loaded_threads = ps.loaded_threads;
    snapshot.settings = ps.settings;
    snapshot.workspaces = ps.workspaces;
    snapshot.active_workspace = ps.active_workspace;
    snapshot.thread_projects = ps.thread_projects;
    snapshot.recent_paths = ps.recent_paths;
    snapshot.favorite_paths = ps.favorite_paths;
}

fn has_json_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Session filenames are derived from the thread id; path separators
/// and parent references collapse to `_`.
pub fn sanitize_session_filename(thread_id: &str) -> String {
    if thread_id.is_empty() {
        return "unknown".to_string();
    }
    thread_id
        .replace("..", "_")
        .replace(['/', '\\', ':'], "_")
}

/// Data directory: `$ALICLOUD_SKILLS_HOME`, else `~/.alicloud-skills`,
/// else `./.alicloud-skills`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ALICLOUD_SKILLS_HOME") {
        let dir = dir.trim();
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".alicloud-skills")
}

/// Serialize to a sibling `*.tmp` in the same directory, then rename
/// over the target.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use acs_core::Role;

    fn item(thread_id: &str, cursor: u64, content: &str) -> ThreadItem {
        ThreadItem {
            id: format!("msg-{cursor}"),
            thread_id: thread_id.to_string(),
            role: Role::User,
            content: content.to_string(),
            created_at: String::new(),
            cursor,
            turn_id: "turn-1".to_string(),
            raw: None,
        }
    }

    fn snapshot_with_thread(thread_id: &str) -> StateSnapshot {
        let thread = Thread::new(thread_id);
        let mut snapshot = StateSnapshot::default();
        snapshot.threads.push(thread.clone());
        snapshot.thread_by_id.insert(thread_id.to_string(), thread);
        snapshot.thread_items.insert(
            thread_id.to_string(),
            vec![item(thread_id, 1, "hello"), item(thread_id, 2, "world")],
        );
        snapshot.thread_cursors.insert(thread_id.to_string(), 2);
        snapshot
            .thread_session
            .insert(thread_id.to_string(), "sess-1".to_string());
        snapshot.loaded_threads.push(thread_id.to_string());
        snapshot
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let snapshot = snapshot_with_thread("t-roundtrip");
        store.save(&snapshot).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.threads.len(), 1);
        assert_eq!(loaded.thread_cursors["t-roundtrip"], 2);
        let items = &loaded.thread_items["t-roundtrip"];
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].cursor, 1);
        assert_eq!(items[1].cursor, 2);
        assert_eq!(loaded.thread_session["t-roundtrip"], "sess-1");
        assert_eq!(loaded.loaded_threads, vec!["t-roundtrip".to_string()]);
    }

    #[tokio::test]
    async fn save_drops_stale_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store.save(&snapshot_with_thread("t-old")).await.unwrap();
        assert!(dir.path().join("sessions/t-old.json").exists());

        // A snapshot without t-old garbage-collects its session file.
        store.save(&snapshot_with_thread("t-new")).await.unwrap();
        assert!(!dir.path().join("sessions/t-old.json").exists());
        assert!(dir.path().join("sessions/t-new.json").exists());
    }

    #[tokio::test]
    async fn legacy_inline_items_migrate_to_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        // Hand-write a legacy index with inline items and no session files.
        let legacy = serde_json::json!({
            "version": 1,
            "threads": [{"id": "t-legacy", "title": "Thread t-legacy"}],
            "threadItems": {"t-legacy": [item("t-legacy", 1, "old data")]},
            "threadCursors": {"t-legacy": 1},
            "threadSession": {"t-legacy": "sess-legacy"},
            "loadedThreads": ["t-legacy"],
        });
        std::fs::write(
            dir.path().join("state.json"),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.thread_items["t-legacy"].len(), 1);
        assert_eq!(loaded.thread_cursors["t-legacy"], 1);

        // The next save materializes the session file and strips the
        // inline fields from the index.
        store.save(&loaded).await.unwrap();
        assert!(dir.path().join("sessions/t-legacy.json").exists());
        let index: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("state.json")).unwrap()).unwrap();
        assert!(index.get("threadItems").is_none());
        assert!(index.get("threadCursors").is_none());
    }

    #[tokio::test]
    async fn session_files_win_over_legacy_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let legacy = serde_json::json!({
            "version": 1,
            "threads": [{"id": "t-x"}],
            "threadItems": {"t-x": [item("t-x", 1, "stale")]},
            "threadCursors": {"t-x": 1},
        });
        std::fs::write(
            dir.path().join("state.json"),
            serde_json::to_vec(&legacy).unwrap(),
        )
        .unwrap();

        let session = PersistedSession {
            version: STATE_VERSION,
            thread: Thread::new("t-x"),
            session_id: "sess-x".to_string(),
            cursor: 3,
            items: vec![
                item("t-x", 1, "a"),
                item("t-x", 2, "b"),
                item("t-x", 3, "c"),
            ],
        };
        std::fs::write(
            dir.path().join("sessions/t-x.json"),
            serde_json::to_vec(&session).unwrap(),
        )
        .unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.thread_cursors["t-x"], 3);
        assert_eq!(loaded.thread_items["t-x"].len(), 3);
        assert_eq!(loaded.thread_session["t-x"], "sess-x");
    }

    #[tokio::test]
    async fn malformed_session_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        std::fs::write(dir.path().join("sessions/broken.json"), b"not json").unwrap();
        store.save(&snapshot_with_thread("t-good")).await.unwrap();

        let loaded = store.load().await;
        assert_eq!(loaded.threads.len(), 1);
        assert_eq!(loaded.threads[0].id, "t-good");
    }

    #[tokio::test]
    async fn session_file_registers_thread_missing_from_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let session = PersistedSession {
            version: STATE_VERSION,
            thread: Thread::new("t-orphan"),
            session_id: "sess-orphan".to_string(),
            cursor: 1,
            items: vec![item("t-orphan", 1, "hi")],
        };
        std::fs::write(
            dir.path().join("sessions/t-orphan.json"),
            serde_json::to_vec(&session).unwrap(),
        )
        .unwrap();

        let loaded = store.load().await;
        assert!(loaded.threads.iter().any(|t| t.id == "t-orphan"));
        assert!(loaded.thread_by_id.contains_key("t-orphan"));
    }

    #[tokio::test]
    async fn config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        assert_eq!(store.read_config().await, "");
        store.write_config("model = \"qwen-max\"\n").await.unwrap();
        assert_eq!(store.read_config().await, "model = \"qwen-max\"\n");
    }

    #[test]
    fn filename_sanitization() {
        assert_eq!(sanitize_session_filename("plain-id"), "plain-id");
        assert_eq!(sanitize_session_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_session_filename("../../etc"), "___etc");
        assert_eq!(sanitize_session_filename(""), "unknown");
    }
}
