//! `workspace/*` handlers.
//!
//! Workspaces are directories the desktop client works against. The
//! active workspace (or a per-thread project path) becomes the `cwd`
//! hint for turns that do not carry one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::{json, Value};

use acs_core::WorkspaceInfo;

use super::{parse_params, RpcResponseExt};
use crate::error;
use crate::protocol::{RpcId, RpcResponse};
use crate::state::{Server, ServerState};

/// Most recent paths are capped; older entries fall off the end.
const RECENT_PATHS_LIMIT: usize = 12;

#[derive(Debug, Deserialize)]
pub struct PathParams {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadGetParams {
    #[serde(default)]
    pub thread_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSetParams {
    #[serde(default)]
    pub thread_id: String,
    /// `null` clears the mapping.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BrowseParams {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub cursor: Option<usize>,
}

fn abs_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    std::path::absolute(Path::new(path))
        .unwrap_or_else(|_| PathBuf::from(path))
        .display()
        .to_string()
}

fn empty_to_null(s: &str) -> Value {
    if s.trim().is_empty() {
        Value::Null
    } else {
        Value::from(s)
    }
}

fn touch_recent(recent: &mut Vec<String>, path: &str) {
    recent.retain(|p| p != path);
    recent.insert(0, path.to_string());
    recent.truncate(RECENT_PATHS_LIMIT);
}

fn workspace_snapshot(st: &ServerState) -> Value {
    json!({
        "workspaces": st.workspaces,
        "activePath": empty_to_null(&st.active_workspace),
        "threadProjects": st.thread_projects,
        "recentPaths": st.recent_paths,
        "favoritePaths": st.favorite_paths,
    })
}

fn preferences_snapshot(st: &ServerState) -> Value {
    json!({
        "recentPaths": st.recent_paths,
        "favoritePaths": st.favorite_paths,
    })
}

/// Handle `workspace/list`.
pub fn handle_list(id: Option<RpcId>, server: &Arc<Server>) -> RpcResponse {
    let result = workspace_snapshot(&server.read_state());
    RpcResponse::success(id, result)
}

/// Handle `workspace/add`.
pub async fn handle_add(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: PathParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let path = params.path.trim();
    if path.is_empty() {
        return RpcResponse::error(id, error::INVALID_PARAMS, "path is required");
    }
    let abs = abs_path(path);
    let exists = std::fs::metadata(&abs).map(|m| m.is_dir()).unwrap_or(false);

    let result = {
        let mut st = server.write_state();
        if !st.workspaces.iter().any(|w| w.path == abs) {
            let name = Path::new(&abs)
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&abs)
                .to_string();
            st.workspaces.push(WorkspaceInfo {
                id: abs.clone(),
                path: abs.clone(),
                name,
                active: false,
                exists,
            });
        }
        workspace_snapshot(&st)
    };
    server.persist().await;
    RpcResponse::success(id, result)
}

/// Handle `workspace/remove`.
pub async fn handle_remove(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: PathParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let abs = abs_path(params.path.trim());

    let result = {
        let mut st = server.write_state();
        st.workspaces.retain(|w| w.path != abs);
        if st.active_workspace == abs {
            st.active_workspace.clear();
        }
        st.thread_projects.retain(|_, p| *p != abs);
        workspace_snapshot(&st)
    };
    server.persist().await;
    RpcResponse::success(id, result)
}

/// Handle `workspace/activate`.
pub async fn handle_activate(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: PathParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let abs = abs_path(params.path.trim());

    let result = {
        let mut st = server.write_state();
        st.active_workspace = abs.clone();
        for w in &mut st.workspaces {
            w.active = w.path == abs;
        }
        if !st.recent_paths.iter().any(|p| *p == abs) {
            st.recent_paths.insert(0, abs.clone());
            st.recent_paths.truncate(RECENT_PATHS_LIMIT);
        }
        workspace_snapshot(&st)
    };
    server.persist().await;
    RpcResponse::success(id, result)
}

/// Handle `workspace/thread/get`.
pub fn handle_thread_get(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: ThreadGetParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let st = server.read_state();
    let workspace_path = st
        .thread_projects
        .get(&params.thread_id)
        .map(|p| Value::from(p.as_str()))
        .unwrap_or(Value::Null);
    RpcResponse::success(
        id,
        json!({
            "threadId": params.thread_id,
            "workspacePath": workspace_path,
            "threadProjects": st.thread_projects,
            "recentPaths": st.recent_paths,
        }),
    )
}

/// Handle `workspace/thread/set`.
pub async fn handle_thread_set(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: ThreadSetParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    if params.thread_id.is_empty() {
        return RpcResponse::error(id, error::INVALID_PARAMS, "threadId is required");
    }
    let path = params
        .path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(abs_path);

    let result = {
        let mut st = server.write_state();
        match &path {
            None => {
                st.thread_projects.remove(&params.thread_id);
            }
            Some(path) => {
                st.thread_projects
                    .insert(params.thread_id.clone(), path.clone());
                touch_recent(&mut st.recent_paths, path);
            }
        }
        json!({
            "threadId": params.thread_id,
            "workspacePath": path.as_deref().map(Value::from).unwrap_or(Value::Null),
            "threadProjects": st.thread_projects,
            "recentPaths": st.recent_paths,
        })
    };
    server.persist().await;
    RpcResponse::success(id, result)
}

/// Handle `workspace/preferences/get`.
pub fn handle_preferences(id: Option<RpcId>, server: &Arc<Server>) -> RpcResponse {
    let result = preferences_snapshot(&server.read_state());
    RpcResponse::success(id, result)
}

/// Handle `workspace/preferences/touch`.
pub async fn handle_touch_recent(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: PathParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let abs = abs_path(params.path.trim());

    let result = {
        let mut st = server.write_state();
        touch_recent(&mut st.recent_paths, &abs);
        preferences_snapshot(&st)
    };
    server.persist().await;
    RpcResponse::success(id, result)
}

/// Handle `workspace/preferences/toggleFavorite`.
pub async fn handle_toggle_favorite(
    id: Option<RpcId>,
    params: Option<&RawValue>,
    server: &Arc<Server>,
) -> RpcResponse {
    let params: PathParams = match parse_params(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let abs = abs_path(params.path.trim());

    let result = {
        let mut st = server.write_state();
        if st.favorite_paths.iter().any(|p| *p == abs) {
            st.favorite_paths.retain(|p| *p != abs);
        } else {
            st.favorite_paths.push(abs.clone());
        }
        preferences_snapshot(&st)
    };
    server.persist().await;
    RpcResponse::success(id, result)
}

/// Handle `workspace/browse`: list subdirectories of a path with
/// optional search and paging.
pub async fn handle_browse(id: Option<RpcId>, params: Option<&RawValue>) -> RpcResponse {
    let params: BrowseParams = match super::parse_params_or_default(params) {
        Ok(p) => p,
        Err(resp) => return resp.with_id(id),
    };
    let limit = params.limit.filter(|n| *n > 0 && *n <= 500).unwrap_or(100);
    let cursor = params.cursor.unwrap_or(0);
    let search = params.search.trim().to_lowercase();

    let path = if params.path.is_empty() {
        std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    } else {
        params.path
    };
    let path = abs_path(&path);

    let mut entries = match tokio::fs::read_dir(&path).await {
        Ok(entries) => entries,
        Err(err) => return RpcResponse::error(id, error::GENERIC, err.to_string()),
    };
    let mut dirs = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !search.is_empty() && !name.to_lowercase().contains(&search) {
            continue;
        }
        let full = Path::new(&path).join(&name).display().to_string();
        dirs.push(json!({"name": name, "path": full}));
    }
    dirs.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

    let end = (cursor + limit).min(dirs.len());
    let start = cursor.min(end);
    let next_cursor = if end < dirs.len() {
        Value::from(end)
    } else {
        Value::Null
    };
    let parent = Path::new(&path)
        .parent()
        .map(|p| Value::from(p.display().to_string()))
        .unwrap_or(Value::Null);

    RpcResponse::success(
        id,
        json!({
            "currentPath": path,
            "parentPath": parent,
            "directories": dirs[start..end],
            "nextCursor": next_cursor,
            "limit": limit,
        }),
    )
}
