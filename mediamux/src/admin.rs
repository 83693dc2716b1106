//! Admin HTTP API (C10): an `axum` router exposing the `/v3/...` surface
//! from the configuration/paths/session-listing/kick endpoints, calling into
//! [`PathManager`] and the wire drivers' own registries (e.g.
//! [`mediamux_engine::rtmp::ConnectionRegistry`]) rather than maintaining a
//! separate "fast path" view of live state.
//!
//! Grounded in the teacher's `synctv::server` axum-router construction
//! (state extension + versioned route groups) and `synctv-xiu`'s
//! `hls::server` response style (`(StatusCode, headers, body).into_response()`).

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use mediamux_core::config::{PathConfig, RelayConfig};
use mediamux_core::model::{PathsList, PathsListItem};
use mediamux_core::path::PathState;
use mediamux_core::path_manager::PathManager;
use mediamux_engine::rtmp::ConnectionRegistry;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared state for every admin API handler. `config` is the last config
/// this process loaded; reload swaps it out after `PathManager::apply_config`
/// succeeds so a subsequent `config/get` reflects it.
pub struct AdminState {
    pub manager: Arc<PathManager>,
    pub config: RwLock<RelayConfig>,
    pub config_path: std::path::PathBuf,
    pub rtmp_connections: Arc<ConnectionRegistry>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

/// Builds the `/v3/...` router per §6 of the configuration surface plus the
/// per-protocol session-listing/kick endpoints. Only `rtmpconns` exposes a
/// live connection registry; HLS muxers and HTTP-FLV viewers aren't tracked
/// by id in this repository, and RTSP/SRT/WebRTC have no driver at all, so
/// those listing routes return an empty list.
#[must_use]
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/v3/config/get", get(config_get))
        .route("/v3/config/reload", post(config_reload))
        .route("/v3/config/paths/add/{name}", post(path_add))
        .route("/v3/config/paths/patch/{name}", patch(path_patch))
        .route("/v3/config/paths/delete/{name}", delete(path_delete))
        .route("/v3/paths/list", get(paths_list))
        .route("/v3/rtmpconns/list", get(rtmpconns_list))
        .route("/v3/rtmpconns/kick/{id}", post(rtmpconns_kick))
        .route("/v3/rtspsessions/list", get(empty_session_list))
        .route("/v3/rtspssessions/list", get(empty_session_list))
        .route("/v3/srtconns/list", get(empty_session_list))
        .route("/v3/webrtcsessions/list", get(empty_session_list))
        .route("/v3/hlsmuxers/list", get(empty_session_list))
        .route("/v3/httpflvsessions/list", get(empty_session_list))
        .route("/v3/keepalives/list", get(keepalives_list))
        .route("/v3/keepalives/add/{name}", post(keepalives_add))
        .route("/v3/keepalives/kick/{id}", post(keepalives_kick))
        .with_state(state)
}

async fn config_get(State(state): State<Arc<AdminState>>) -> Response {
    Json(&*state.config.read().await).into_response()
}

/// Re-reads the config file from disk and hot-swaps the path table via
/// [`PathManager::apply_config`], matching the `SIGHUP`-triggered reload
/// path (§4.5, §6).
async fn config_reload(State(state): State<Arc<AdminState>>) -> Response {
    let new = match RelayConfig::load(&state.config_path) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    if let Err(e) = state.manager.apply_config(&new).await {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    *state.config.write().await = new;
    info!("configuration reloaded via admin API");
    StatusCode::OK.into_response()
}

async fn path_add(
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AdminState>>,
    Json(config): Json<PathConfig>,
) -> Response {
    let mut guard = state.config.write().await;
    if guard.paths.contains_key(&name) {
        return error_response(StatusCode::BAD_REQUEST, format!("path {name:?} already exists"));
    }
    guard.paths.insert(name.clone(), config);
    if let Err(e) = state.manager.apply_config(&guard).await {
        guard.paths.shift_remove(&name);
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    StatusCode::OK.into_response()
}

async fn path_patch(
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AdminState>>,
    Json(patch): Json<serde_json::Value>,
) -> Response {
    let mut guard = state.config.write().await;
    let Some(existing) = guard.paths.get(&name).cloned() else {
        return error_response(StatusCode::NOT_FOUND, format!("no such path {name:?}"));
    };
    let mut value = match serde_json::to_value(&existing) {
        Ok(v) => v,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    let (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) = (&mut value, patch) else {
        return error_response(StatusCode::BAD_REQUEST, "patch body must be a JSON object");
    };
    base.extend(overlay);
    let merged: PathConfig = match serde_json::from_value(value) {
        Ok(c) => c,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };
    guard.paths.insert(name, merged);
    if let Err(e) = state.manager.apply_config(&guard).await {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    StatusCode::OK.into_response()
}

async fn path_delete(AxumPath(name): AxumPath<String>, State(state): State<Arc<AdminState>>) -> Response {
    let mut guard = state.config.write().await;
    if guard.paths.shift_remove(&name).is_none() {
        return error_response(StatusCode::NOT_FOUND, format!("no such path {name:?}"));
    }
    if let Err(e) = state.manager.apply_config(&guard).await {
        return error_response(StatusCode::BAD_REQUEST, e.to_string());
    }
    state.manager.remove(&name).await;
    StatusCode::OK.into_response()
}

async fn paths_list(State(state): State<Arc<AdminState>>) -> Response {
    let mut list: PathsList = HashMap::new();
    for name in state.manager.list_names() {
        let Some(path) = state.manager.existing(&name) else { continue };
        let ready = path.state().await == PathState::Ready;
        let tracks = match path.stream().await {
            Some(stream) => stream
                .description()
                .medias
                .iter()
                .map(|m| format!("{:?}", m.kind))
                .collect(),
            None => Vec::new(),
        };
        list.insert(
            name,
            PathsListItem { source_type: None, source_id: None, ready, tracks },
        );
    }
    Json(list).into_response()
}

async fn rtmpconns_list(State(state): State<Arc<AdminState>>) -> Response {
    let conns: Vec<_> = state
        .rtmp_connections
        .list()
        .into_iter()
        .map(|c| {
            serde_json::json!({
                "id": c.id.to_string(),
                "remoteAddr": c.remote_addr.to_string(),
                "path": c.path,
            })
        })
        .collect();
    Json(serde_json::json!({ "items": conns })).into_response()
}

async fn rtmpconns_kick(AxumPath(id): AxumPath<String>, State(state): State<Arc<AdminState>>) -> Response {
    let Ok(uuid) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "not a uuid");
    };
    if state.rtmp_connections.kick(uuid) {
        warn!(%uuid, "rtmp connection kicked via admin API");
        StatusCode::OK.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "no such connection")
    }
}

async fn empty_session_list() -> Response {
    Json(serde_json::json!({ "items": [] })).into_response()
}

#[derive(Debug, serde::Deserialize)]
struct KeepaliveAddRequest {
    user: String,
    ip: std::net::IpAddr,
}

/// Attaches an admin-held keepalive reader to `name`, holding an on-demand
/// path open without a real player. Fails if the path has no live stream.
async fn keepalives_add(
    AxumPath(name): AxumPath<String>,
    State(state): State<Arc<AdminState>>,
    Json(request): Json<KeepaliveAddRequest>,
) -> Response {
    match state.manager.create_keepalive(&name, request.user, request.ip).await {
        Ok(id) => Json(serde_json::json!({ "id": id })).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn keepalives_list(State(state): State<Arc<AdminState>>) -> Response {
    let items: Vec<_> = state
        .manager
        .list_keepalives()
        .into_iter()
        .map(|k| {
            serde_json::json!({
                "id": k.id,
                "path": k.path_name,
                "user": k.user,
                "ip": k.ip.to_string(),
            })
        })
        .collect();
    Json(serde_json::json!({ "items": items })).into_response()
}

async fn keepalives_kick(AxumPath(id): AxumPath<String>, State(state): State<Arc<AdminState>>) -> Response {
    let Ok(id) = id.parse::<mediamux_core::keepalive::KeepaliveId>() else {
        return error_response(StatusCode::BAD_REQUEST, "not a valid keepalive id");
    };
    if state.manager.kick_keepalive(id) {
        StatusCode::OK.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "no such keepalive")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediamux_core::config::RelayConfig;

    fn manager() -> Arc<PathManager> {
        Arc::new(PathManager::new(&RelayConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn config_get_returns_the_loaded_config() {
        let state = Arc::new(AdminState {
            manager: manager(),
            config: RwLock::new(RelayConfig::default()),
            config_path: std::path::PathBuf::from("mediamux.yml"),
            rtmp_connections: ConnectionRegistry::new(),
        });
        let response = config_get(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn deleting_an_unknown_path_is_not_found() {
        let state = Arc::new(AdminState {
            manager: manager(),
            config: RwLock::new(RelayConfig::default()),
            config_path: std::path::PathBuf::from("mediamux.yml"),
            rtmp_connections: ConnectionRegistry::new(),
        });
        let response = path_delete(AxumPath("nope".to_string()), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn adding_a_keepalive_without_a_live_stream_is_bad_request() {
        let state = Arc::new(AdminState {
            manager: manager(),
            config: RwLock::new(RelayConfig::default()),
            config_path: std::path::PathBuf::from("mediamux.yml"),
            rtmp_connections: ConnectionRegistry::new(),
        });
        let request = KeepaliveAddRequest { user: "alice".to_string(), ip: "127.0.0.1".parse().unwrap() };
        let response = keepalives_add(AxumPath("cam1".to_string()), State(state), Json(request)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn kicking_an_unknown_keepalive_is_not_found() {
        let state = Arc::new(AdminState {
            manager: manager(),
            config: RwLock::new(RelayConfig::default()),
            config_path: std::path::PathBuf::from("mediamux.yml"),
            rtmp_connections: ConnectionRegistry::new(),
        });
        let response = keepalives_kick(AxumPath("1".to_string()), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn kicking_an_unknown_rtmp_connection_is_not_found() {
        let state = Arc::new(AdminState {
            manager: manager(),
            config: RwLock::new(RelayConfig::default()),
            config_path: std::path::PathBuf::from("mediamux.yml"),
            rtmp_connections: ConnectionRegistry::new(),
        });
        let response = rtmpconns_kick(AxumPath(Uuid::new_v4().to_string()), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
