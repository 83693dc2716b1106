//! HLS pull HTTP server: serves `{path}/index.m3u8` and `{path}/{seq}.ts`,
//! starting the segmenter for a path on its first request and tearing it
//! down when the underlying [`mediamux_core::path::Path`] closes.
//!
//! Grounded directly in the teacher's `hls::server` (`start_http_server`,
//! `serve_m3u8`, `serve_segment`) — same two-route shape and response
//! headers, adapted from the teacher's `{app}/{stream}` key pair to this
//! crate's single `pathName`, and from a pre-populated stream registry to
//! on-demand segmenter startup through [`crate::hls::segmenter::start`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use mediamux_core::path_manager::PathManager;
use tracing::warn;

use crate::hls::segmenter::{self, HlsMuxer};
use crate::storage::HlsStorage;

#[derive(Clone)]
pub struct HlsHttpState {
    manager: Arc<PathManager>,
    storage: Arc<dyn HlsStorage>,
    muxers: Arc<DashMap<String, Arc<HlsMuxer>>>,
}

impl HlsHttpState {
    #[must_use]
    pub fn new(manager: Arc<PathManager>, storage: Arc<dyn HlsStorage>) -> Self {
        Self { manager, storage, muxers: Arc::new(DashMap::new()) }
    }

    async fn muxer_for(&self, path_name: &str) -> Option<Arc<HlsMuxer>> {
        if let Some(existing) = self.muxers.get(path_name) {
            return Some(existing.clone());
        }
        match segmenter::start(self.manager.clone(), path_name.to_string(), self.storage.clone()).await {
            Ok(muxer) => {
                self.muxers.insert(path_name.to_string(), muxer.clone());
                Some(muxer)
            }
            Err(e) => {
                warn!(path = %path_name, error = %e, "hls: could not start segmenter");
                None
            }
        }
    }
}

/// Builds the HLS pull router, mounted at the root of `hlsAddress` the same
/// way the teacher's `HlsServer::start` mounts its own two routes.
#[must_use]
pub fn router(state: HlsHttpState) -> Router {
    Router::new()
        .route("/{path}/index.m3u8", get(serve_playlist))
        .route("/{path}/stream.m3u8", get(serve_playlist))
        .route("/{path}/{segment}", get(serve_segment))
        .with_state(state)
}

async fn serve_playlist(Path(path_name): Path<String>, State(state): State<HlsHttpState>) -> Response {
    let Some(muxer) = state.muxer_for(&path_name).await else {
        return (StatusCode::NOT_FOUND, "no such path or publisher not ready").into_response();
    };
    (
        StatusCode::OK,
        [
            ("Content-Type", "application/vnd.apple.mpegurl"),
            ("Cache-Control", "no-cache"),
        ],
        muxer.playlist(),
    )
        .into_response()
}

async fn serve_segment(
    Path((path_name, segment_filename)): Path<(String, String)>,
    State(state): State<HlsHttpState>,
) -> Response {
    let Some(seq_str) = segment_filename.strip_suffix(".ts") else {
        return (StatusCode::NOT_FOUND, "not a segment").into_response();
    };
    let Ok(sequence) = seq_str.parse::<u64>() else {
        return (StatusCode::NOT_FOUND, "not a segment").into_response();
    };
    let Some(muxer) = state.muxers.get(&path_name).map(|m| m.clone()) else {
        return (StatusCode::NOT_FOUND, "no such path").into_response();
    };
    let Some(key) = muxer.segment_key(sequence) else {
        return (StatusCode::NOT_FOUND, "segment no longer in window").into_response();
    };
    match state.storage.read(&key).await {
        Ok(data) => (
            StatusCode::OK,
            [("Content-Type", "video/mp2t"), ("Cache-Control", "public, max-age=90")],
            data,
        )
            .into_response(),
        Err(e) => {
            warn!(path = %path_name, error = %e, "hls: segment missing from storage");
            (StatusCode::NOT_FOUND, "segment not found").into_response()
        }
    }
}
