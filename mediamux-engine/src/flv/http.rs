//! HTTP-FLV egress: admits an HLS-style reader on the core [`Stream`] and
//! streams an FLV container (file header, AVC/AAC sequence headers, then one
//! tag per access unit) over a chunked `GET` response.
//!
//! Grounded in the same `synctv-xiu` `hls::server` request-path shape
//! [`crate::hls::http`] adapts, with the FLV container framing from
//! [`super::mux`] instead of MPEG-TS.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use mediamux_core::model::{AccessRequest, Action, Format, MediaKind, Protocol};
use mediamux_core::path_manager::PathManager;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{info, instrument, warn};

use super::mux;

#[derive(Clone)]
pub struct HttpFlvState {
    manager: Arc<PathManager>,
}

impl HttpFlvState {
    #[must_use]
    pub fn new(manager: Arc<PathManager>) -> Self {
        Self { manager }
    }
}

#[must_use]
pub fn router(state: HttpFlvState) -> Router {
    Router::new().route("/{path}.flv", get(serve_flv)).with_state(state)
}

#[instrument(skip(state))]
async fn serve_flv(Path(path_name): Path<String>, State(state): State<HttpFlvState>) -> Response {
    let req = AccessRequest {
        path_name: path_name.clone(),
        query: String::new(),
        user: String::new(),
        pass: String::new(),
        ip: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        protocol: Protocol::Hls,
        action: Action::Read,
        id: None,
    };

    let (path, stream, reader_id, mut rx) = match state.manager.add_reader(&req).await {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path_name, error = %e, "http-flv reader rejected");
            return (StatusCode::NOT_FOUND, e.to_string()).into_response();
        }
    };

    let description = stream.description();
    let video_index = description.medias.iter().position(|m| m.kind == MediaKind::Video);
    let audio_index = description.medias.iter().position(|m| m.kind == MediaKind::Audio);
    let has_audio = audio_index.is_some();
    let has_video = video_index.is_some();

    let video_config = video_index.and_then(|i| description.medias.get(i)).and_then(|m| m.formats.first()).and_then(|f| match f {
        Format::H264 { sps: Some(sps), pps: Some(pps), .. } => Some((sps.clone(), pps.clone())),
        _ => None,
    });
    let audio_config = audio_index
        .and_then(|i| description.medias.get(i))
        .and_then(|m| m.formats.first())
        .and_then(|f| match f {
            Format::Mpeg4AudioGeneric { config: Some(config), .. } => Some(config.clone()),
            _ => None,
        });

    let (tx, body_rx) = mpsc::channel::<Bytes>(64);
    let manager = state.manager.clone();

    tokio::spawn(async move {
        if tx.send(mux::file_header(has_audio, has_video)).await.is_err() {
            manager.remove_reader(&req, reader_id).await;
            return;
        }
        if let Some((sps, pps)) = &video_config {
            let body = mux::video_sequence_header_body(sps, pps);
            if tx.send(mux::write_tag(mux::TAG_TYPE_VIDEO, 0, &body)).await.is_err() {
                manager.remove_reader(&req, reader_id).await;
                return;
            }
        }
        if let Some(config) = &audio_config {
            let body = mux::audio_sequence_header_body(config);
            if tx.send(mux::write_tag(mux::TAG_TYPE_AUDIO, 0, &body)).await.is_err() {
                manager.remove_reader(&req, reader_id).await;
                return;
            }
        }

        loop {
            tokio::select! {
                () = path.cancellation().cancelled() => break,
                unit = rx.recv() => {
                    let Some(unit) = unit else { break };
                    let timestamp_ms = unit.pts.as_millis().min(u128::from(u32::MAX)) as u32;
                    let tag = if Some(unit.media_index) == video_index {
                        let is_key = unit.contains_key_frame();
                        let nalus: Vec<Bytes> = unit.access_units.iter().map(|au| au.data.clone()).collect();
                        if nalus.is_empty() { continue }
                        mux::write_tag(mux::TAG_TYPE_VIDEO, timestamp_ms, &mux::video_tag_body(is_key, &nalus))
                    } else if Some(unit.media_index) == audio_index {
                        let Some(au) = unit.access_units.first() else { continue };
                        mux::write_tag(mux::TAG_TYPE_AUDIO, timestamp_ms, &mux::audio_tag_body(&au.data))
                    } else {
                        continue;
                    };
                    if tx.send(tag).await.is_err() {
                        break;
                    }
                }
            }
        }

        manager.remove_reader(&req, reader_id).await;
        info!(path = %path_name, "http-flv viewer disconnected");
    });

    let stream = ReceiverStream::new(body_rx).map(Ok::<_, std::io::Error>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/x-flv")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediamux_core::config::RelayConfig;

    #[tokio::test]
    async fn unknown_path_returns_not_found() {
        let manager = Arc::new(PathManager::new(&RelayConfig::default()).unwrap());
        let state = HttpFlvState::new(manager);
        let response = serve_flv(Path("nope".to_string()), State(state)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
