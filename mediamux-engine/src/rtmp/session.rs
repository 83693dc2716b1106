//! RTMP connection/session loop (C11): handshake, chunk stream demux, AMF0
//! command dispatch, and the bridge from a publish/play session into
//! [`mediamux_core::PathManager`] and [`mediamux_core::Stream`].
//!
//! Grounded in the teacher's per-connection task model (one spawned task per
//! accepted socket) and its channel-fed writer (command replies and media
//! payloads both funnel through one `mpsc` sender into a dedicated socket
//! writer task, avoiding a `Mutex` around the write half). RTMP carries no
//! out-of-band track negotiation like RTSP's SDP: this driver admits a
//! publisher on the first sequence header it sees and builds a
//! single-track [`MediaDescription`] from it, so one RTMP path here carries
//! either a video or an audio track, never both — a publisher that needs
//! both publishes two paths.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mediamux_core::model::{
    AccessRequest, AccessUnit, Action, Format, Media, MediaDescription, MediaKind, MediaUnit, Protocol,
};
use mediamux_core::{PathManager, Stream};

use crate::bytesio::{BytesReader, BytesWriter};
use crate::flv::amf0::{decode_all, encode_all, object_from_map, Amf0Value};
use crate::flv::define::msg_type_id;
use crate::flv::{self, AudioTag, VideoTag};

use super::chunk::{write_message, ChunkStreams, RtmpMessage, DEFAULT_CHUNK_SIZE};
use super::errors::{SessionError, SessionErrorValue};
use super::handshake::server_handshake;
use super::registry::ConnectionRegistry;

const COMMAND_CHUNK_STREAM_ID: u32 = 3;
const AUDIO_CHUNK_STREAM_ID: u32 = 4;
const VIDEO_CHUNK_STREAM_ID: u32 = 6;
const DEFAULT_MESSAGE_STREAM_ID: u32 = 1;
const OUTGOING_CHUNK_SIZE: usize = 60_000;
/// Delay before closing a connection on a critical auth failure, to slow
/// down credential-guessing.
const ANTI_BRUTE_FORCE_SLEEP: Duration = Duration::from_secs(2);

/// Accepts RTMP connections on one listener and dispatches each to its own
/// session task.
pub struct RtmpServer {
    path_manager: Arc<PathManager>,
    start_timeout: Duration,
    registry: Arc<ConnectionRegistry>,
}

impl RtmpServer {
    #[must_use]
    pub fn new(path_manager: Arc<PathManager>, start_timeout: Duration) -> Self {
        Self {
            path_manager,
            start_timeout,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Shared handle onto this server's connection table, for the admin
    /// API's `rtmpconns` listing and kick-by-uuid endpoints.
    #[must_use]
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub async fn run(self: Arc<Self>, addr: SocketAddr, cancellation: CancellationToken) -> Result<(), SessionError> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "rtmp listener started");
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    let server = self.clone();
                    let child_cancel = cancellation.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(socket, peer, child_cancel).await {
                            debug!(%peer, error = %e, "rtmp session ended");
                        }
                    });
                }
                () = cancellation.cancelled() => return Ok(()),
            }
        }
    }

    #[tracing::instrument(skip(self, socket, cancellation), fields(%peer))]
    async fn handle_connection(
        &self,
        socket: TcpStream,
        peer: SocketAddr,
        cancellation: CancellationToken,
    ) -> Result<(), SessionError> {
        let mut socket = socket;
        server_handshake(&mut socket).await?;
        socket.set_nodelay(true).ok();

        let conn_id = self.registry.insert(peer, cancellation.clone());

        let (mut read_half, write_half) = socket.into_split();
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(256);

        let writer_cancel = cancellation.clone();
        let mut write_half = write_half;
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = out_rx.recv() => {
                        match chunk {
                            Some(bytes) => {
                                if write_half.write_all(&bytes).await.is_err() {
                                    return;
                                }
                            }
                            None => return,
                        }
                    }
                    () = writer_cancel.cancelled() => return,
                }
            }
        });

        let mut session = Session::new(
            self.path_manager.clone(),
            self.registry.clone(),
            conn_id,
            peer,
            self.start_timeout,
            out_tx,
        );

        let mut incoming = ChunkStreams::new();
        let mut reader = BytesReader::new(BytesMut::new());
        let mut read_buf = [0u8; 4096];

        let result = 'outer: loop {
            tokio::select! {
                n = read_half.read(&mut read_buf) => {
                    let n = match n {
                        Ok(n) => n,
                        Err(e) => break Err(e.into()),
                    };
                    if n == 0 {
                        break Err(SessionError(SessionErrorValue::Disconnected));
                    }
                    reader.extend_from_slice(&read_buf[..n]).ok();
                    loop {
                        match incoming.read_chunk(&mut reader) {
                            Ok(Some(message)) => {
                                if let Err(e) = session.handle_message(message).await {
                                    break 'outer Err(e);
                                }
                            }
                            Ok(None) => break,
                            Err(e) => break 'outer Err(e.into()),
                        }
                    }
                }
                () = session.wait_for_publisher_eof() => {
                    break Err(SessionError(SessionErrorValue::PublisherEvicted));
                }
                () = cancellation.cancelled() => break Ok(()),
            }
        };

        session.teardown().await;
        writer.abort();
        self.registry.remove(conn_id);
        result
    }
}

/// Per-connection RTMP session state: which app/path this connection has
/// published or subscribed to, and (once admitted) the fan-out handle it
/// talks to.
struct Session {
    path_manager: Arc<PathManager>,
    registry: Arc<ConnectionRegistry>,
    conn_id: Uuid,
    peer: SocketAddr,
    start_timeout: Duration,
    out_tx: mpsc::Sender<Bytes>,
    app: String,
    role: Role,
    /// Cancelled by [`mediamux_core::PathManager`] when an overriding
    /// publish or path close evicts the current publisher, so the outer
    /// connection loop can break out and let the peer see EOF.
    publisher_eof: Option<CancellationToken>,
}

enum Role {
    Idle,
    /// `publish` received but no sequence header seen yet — path name and
    /// resolved config are already known, the track isn't.
    AwaitingSequenceHeader { path_name: String },
    Publishing {
        path_name: String,
        publisher_id: mediamux_core::model::PublisherId,
        stream: Arc<Stream>,
    },
    Playing {
        path_name: String,
        reader_id: mediamux_core::model::ReaderId,
        forwarder: tokio::task::JoinHandle<()>,
    },
}

impl Session {
    fn new(
        path_manager: Arc<PathManager>,
        registry: Arc<ConnectionRegistry>,
        conn_id: Uuid,
        peer: SocketAddr,
        start_timeout: Duration,
        out_tx: mpsc::Sender<Bytes>,
    ) -> Self {
        Self {
            path_manager,
            registry,
            conn_id,
            peer,
            start_timeout,
            out_tx,
            app: String::new(),
            role: Role::Idle,
            publisher_eof: None,
        }
    }

    /// Resolves once the active publisher is evicted; never resolves while
    /// no publisher is attached.
    async fn wait_for_publisher_eof(&self) {
        match &self.publisher_eof {
            Some(token) => token.cancelled().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_message(&mut self, message: RtmpMessage) -> Result<(), SessionError> {
        match message.message_type_id {
            msg_type_id::COMMAND_AMF0 => self.handle_command(&message.payload).await,
            msg_type_id::VIDEO => self.handle_video(&message.payload, message.timestamp).await,
            msg_type_id::AUDIO => self.handle_audio(&message.payload, message.timestamp).await,
            msg_type_id::DATA_AMF0 => Ok(()), // onMetaData etc: informational, nothing to act on here
            msg_type_id::SET_CHUNK_SIZE | msg_type_id::WINDOW_ACK_SIZE | msg_type_id::USER_CONTROL => Ok(()),
            other => {
                debug!(message_type_id = other, "ignoring unhandled rtmp message type");
                Ok(())
            }
        }
    }

    async fn handle_command(&mut self, payload: &Bytes) -> Result<(), SessionError> {
        let values = decode_all(payload)?;
        let Some(Amf0Value::Utf8String(name)) = values.first() else {
            return Ok(());
        };
        match name.as_str() {
            "connect" => self.handle_connect(&values).await,
            "createStream" => self.handle_create_stream(&values).await,
            "publish" => self.handle_publish(&values).await,
            "play" => self.handle_play(&values).await,
            "deleteStream" | "closeStream" | "FCUnpublish" => {
                self.teardown().await;
                Ok(())
            }
            other => {
                debug!(command = other, "ignoring unsupported rtmp command");
                Ok(())
            }
        }
    }

    async fn handle_connect(&mut self, values: &[Amf0Value]) -> Result<(), SessionError> {
        let transaction_id = values.get(1).and_then(Amf0Value::as_f64).unwrap_or(1.0);
        self.app = values
            .get(2)
            .and_then(|v| v.object_get("app"))
            .and_then(Amf0Value::as_str)
            .unwrap_or_default()
            .to_string();

        self.send_protocol_control().await?;

        let properties = object_from_map(
            [
                ("fmsVer", Amf0Value::Utf8String("FMS/3,0,1,123".to_string())),
                ("capabilities", Amf0Value::Number(31.0)),
            ]
            .into_iter()
            .collect(),
        );
        let information = object_from_map(
            [
                ("level", Amf0Value::Utf8String("status".to_string())),
                ("code", Amf0Value::Utf8String("NetConnection.Connect.Success".to_string())),
                ("description", Amf0Value::Utf8String("Connection succeeded.".to_string())),
            ]
            .into_iter()
            .collect(),
        );
        self.send_command(&[
            Amf0Value::Utf8String("_result".to_string()),
            Amf0Value::Number(transaction_id),
            properties,
            information,
        ])
        .await
    }

    async fn send_protocol_control(&mut self) -> Result<(), SessionError> {
        let mut writer = BytesWriter::new();
        write_message(
            &mut writer,
            2,
            0,
            msg_type_id::WINDOW_ACK_SIZE,
            0,
            &2_500_000u32.to_be_bytes(),
            DEFAULT_CHUNK_SIZE,
        )?;
        let mut peer_bandwidth = 2_500_000u32.to_be_bytes().to_vec();
        peer_bandwidth.push(2); // dynamic limit type
        write_message(&mut writer, 2, 0, msg_type_id::SET_PEER_BANDWIDTH, 0, &peer_bandwidth, DEFAULT_CHUNK_SIZE)?;
        write_message(
            &mut writer,
            2,
            0,
            msg_type_id::SET_CHUNK_SIZE,
            0,
            &(OUTGOING_CHUNK_SIZE as u32).to_be_bytes(),
            DEFAULT_CHUNK_SIZE,
        )?;
        self.send_bytes(writer.extract_current_bytes()).await
    }

    async fn handle_create_stream(&mut self, values: &[Amf0Value]) -> Result<(), SessionError> {
        let transaction_id = values.get(1).and_then(Amf0Value::as_f64).unwrap_or(1.0);
        self.send_command(&[
            Amf0Value::Utf8String("_result".to_string()),
            Amf0Value::Number(transaction_id),
            Amf0Value::Null,
            Amf0Value::Number(f64::from(DEFAULT_MESSAGE_STREAM_ID)),
        ])
        .await
    }

    fn resolve_path_name(&self, stream_key: &str) -> String {
        let key = stream_key.split('?').next().unwrap_or(stream_key);
        if self.app.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.app)
        }
    }

    async fn handle_publish(&mut self, values: &[Amf0Value]) -> Result<(), SessionError> {
        let Some(stream_key) = values.get(3).and_then(Amf0Value::as_str) else {
            return self.reject_publish("400", "missing publish stream key").await;
        };
        let path_name = self.resolve_path_name(stream_key);

        if self.path_manager.resolve(&path_name).is_none() {
            return self.reject_publish("NetStream.Publish.BadName", "path is not configured").await;
        }

        self.registry.set_path(self.conn_id, path_name.clone());
        self.role = Role::AwaitingSequenceHeader { path_name: path_name.clone() };
        self.send_status("onStatus", "status", "NetStream.Publish.Start", &format!("{path_name} is now published")).await
    }

    async fn reject_publish(&mut self, code: &str, message: &str) -> Result<(), SessionError> {
        self.send_status("onStatus", "error", code, message).await?;
        Err(SessionError(SessionErrorValue::UnsupportedCommand(format!("publish rejected: {message}"))))
    }

    async fn handle_play(&mut self, values: &[Amf0Value]) -> Result<(), SessionError> {
        let Some(stream_key) = values.get(3).and_then(Amf0Value::as_str) else {
            return Ok(());
        };
        let path_name = self.resolve_path_name(stream_key);
        let request = self.access_request(path_name.clone(), Action::Read);

        let (_path, stream, reader_id, rx) = match self.path_manager.add_reader(&request).await {
            Ok(v) => v,
            Err(mediamux_core::error::PathError::Auth(failure)) => {
                self.send_status("onStatus", "error", "NetStream.Play.Unauthorized", failure.response()).await?;
                let critical = matches!(failure, mediamux_core::error::AuthFailure::Critical { .. });
                if critical {
                    tokio::time::sleep(ANTI_BRUTE_FORCE_SLEEP).await;
                }
                return Err(SessionError(SessionErrorValue::Path(mediamux_core::error::PathError::Auth(failure))));
            }
            Err(e) => {
                self.send_status("onStatus", "error", "NetStream.Play.StreamNotFound", &e.to_string()).await?;
                return Err(e.into());
            }
        };

        self.registry.set_path(self.conn_id, path_name.clone());
        self.send_status("onStatus", "status", "NetStream.Play.Start", &format!("{path_name} is now playing")).await?;

        let forwarder = spawn_forwarder(stream, rx, self.out_tx.clone());
        self.role = Role::Playing { path_name, reader_id, forwarder };
        Ok(())
    }

    async fn handle_video(&mut self, payload: &Bytes, timestamp: u32) -> Result<(), SessionError> {
        let tag = flv::parse_video_tag(payload)?;
        match &mut self.role {
            Role::AwaitingSequenceHeader { path_name } => {
                if let VideoTag::AvcSequenceHeader { avc_config } = &tag {
                    let (sps, pps) = flv::parse_avc_decoder_config(avc_config)?;
                    let description = MediaDescription::new(vec![Media {
                        kind: MediaKind::Video,
                        formats: vec![Format::H264 {
                            payload_type: 96,
                            clock_rate: 90_000,
                            packetization_mode: 1,
                            sps: Some(sps),
                            pps: Some(pps),
                        }],
                    }]);
                    self.finalize_publish(path_name.clone(), description).await?;
                } else {
                    warn!(path = %path_name, "dropping video before an AVC sequence header arrived");
                }
                Ok(())
            }
            Role::Publishing { path_name, stream, .. } => {
                if let VideoTag::Nalus { is_key_frame, nalus, .. } = tag {
                    let access_units = nalus
                        .into_iter()
                        .map(|data| AccessUnit { data, is_key_frame })
                        .collect();
                    let unit = MediaUnit {
                        media_index: 0,
                        pts: Duration::from_millis(u64::from(timestamp)),
                        ntp: None,
                        rtp_packets: Vec::new(),
                        access_units,
                    };
                    if let Err(e) = stream.write_unit(unit) {
                        warn!(path = %path_name, error = %e, "dropping video unit");
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn handle_audio(&mut self, payload: &Bytes, timestamp: u32) -> Result<(), SessionError> {
        let tag = flv::parse_audio_tag(payload)?;
        match &mut self.role {
            Role::AwaitingSequenceHeader { path_name } => {
                if let AudioTag::AacSequenceHeader { asc } = &tag {
                    let description = MediaDescription::new(vec![Media {
                        kind: MediaKind::Audio,
                        formats: vec![Format::Mpeg4AudioGeneric {
                            payload_type: 97,
                            clock_rate: 44_100,
                            channel_count: 2,
                            config: Some(asc.clone()),
                        }],
                    }]);
                    self.finalize_publish(path_name.clone(), description).await?;
                } else {
                    warn!(path = %path_name, "dropping audio before an AAC sequence header arrived");
                }
                Ok(())
            }
            Role::Publishing { path_name, stream, .. } => {
                if let AudioTag::AacRaw { data } = tag {
                    let unit = MediaUnit {
                        media_index: 0,
                        pts: Duration::from_millis(u64::from(timestamp)),
                        ntp: None,
                        rtp_packets: Vec::new(),
                        access_units: vec![AccessUnit { data, is_key_frame: true }],
                    };
                    if let Err(e) = stream.write_unit(unit) {
                        warn!(path = %path_name, error = %e, "dropping audio unit");
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn finalize_publish(&mut self, path_name: String, description: MediaDescription) -> Result<(), SessionError> {
        let request = self.access_request(path_name.clone(), Action::Publish);
        let (path, publisher_id, eof) = match self.path_manager.add_publisher(&request, Some(self.peer), description).await
        {
            Ok(v) => v,
            Err(mediamux_core::error::PathError::Auth(failure)) => {
                self.send_status("onStatus", "error", "NetStream.Publish.Unauthorized", failure.response()).await?;
                let critical = matches!(failure, mediamux_core::error::AuthFailure::Critical { .. });
                if critical {
                    tokio::time::sleep(ANTI_BRUTE_FORCE_SLEEP).await;
                }
                return Err(SessionError(SessionErrorValue::Path(mediamux_core::error::PathError::Auth(failure))));
            }
            Err(e) => return Err(e.into()),
        };
        let stream = path.stream().await.ok_or(SessionError(SessionErrorValue::MissingConnect("admit_publisher")))?;
        self.role = Role::Publishing { path_name, publisher_id, stream };
        self.publisher_eof = Some(eof);
        Ok(())
    }

    async fn send_status(&mut self, command: &str, level: &str, code: &str, description: &str) -> Result<(), SessionError> {
        let info = object_from_map(
            [
                ("level", Amf0Value::Utf8String(level.to_string())),
                ("code", Amf0Value::Utf8String(code.to_string())),
                ("description", Amf0Value::Utf8String(description.to_string())),
            ]
            .into_iter()
            .collect(),
        );
        self.send_command(&[
            Amf0Value::Utf8String(command.to_string()),
            Amf0Value::Number(0.0),
            Amf0Value::Null,
            info,
        ])
        .await
    }

    async fn send_command(&mut self, values: &[Amf0Value]) -> Result<(), SessionError> {
        let payload = encode_all(values)?;
        let mut writer = BytesWriter::new();
        write_message(
            &mut writer,
            COMMAND_CHUNK_STREAM_ID,
            0,
            msg_type_id::COMMAND_AMF0,
            0,
            &payload,
            OUTGOING_CHUNK_SIZE,
        )?;
        self.send_bytes(writer.extract_current_bytes()).await
    }

    async fn send_bytes(&mut self, bytes: Bytes) -> Result<(), SessionError> {
        self.out_tx
            .send(bytes)
            .await
            .map_err(|_| SessionError(SessionErrorValue::Disconnected))
    }

    async fn teardown(&mut self) {
        self.publisher_eof = None;
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Publishing { path_name, publisher_id, .. } => {
                let request = self.access_request(path_name, Action::Publish);
                self.path_manager.remove_publisher(&request, publisher_id).await;
            }
            Role::Playing { path_name, reader_id, forwarder } => {
                forwarder.abort();
                let request = self.access_request(path_name, Action::Read);
                self.path_manager.remove_reader(&request, reader_id).await;
            }
            Role::AwaitingSequenceHeader { .. } | Role::Idle => {}
        }
    }

    fn access_request(&self, path_name: String, action: Action) -> AccessRequest {
        AccessRequest {
            path_name,
            query: String::new(),
            user: String::new(),
            pass: String::new(),
            ip: self.peer.ip(),
            protocol: Protocol::Rtmp,
            action,
            id: None,
        }
    }
}

/// Spawns the task that converts [`MediaUnit`]s delivered to a reader's
/// channel into outbound FLV-framed RTMP `Audio`/`Video` messages.
fn spawn_forwarder(
    stream: Arc<Stream>,
    mut rx: mpsc::Receiver<Arc<MediaUnit>>,
    out_tx: mpsc::Sender<Bytes>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let kind = stream
            .description()
            .medias
            .first()
            .map(|m| m.kind)
            .unwrap_or(MediaKind::Video);

        while let Some(unit) = rx.recv().await {
            let mut writer = BytesWriter::new();
            let timestamp = unit.pts.as_millis().min(u128::from(u32::MAX)) as u32;
            let result = match kind {
                MediaKind::Video => write_video_unit(&mut writer, &unit, timestamp),
                MediaKind::Audio => write_audio_unit(&mut writer, &unit, timestamp),
            };
            if result.is_err() {
                continue;
            }
            if out_tx.send(writer.extract_current_bytes()).await.is_err() {
                return;
            }
        }
    })
}

fn write_video_unit(writer: &mut BytesWriter, unit: &MediaUnit, timestamp: u32) -> Result<(), SessionError> {
    let mut payload = BytesMut::new();
    let is_key_frame = unit.contains_key_frame();
    payload.extend_from_slice(&[if is_key_frame { 0x17 } else { 0x27 }, 0x01, 0, 0, 0]);
    for au in &unit.access_units {
        payload.extend_from_slice(&(au.data.len() as u32).to_be_bytes());
        payload.extend_from_slice(&au.data);
    }
    write_message(
        writer,
        VIDEO_CHUNK_STREAM_ID,
        timestamp,
        msg_type_id::VIDEO,
        DEFAULT_MESSAGE_STREAM_ID,
        &payload,
        OUTGOING_CHUNK_SIZE,
    )?;
    Ok(())
}

fn write_audio_unit(writer: &mut BytesWriter, unit: &MediaUnit, timestamp: u32) -> Result<(), SessionError> {
    for au in &unit.access_units {
        let mut payload = BytesMut::with_capacity(au.data.len() + 2);
        payload.extend_from_slice(&[0xaf, 0x01]);
        payload.extend_from_slice(&au.data);
        write_message(
            writer,
            AUDIO_CHUNK_STREAM_ID,
            timestamp,
            msg_type_id::AUDIO,
            DEFAULT_MESSAGE_STREAM_ID,
            &payload,
            OUTGOING_CHUNK_SIZE,
        )?;
    }
    Ok(())
}
